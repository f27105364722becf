use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("The statistics source is rate limiting us (HTTP 429)")]
    RateLimited,

    #[error("The statistics source returned a server error (HTTP {0})")]
    Server(u16),

    #[error("The statistics source rejected the request (HTTP {0})")]
    Status(u16),

    #[error("The statistics source reported a validation error: {0}")]
    Validation(String),

    #[error("Failed to deserialize the API response: {0}")]
    Deserialization(String),
}

impl ApiError {
    /// Whether a retry with backoff is worthwhile. Rate limiting, 5xx
    /// responses, and transport failures are transient; everything else is
    /// permanent for the current request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited | ApiError::Server(_) | ApiError::Transport(_)
        )
    }
}
