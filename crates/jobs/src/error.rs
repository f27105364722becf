use database::DbError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    /// A recompute run was requested while a previous one is still active.
    /// Callers should retry later rather than queueing.
    #[error("A recompute run is already in progress")]
    AlreadyRunning,

    #[error("Database error during recompute: {0}")]
    Db(#[from] DbError),
}
