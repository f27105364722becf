use serde::Deserialize;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

/// Parameters for the external trade-statistics source and its retry budget.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the statistics API.
    pub base_url: String,
    /// The fixed reporting country whose imports we track.
    pub reporter: String,
    /// Trade flow direction requested from the source.
    pub flow: String,
    /// Reporting frequency code ("M" for monthly).
    pub frequency: String,
    /// Maximum attempts per page, including the first.
    pub max_attempts: u32,
    /// Backoff delay before the second attempt, in milliseconds. Doubles
    /// per attempt thereafter.
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff sleep, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://comtradeapi.un.org/public/v1/preview".to_string(),
            reporter: "India".to_string(),
            flow: "import".to_string(),
            frequency: "M".to_string(),
            max_attempts: 4,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Parameters for the opportunity-score computation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Multiplicative placeholder for future policy/tariff data.
    pub policy_multiplier: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self { policy_multiplier: 1.0 }
    }
}
