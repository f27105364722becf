use crate::error::ConfigError;
use crate::settings::Settings;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{ScoringConfig, Settings as Config, SourceConfig};

/// Loads the application configuration.
///
/// Reads the optional `config.toml` file, layers `ONSHORE_*` environment
/// variables on top, and deserializes the result into our strongly-typed
/// `Settings` struct. Every field has a serde default so the application
/// runs without any file present.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = config::Config::builder()
        // Tells the builder to look for a file named `config.toml`.
        .add_source(config::File::with_name("config.toml").required(false))
        // Environment overrides, e.g. ONSHORE_SOURCE__BASE_URL.
        .add_source(config::Environment::with_prefix("ONSHORE").separator("__"))
        .build()?;

    // Attempt to deserialize the entire configuration into our `Settings` struct.
    let settings = builder.try_deserialize::<Settings>()?;

    Ok(settings)
}
