//! Application configuration loaded from the environment.

use secrecy::SecretString;
use std::env;
use std::path::PathBuf;
use tracing::Level;

/// Voices the mixer can hold in transit before scheduling backs off.
pub const OUTPUT_VOICE_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct Config {
    pub gemini_api_key: SecretString,
    /// Overrides the live model when set.
    pub model: Option<String>,
    pub log_level: Level,
    /// Default camera stand-in when `--frames` is not given.
    pub frame_source: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `GEMINI_API_KEY`: Secret key for the live endpoint. Required.
    // *   `LIVE_MODEL`: (Optional) Live model name, with or without the `models/` prefix.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    // *   `FRAME_SOURCE`: (Optional) Image file or directory used as the camera.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. Ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let gemini_api_key = lookup("GEMINI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let model = match lookup("LIVE_MODEL") {
            Some(model) if model.trim().is_empty() => {
                return Err(ConfigError::InvalidValue {
                    name: "LIVE_MODEL".to_string(),
                    value: model,
                });
            }
            other => other,
        };

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            gemini_api_key: SecretString::from(gemini_api_key),
            model,
            log_level,
            frame_source: lookup("FRAME_SOURCE").map(PathBuf::from),
        })
    }
}
