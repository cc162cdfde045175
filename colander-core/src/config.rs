//! Configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Hard cap on simultaneous requests to the recipe server. The batch width
/// must never exceed this, or fan-out workers would starve each other.
pub const CONNECTION_POOL_SIZE: usize = 10;

/// Default fan-out width for batch ingredient updates.
pub const DEFAULT_BATCH_WIDTH: usize = 10;

/// Default minimum similarity ratio for near-duplicate suggestions.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Default per-request total deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default transient-retry budget.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Runtime configuration, validated at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the recipe server API.
    pub server_url: String,
    /// Bearer credential. Never logged.
    pub api_token: String,
    /// Fan-out concurrency for batch ingredient updates.
    pub batch_width: usize,
    /// Minimum ratio for similarity suggestions.
    pub similarity_threshold: f64,
    /// Location of the session JSON file.
    pub session_file: PathBuf,
    /// Per-call total deadline.
    pub request_timeout: Duration,
    /// Transient retry budget.
    pub max_retries: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `COLANDER_SERVER_URL`: base URL of the recipe server API
    /// - `COLANDER_API_TOKEN`: bearer token (never logged)
    ///
    /// Optional:
    /// - `COLANDER_BATCH_WIDTH`: fan-out concurrency (default: 10, max: 10)
    /// - `COLANDER_SIMILARITY_THRESHOLD`: suggestion cutoff (default: 0.85)
    /// - `COLANDER_SESSION_FILE`: session path (default: "~/.colander/session.json")
    /// - `COLANDER_REQUEST_TIMEOUT_SECS`: per-call deadline (default: 10)
    /// - `COLANDER_MAX_RETRIES`: transient retry budget (default: 3)
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_url = env::var("COLANDER_SERVER_URL")
            .map_err(|_| ConfigError::MissingEnvVar("COLANDER_SERVER_URL".to_string()))?;

        let api_token = env::var("COLANDER_API_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("COLANDER_API_TOKEN".to_string()))?;

        let batch_width = env::var("COLANDER_BATCH_WIDTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_BATCH_WIDTH);

        let similarity_threshold = env::var("COLANDER_SIMILARITY_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);

        let session_file = env::var("COLANDER_SESSION_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_session_file());

        let request_timeout = env::var("COLANDER_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let max_retries = env::var("COLANDER_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES);

        let config = Self {
            server_url,
            api_token,
            batch_width,
            similarity_threshold,
            session_file,
            request_timeout,
            max_retries,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "COLANDER_SERVER_URL".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.batch_width == 0 {
            return Err(ConfigError::InvalidValue {
                name: "COLANDER_BATCH_WIDTH".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.batch_width > CONNECTION_POOL_SIZE {
            return Err(ConfigError::InvalidValue {
                name: "COLANDER_BATCH_WIDTH".to_string(),
                reason: format!(
                    "must not exceed the connection pool size ({})",
                    CONNECTION_POOL_SIZE
                ),
            });
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "COLANDER_SIMILARITY_THRESHOLD".to_string(),
                reason: "must be in (0, 1]".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default session file path: ~/.colander/session.json
    pub fn default_session_file() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".colander").join("session.json"))
            .unwrap_or_else(|| PathBuf::from("data/session.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server_url: "http://localhost:9000/api".to_string(),
            api_token: "token".to_string(),
            batch_width: DEFAULT_BATCH_WIDTH,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            session_file: PathBuf::from("/tmp/session.json"),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    #[test]
    fn defaults_pass_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn zero_width_is_rejected() {
        let mut config = base_config();
        config.batch_width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn width_above_pool_size_is_rejected() {
        let mut config = base_config();
        config.batch_width = CONNECTION_POOL_SIZE + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let mut config = base_config();
        config.similarity_threshold = 0.0;
        assert!(config.validate().is_err());
        config.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
