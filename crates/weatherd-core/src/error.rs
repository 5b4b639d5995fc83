//! Error types shared by the weatherd binaries.

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),

    #[error("Invalid duration {value:?} for {field}")]
    InvalidDuration { field: String, value: String },
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
            ConfigError::InvalidDuration { .. } => {
                "Durations must look like 300, 30s, 5m or 1h. Check your settings."
            }
        }
    }
}
