use std::io;

use crate::filter::FilterError;

/// Custom error type for coding_ci_trigger operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid job path '{path}': {reason}")]
    InvalidJobPath { path: String, reason: String },

    #[error("Invalid branch filter for job '{path}': {source}")]
    InvalidFilter {
        path: String,
        #[source]
        source: FilterError,
    },

    #[error("Build command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Helper type for Results that use BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
