//! Error types for gwctl
//!
//! Only argument validation and executor misuse are errors. Failures of the
//! external tools themselves are reported as data through `CommandResult`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GwctlError {
    /// A required field was empty or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The executor was asked to run an empty argument vector
    #[error("Empty command: no program given")]
    EmptyCommand,
    /// A config file that must exist is missing
    #[error("Config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Runtime configuration could not be loaded or saved
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// Parse error
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl GwctlError {
    /// Shorthand used by the validators
    pub fn invalid(msg: impl Into<String>) -> Self {
        GwctlError::InvalidArgument(msg.into())
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, GwctlError::InvalidArgument(_))
    }
}

impl From<serde_json::Error> for GwctlError {
    fn from(error: serde_json::Error) -> Self {
        GwctlError::ParseError(error.to_string())
    }
}

pub type GwctlResult<T> = Result<T, GwctlError>;
