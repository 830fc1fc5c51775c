use std::time::Duration;

use thiserror::Error;

use super::code::ErrorCode;
use super::store::StoreError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("governor failed: {0}")]
    Governor(#[from] GovernorError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Failures that cross a governor component boundary.
///
/// Transient failures of the wrapped operation never show up here directly;
/// they are absorbed by the retrier and only the terminal
/// [`GovernorError::RetriesExhausted`] is surfaced.
#[derive(Error, Debug, Clone)]
pub enum GovernorError {
    #[error("failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: String,
        /// Error message of every attempt, oldest first.
        history: Vec<String>,
    },

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl GovernorError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,
            Self::UnknownChannel(_) | Self::Config(_) => ErrorCode::ConfigError,
            Self::DeadlineExceeded(_) => ErrorCode::Timeout,
            Self::Store(e) => e.error_code(),
        }
    }

    /// Configuration and quota problems cannot be fixed by trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.error_code(),
            ErrorCode::Timeout | ErrorCode::LockTimeout | ErrorCode::BackendError
        )
    }

    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}
