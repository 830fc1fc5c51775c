use std::time::Duration;

use thiserror::Error;

use super::code::ErrorCode;

/// Errors raised by [`crate::store::QuotaKeyedStore`] and its backends.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("quota exceeded writing '{key}': needs {needed} bytes, {available} available")]
    QuotaExceeded {
        key: String,
        needed: u64,
        available: u64,
    },

    /// The host store refused the raw write because it is itself full.
    #[error("host store quota exceeded: {0}")]
    HostQuota(String),

    #[error("timed out after {waited:?} waiting for lock on '{key}'")]
    LockTimeout { key: String, waited: Duration },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serde(String),
}

impl StoreError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::QuotaExceeded { .. } | Self::HostQuota(_) => ErrorCode::QuotaExceeded,
            Self::LockTimeout { .. } => ErrorCode::LockTimeout,
            Self::Backend(_) | Self::Io(_) | Self::Serde(_) => ErrorCode::BackendError,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err.to_string())
    }
}
