//! # Store Error Types
//!
//! Local I/O is never retried, so [`LocalStoreError`] carries no
//! classification. Remote failures are [`TransferError`]s tagged with a
//! [`TransferClass`] that decides whether the batch engine retries them.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the local tier.
#[derive(Error, Debug)]
pub enum LocalStoreError {
    /// The file does not exist.
    #[error("local file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Any other I/O failure, with the path it happened on.
    #[error("local I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LocalStoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Io { path, source }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferClass {
    /// Credentials rejected or access denied.
    Auth,
    /// Rate limited by the remote.
    Throttled,
    /// Connection failure or timeout.
    Network,
    /// Object or bucket absent.
    NotFound,
    Other,
}

impl TransferClass {
    /// Only throttling and network failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled | Self::Network)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Throttled => "throttled",
            Self::Network => "network",
            Self::NotFound => "not_found",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for TransferClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified remote failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{class} failure: {message}")]
pub struct TransferError {
    pub class: TransferClass,
    pub message: String,
}

impl TransferError {
    pub fn new(class: TransferClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn not_found(key: &str) -> Self {
        Self::new(TransferClass::NotFound, format!("no such object: {key}"))
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransferClass::Network, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransferClass::Other, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.class.is_retryable()
    }
}

impl From<LocalStoreError> for TransferError {
    fn from(err: LocalStoreError) -> Self {
        match err {
            LocalStoreError::NotFound(path) => Self::new(
                TransferClass::NotFound,
                format!("local file not found: {}", path.display()),
            ),
            other => Self::other(other.to_string()),
        }
    }
}
