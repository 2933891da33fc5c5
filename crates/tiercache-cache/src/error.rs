//! Errors surfaced by the cache layer.
//!
//! Batch operations never return these for individual items; per-item
//! failures are collected in their reports instead.

use std::path::PathBuf;

use thiserror::Error;
use tiercache_core::{Checksum, ConfigError, CoreError};
use tiercache_store::{LocalStoreError, TransferClass, TransferError};

/// What a validation or verification found wrong with a remote copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    Missing,
    Size,
    Checksum,
}

impl MismatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Size => "size",
            Self::Checksum => "checksum",
        }
    }
}

impl std::fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("no cache entry for key {0:?}")]
    NotFound(String),

    #[error("checksum conflict for {key}: registered {existing}, offered {offered}")]
    ChecksumConflict {
        key: String,
        existing: Checksum,
        offered: Checksum,
    },

    #[error("semantic path {path} is already registered under {owner:?}")]
    PathInUse { path: String, owner: String },

    #[error("{class} transfer failure for {key}: {message}")]
    TransferFailure {
        key: String,
        class: TransferClass,
        message: String,
    },

    #[error("{kind} mismatch for {key}: {detail}")]
    ValidationMismatch {
        key: String,
        kind: MismatchKind,
        detail: String,
    },

    #[error("registry index {path} is corrupt: {message}")]
    RegistryCorruption { path: PathBuf, message: String },

    #[error("invalid metadata: {0}")]
    InvalidMetadata(#[from] CoreError),

    #[error(transparent)]
    Io(#[from] LocalStoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CacheError {
    pub fn transfer(key: &str, err: TransferError) -> Self {
        Self::TransferFailure {
            key: key.to_string(),
            class: err.class,
            message: err.message,
        }
    }

    pub(crate) fn mismatch(key: &str, kind: MismatchKind, detail: impl Into<String>) -> Self {
        Self::ValidationMismatch {
            key: key.to_string(),
            kind,
            detail: detail.into(),
        }
    }

    /// Classification of a transfer failure, if this is one.
    pub fn transfer_class(&self) -> Option<TransferClass> {
        match self {
            Self::TransferFailure { class, .. } => Some(*class),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_failure_keeps_classification() {
        let err = CacheError::transfer("k", TransferError::network("reset by peer"));
        assert_eq!(err.transfer_class(), Some(TransferClass::Network));
        assert_eq!(
            err.to_string(),
            "network transfer failure for k: reset by peer"
        );
    }

    #[test]
    fn mismatch_display_names_kind() {
        let err = CacheError::mismatch("k", MismatchKind::Size, "expected 3, found 4");
        assert_eq!(err.to_string(), "size mismatch for k: expected 3, found 4");
        assert_eq!(err.transfer_class(), None);
    }
}
