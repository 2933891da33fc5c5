//! # Core Error Types
//!
//! Validation failures for the foundational types. I/O and transfer errors
//! live in the crates that perform them.

use thiserror::Error;

/// Errors raised while constructing or validating core types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A checksum string is not 64 hex characters.
    #[error("invalid checksum {0:?}: expected 64 lowercase hex characters")]
    InvalidChecksum(String),

    /// A semantic path is missing a required field or carries an unsafe segment.
    #[error("invalid semantic path: {0}")]
    InvalidSemanticPath(String),

    /// A string did not name any known variant of an enumeration.
    #[error("unknown {kind} {value:?}")]
    UnknownVariant {
        /// Which enumeration was being parsed.
        kind: &'static str,
        /// The rejected input.
        value: String,
    },
}
