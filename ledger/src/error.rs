//! Error types for the ledger engine.
//!
//! Every fallible ledger operation returns a [`LedgerError`]. The variants
//! follow the failure modes of the chain lifecycle: lookups that find
//! nothing, duplicate registrations, malformed input, payloads that cannot
//! be hashed, an unreachable store, and hash chains that do not verify.

use thiserror::Error;

use crate::storage::store::StoreError;

/// Errors returned by chains, the chain cache and the [`crate::Ledger`].
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The chain or block does not exist. A normal outcome, not a failure.
    #[error("not found: {0}")]
    NotFound(String),

    /// A chain with the same name is already registered.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request payload is missing fields or has mistyped ones.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An append was attempted without a block.
    #[error("cannot append a nil block")]
    NilBlock,

    /// The block's fields cannot be canonically encoded for hashing.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The store did not answer, answered with an I/O failure, or missed the
    /// call deadline. Retryable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A hash-chain check failed, or the store returned a document that does
    /// not decode. Never repaired automatically.
    #[error("integrity violation: {0}")]
    Integrity(String),
}

/// Convenience alias used throughout the crate.
pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    /// True for errors a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StoreUnavailable(_))
    }

    /// True for the "absent" outcome, which callers should not log as a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound(_))
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => LedgerError::StoreUnavailable(msg),
            StoreError::MissingCollection(name) => {
                LedgerError::StoreUnavailable(format!("collection {name} does not exist"))
            }
            StoreError::Corrupt(msg) => LedgerError::Integrity(msg),
        }
    }
}
