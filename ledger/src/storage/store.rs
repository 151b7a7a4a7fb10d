//! # Store Adapter
//!
//! The persistence boundary of the ledger. A chain reads and writes through
//! [`StoreAdapter`] and never sees the backend behind it.
//!
//! ## Document Layout
//!
//! | Document        | Keyed by            | Fields                                                   |
//! |-----------------|---------------------|----------------------------------------------------------|
//! | `ChainDocument` | chain name          | name, owner, create_time, modify_time                    |
//! | `BlockDocument` | (chain name, hash)  | index, value, proof, hash, prev_hash, create_time, modify_time |
//!
//! Every write is an upsert on a stable key, so replaying a write after a
//! partial failure rewrites identical data instead of duplicating it.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::block::BlockValue;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors surfaced by store adapters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The backend did not answer in time or failed with an I/O error.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write targeted a chain collection that was never created.
    #[error("missing collection: {0}")]
    MissingCollection(String),

    /// A stored document could not be decoded.
    #[error("corrupt document: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Chain metadata as persisted, upserted under the chain name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainDocument {
    pub name: String,
    pub owner: String,
    pub create_time: DateTime<Utc>,
    pub modify_time: DateTime<Utc>,
}

/// A sealed block as persisted, upserted under its hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockDocument {
    pub index: u64,
    pub value: BlockValue,
    pub proof: f64,
    pub hash: String,
    pub prev_hash: String,
    pub create_time: DateTime<Utc>,
    pub modify_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// StoreAdapter
// ---------------------------------------------------------------------------

/// Key-value/document persistence consumed by [`super::chain::Chain`].
///
/// Connection lifecycle belongs to the implementation: once a value of this
/// trait exists, every call must be available and idempotent under retry.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Returns the metadata document of `name`, or `None` if the chain was
    /// never persisted.
    async fn find_chain_metadata(&self, name: &str) -> StoreResult<Option<ChainDocument>>;

    /// Inserts or replaces the metadata document of `name`.
    async fn upsert_chain_metadata(&self, name: &str, doc: &ChainDocument) -> StoreResult<()>;

    /// Returns every block document of `chain_name`, ordered by index. A chain
    /// without a collection has no blocks.
    async fn find_blocks(&self, chain_name: &str) -> StoreResult<Vec<BlockDocument>>;

    /// Inserts or replaces the block document stored under `hash`.
    async fn upsert_block(
        &self,
        chain_name: &str,
        hash: &str,
        doc: &BlockDocument,
    ) -> StoreResult<()>;

    /// Creates the block collection of a chain. Creating an existing
    /// collection is a no-op.
    async fn create_collection(&self, name: &str) -> StoreResult<()>;
}

/// Runs one store call under a deadline. Expiry is reported as
/// [`StoreError::Unavailable`], the same as a transport failure.
pub async fn bounded<T, F>(deadline: Duration, op: &str, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Unavailable(format!(
            "{op} timed out after {}ms",
            deadline.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bounded_reports_timeout_as_unavailable() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, StoreError>(())
        };
        let err = bounded(Duration::from_millis(50), "find_blocks", slow)
            .await
            .unwrap_err();
        match err {
            StoreError::Unavailable(msg) => {
                assert!(msg.contains("find_blocks"));
                assert!(msg.contains("50ms"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn bounded_passes_through_results() {
        let ok = bounded(Duration::from_secs(1), "op", async { Ok::<_, StoreError>(7) })
            .await
            .unwrap();
        assert_eq!(ok, 7);

        let err = bounded(Duration::from_secs(1), "op", async {
            Err::<(), _>(StoreError::Corrupt("x".into()))
        })
        .await
        .unwrap_err();
        assert_eq!(err, StoreError::Corrupt("x".into()));
    }
}
