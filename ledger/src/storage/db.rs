//! # SledStore — Embedded Persistent Store
//!
//! The durable [`StoreAdapter`] backend, built on sled's embedded key-value
//! store.
//!
//! ## Tree Layout
//!
//! | Tree            | Key                | Value                   |
//! |-----------------|--------------------|-------------------------|
//! | `chains`        | chain name (UTF-8) | `json(ChainDocument)`   |
//! | `blocks:{name}` | block hash (UTF-8) | `json(BlockDocument)`   |
//!
//! A chain's collection is its own tree. Block payloads are arbitrary JSON,
//! so documents are stored as JSON rather than a binary encoding.
//!
//! sled calls are synchronous and short; each write is followed by an async
//! flush so an acknowledged upsert is durable.

use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sled::{Db, Tree};

use super::store::{BlockDocument, ChainDocument, StoreAdapter, StoreError, StoreResult};

const CHAINS_TREE: &str = "chains";
const BLOCK_TREE_PREFIX: &str = "blocks:";

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Unavailable(format!("sled error: {err}"))
    }
}

fn block_tree_name(chain_name: &str) -> String {
    format!("{BLOCK_TREE_PREFIX}{chain_name}")
}

fn decode<T: DeserializeOwned>(what: &str, bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt(format!("{what}: {e}")))
}

fn encode<T: serde::Serialize>(what: &str, value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Corrupt(format!("{what}: {e}")))
}

// ---------------------------------------------------------------------------
// SledStore
// ---------------------------------------------------------------------------

/// Persistent store backed by sled.
///
/// sled trees are safe for concurrent use, so a `SledStore` can be shared
/// via `Arc` without extra locking.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    chains: Tree,
}

impl SledStore {
    /// Opens or creates a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Creates a database that is removed when dropped. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let chains = db.open_tree(CHAINS_TREE)?;
        Ok(Self { db, chains })
    }

    /// Names of every chain with stored metadata, sorted.
    pub fn chain_names(&self) -> StoreResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in self.chains.iter() {
            let (key, _) = entry?;
            let name = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Corrupt(format!("chain key: {e}")))?;
            names.push(name);
        }
        Ok(names)
    }

    /// True if the collection of `chain_name` has been created.
    pub fn has_collection(&self, chain_name: &str) -> bool {
        let wanted = block_tree_name(chain_name);
        self.db
            .tree_names()
            .iter()
            .any(|n| n.as_ref() == wanted.as_bytes())
    }

    /// Number of stored blocks of `chain_name`.
    pub fn block_count(&self, chain_name: &str) -> StoreResult<usize> {
        match self.existing_block_tree(chain_name)? {
            Some(tree) => Ok(tree.len()),
            None => Ok(0),
        }
    }

    fn existing_block_tree(&self, chain_name: &str) -> StoreResult<Option<Tree>> {
        if !self.has_collection(chain_name) {
            return Ok(None);
        }
        Ok(Some(self.db.open_tree(block_tree_name(chain_name))?))
    }

    async fn flush(&self) -> StoreResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl StoreAdapter for SledStore {
    async fn find_chain_metadata(&self, name: &str) -> StoreResult<Option<ChainDocument>> {
        match self.chains.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(decode("chain metadata", &bytes)?)),
            None => Ok(None),
        }
    }

    async fn upsert_chain_metadata(&self, name: &str, doc: &ChainDocument) -> StoreResult<()> {
        let bytes = encode("chain metadata", doc)?;
        self.chains.insert(name.as_bytes(), bytes)?;
        self.flush().await
    }

    async fn find_blocks(&self, chain_name: &str) -> StoreResult<Vec<BlockDocument>> {
        let Some(tree) = self.existing_block_tree(chain_name)? else {
            return Ok(Vec::new());
        };
        let mut docs = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            docs.push(decode::<BlockDocument>("block", &bytes)?);
        }
        // Keys are hashes, so tree order is not chain order.
        docs.sort_by_key(|d| d.index);
        Ok(docs)
    }

    async fn upsert_block(
        &self,
        chain_name: &str,
        hash: &str,
        doc: &BlockDocument,
    ) -> StoreResult<()> {
        let tree = self
            .existing_block_tree(chain_name)?
            .ok_or_else(|| StoreError::MissingCollection(chain_name.to_string()))?;
        let bytes = encode("block", doc)?;
        tree.insert(hash.as_bytes(), bytes)?;
        self.flush().await
    }

    async fn create_collection(&self, name: &str) -> StoreResult<()> {
        self.db.open_tree(block_tree_name(name))?;
        self.flush().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
