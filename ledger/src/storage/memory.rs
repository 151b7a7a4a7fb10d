//! In-memory [`StoreAdapter`] for tests and the `--store memory` mode.
//!
//! Besides holding documents it can be switched offline or slowed down, so
//! failure paths can be driven without a real backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::store::{BlockDocument, ChainDocument, StoreAdapter, StoreError, StoreResult};

#[derive(Debug, Default)]
pub struct MemoryStore {
    chains: RwLock<HashMap<String, ChainDocument>>,
    /// chain name -> (block hash -> document)
    collections: RwLock<HashMap<String, HashMap<String, BlockDocument>>>,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delays every call by `latency` before answering.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Number of successful writes (collection creation and upserts).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored blocks of `chain_name`.
    pub fn block_count(&self, chain_name: &str) -> usize {
        self.collections
            .read()
            .get(chain_name)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub fn chain_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.chains.read().keys().cloned().collect();
        names.sort();
        names
    }

    async fn gate(&self) -> StoreResult<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn find_chain_metadata(&self, name: &str) -> StoreResult<Option<ChainDocument>> {
        self.gate().await?;
        Ok(self.chains.read().get(name).cloned())
    }

    async fn upsert_chain_metadata(&self, name: &str, doc: &ChainDocument) -> StoreResult<()> {
        self.gate().await?;
        self.chains.write().insert(name.to_string(), doc.clone());
        self.record_write();
        Ok(())
    }

    async fn find_blocks(&self, chain_name: &str) -> StoreResult<Vec<BlockDocument>> {
        self.gate().await?;
        let mut docs: Vec<BlockDocument> = self
            .collections
            .read()
            .get(chain_name)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default();
        docs.sort_by_key(|d| d.index);
        Ok(docs)
    }

    async fn upsert_block(
        &self,
        chain_name: &str,
        hash: &str,
        doc: &BlockDocument,
    ) -> StoreResult<()> {
        self.gate().await?;
        let mut collections = self.collections.write();
        let collection = collections
            .get_mut(chain_name)
            .ok_or_else(|| StoreError::MissingCollection(chain_name.to_string()))?;
        collection.insert(hash.to_string(), doc.clone());
        drop(collections);
        self.record_write();
        Ok(())
    }

    async fn create_collection(&self, name: &str) -> StoreResult<()> {
        self.gate().await?;
        self.collections.write().entry(name.to_string()).or_default();
        self.record_write();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block::now;
    use serde_json::Map;

    fn block_doc(index: u64, hash: &str) -> BlockDocument {
        let ts = now();
        BlockDocument {
            index,
            value: Map::new(),
            proof: 0.0,
            hash: hash.to_string(),
            prev_hash: String::new(),
            create_time: ts,
            modify_time: ts,
        }
    }

    #[tokio::test]
    async fn upsert_requires_collection() {
        let store = MemoryStore::new();
        let err = store
            .upsert_block("t1", "h0", &block_doc(0, "h0"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::MissingCollection("t1".into()));

        store.create_collection("t1").await.unwrap();
        store.upsert_block("t1", "h0", &block_doc(0, "h0")).await.unwrap();
        assert_eq!(store.block_count("t1"), 1);
    }

    #[tokio::test]
    async fn find_blocks_orders_by_index() {
        let store = MemoryStore::new();
        store.create_collection("t1").await.unwrap();
        for (i, h) in [(2, "c"), (0, "a"), (1, "b")] {
            store.upsert_block("t1", h, &block_doc(i, h)).await.unwrap();
        }
        let indexes: Vec<u64> = store
            .find_blocks("t1")
            .await
            .unwrap()
            .iter()
            .map(|d| d.index)
            .collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert!(store.find_blocks("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_same_hash_replaces() {
        let store = MemoryStore::new();
        store.create_collection("t1").await.unwrap();
        store.upsert_block("t1", "h", &block_doc(0, "h")).await.unwrap();
        store.upsert_block("t1", "h", &block_doc(0, "h")).await.unwrap();
        assert_eq!(store.block_count("t1"), 1);
        assert_eq!(store.write_count(), 3);
    }

    #[tokio::test]
    async fn offline_store_refuses_everything() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.find_chain_metadata("t1").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.create_collection("t1").await.is_err());
        assert_eq!(store.write_count(), 0);

        store.set_offline(false);
        assert!(store.find_chain_metadata("t1").await.unwrap().is_none());
    }
}
