//! Bounded in-memory chain cache.
//!
//! Holds at most `capacity` chains. When full, inserting a new chain first
//! removes the chain with the oldest modification time. Ties are broken by
//! insertion order, oldest first.
//!
//! ## Locking
//!
//! - The cache map sits behind a `parking_lot::Mutex` that is never held
//!   across an `.await`.
//! - Each chain sits behind its own `tokio::sync::Mutex` inside a
//!   [`CachedChain`], so appends and persists on one chain are serialized
//!   while different chains proceed in parallel.
//! - A chain's modification time is mirrored into an atomic so eviction can
//!   rank chains without locking any of them.
//!
//! ## Draining
//!
//! An evicted chain leaves the cache but stays listed as draining until its
//! pending writes reach the store. Callers must finish that flush before
//! reading the same chain back from the store.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::MutexGuard;

use crate::error::LedgerResult;
use crate::storage::block::Block;
use crate::storage::chain::{Chain, ChainMetadata};

// ---------------------------------------------------------------------------
// CachedChain
// ---------------------------------------------------------------------------

/// Result of a successful append.
///
/// The block is always part of the in-memory chain. `persisted` is false when
/// the follow-up write failed; the block stays queued for the next persist.
#[derive(Debug, Clone)]
pub struct AppendReceipt {
    pub block: Block,
    pub persisted: bool,
    pub persist_error: Option<String>,
}

/// A chain as held by the cache.
///
/// Once evicted the handle is retired: it still persists and answers reads,
/// but refuses appends so that no block lands on a copy the cache no longer
/// tracks.
pub struct CachedChain {
    name: String,
    owner: String,
    modified_micros: AtomicI64,
    retired: AtomicBool,
    chain: tokio::sync::Mutex<Chain>,
}

/// Shared handle to a cached chain. Stays usable after eviction.
pub type SharedChain = Arc<CachedChain>;

impl fmt::Debug for CachedChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedChain")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("modified_micros", &self.modified_micros.load(Ordering::Acquire))
            .finish()
    }
}

impl CachedChain {
    pub fn new(chain: Chain) -> SharedChain {
        Arc::new(Self {
            name: chain.name().to_string(),
            owner: chain.owner().to_string(),
            modified_micros: AtomicI64::new(chain.modify_time().timestamp_micros()),
            retired: AtomicBool::new(false),
            chain: tokio::sync::Mutex::new(chain),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn metadata(&self) -> ChainMetadata {
        ChainMetadata {
            name: self.name.clone(),
            owner: self.owner.clone(),
        }
    }

    /// Modification time of the chain in microseconds since the epoch.
    pub fn last_modified_micros(&self) -> i64 {
        self.modified_micros.load(Ordering::Acquire)
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.last_modified_micros()).unwrap_or_default()
    }

    /// Exclusive access to the chain.
    pub async fn lock(&self) -> MutexGuard<'_, Chain> {
        self.chain.lock().await
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Appends `block` and persists, under one lock.
    ///
    /// Returns `Ok(None)` without touching the chain if the handle was
    /// retired; the caller should reopen the chain and retry. An error is
    /// returned only when the block could not be appended. A failed persist
    /// is reported through the receipt.
    pub async fn append(&self, block: Block) -> LedgerResult<Option<AppendReceipt>> {
        let mut chain = self.chain.lock().await;
        if self.is_retired() {
            return Ok(None);
        }
        let sealed = chain.append(block)?.clone();
        self.modified_micros
            .store(chain.modify_time().timestamp_micros(), Ordering::Release);

        match chain.persist().await {
            Ok(_) => Ok(Some(AppendReceipt {
                block: sealed,
                persisted: true,
                persist_error: None,
            })),
            Err(e) => {
                tracing::warn!(
                    chain = %self.name,
                    index = sealed.index(),
                    error = %e,
                    "block appended but not persisted"
                );
                Ok(Some(AppendReceipt {
                    block: sealed,
                    persisted: false,
                    persist_error: Some(e.to_string()),
                }))
            }
        }
    }

    /// Persists pending state. Returns the number of blocks written.
    pub async fn persist(&self) -> LedgerResult<usize> {
        self.chain.lock().await.persist().await
    }

    /// Marks the handle retired and writes out whatever is pending. Appends
    /// that won the lock first are included in the write.
    pub async fn retire(&self) -> LedgerResult<usize> {
        let mut chain = self.chain.lock().await;
        self.retired.store(true, Ordering::Release);
        chain.persist().await
    }
}

// ---------------------------------------------------------------------------
// ChainCache
// ---------------------------------------------------------------------------

/// Outcome of [`ChainCache::put`].
#[derive(Debug)]
pub enum CachePut {
    /// A chain with that name is already cached. Nothing changed.
    AlreadyCached,
    /// The chain was inserted, possibly after evicting another.
    Inserted { evicted: Option<SharedChain> },
}

impl CachePut {
    pub fn inserted(&self) -> bool {
        matches!(self, CachePut::Inserted { .. })
    }
}

struct CacheEntry {
    chain: SharedChain,
    seq: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    draining: HashMap<String, SharedChain>,
    next_seq: u64,
}

impl CacheInner {
    /// Name of the least recently modified chain.
    fn victim(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| (e.chain.last_modified_micros(), e.seq))
            .map(|(name, _)| name.clone())
    }
}

pub struct ChainCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl fmt::Debug for ChainCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainCache")
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .finish()
    }
}

impl ChainCache {
    /// Creates an empty cache. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn get(&self, name: &str) -> Option<SharedChain> {
        self.inner.lock().entries.get(name).map(|e| Arc::clone(&e.chain))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().entries.contains_key(name)
    }

    /// Inserts `chain` unless its name is already cached. Never exceeds the
    /// capacity: a full cache evicts its least recently modified chain first,
    /// marks it draining and hands it back so the caller can flush it.
    pub fn put(&self, chain: SharedChain) -> CachePut {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(chain.name()) {
            return CachePut::AlreadyCached;
        }

        let mut evicted = None;
        if inner.entries.len() >= self.capacity {
            if let Some(victim) = inner.victim() {
                if let Some(entry) = inner.entries.remove(&victim) {
                    inner
                        .draining
                        .insert(victim.clone(), Arc::clone(&entry.chain));
                    evicted = Some(entry.chain);
                }
                tracing::debug!(chain = %victim, "evicted least recently modified chain");
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .entries
            .insert(chain.name().to_string(), CacheEntry { chain, seq });
        CachePut::Inserted { evicted }
    }

    /// Removes `name` from the cache.
    pub fn evict(&self, name: &str) -> Option<SharedChain> {
        self.inner.lock().entries.remove(name).map(|e| e.chain)
    }

    /// The evicted copy of `name` whose flush has not succeeded yet.
    pub fn draining(&self, name: &str) -> Option<SharedChain> {
        self.inner.lock().draining.get(name).map(Arc::clone)
    }

    /// Every evicted chain still waiting for a successful flush.
    pub fn draining_chains(&self) -> Vec<SharedChain> {
        self.inner.lock().draining.values().map(Arc::clone).collect()
    }

    /// Forgets `chain` as draining once everything it held is stored. A newer
    /// eviction of the same name is left alone.
    pub fn finish_draining(&self, chain: &SharedChain) {
        let mut inner = self.inner.lock();
        if inner
            .draining
            .get(chain.name())
            .is_some_and(|d| Arc::ptr_eq(d, chain))
        {
            inner.draining.remove(chain.name());
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Every cached chain, in no particular order.
    pub fn chains(&self) -> Vec<SharedChain> {
        self.inner
            .lock()
            .entries
            .values()
            .map(|e| Arc::clone(&e.chain))
            .collect()
    }

    /// `{name, owner}` of every cached chain, sorted by name.
    pub fn digest(&self) -> Vec<ChainMetadata> {
        let mut digest: Vec<ChainMetadata> = self
            .inner
            .lock()
            .entries
            .values()
            .map(|e| e.chain.metadata())
            .collect();
        digest.sort_by(|a, b| a.name.cmp(&b.name));
        digest
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block::BlockValue;
    use crate::storage::memory::MemoryStore;
    use std::time::Duration;

    // -- Helpers ------------------------------------------------------------

    fn shared(name: &str, store: &Arc<MemoryStore>) -> SharedChain {
        let chain = Chain::new(name, "owner", store.clone(), Duration::from_secs(1)).unwrap();
        CachedChain::new(chain)
    }

    fn fill(cache: &ChainCache, store: &Arc<MemoryStore>, n: usize) {
        for i in 0..n {
            assert!(cache.put(shared(&format!("c{i}"), store)).inserted());
        }
    }

    // -- Tests --------------------------------------------------------------

    #[test]
    fn put_and_get() {
        let store = Arc::new(MemoryStore::new());
        let cache = ChainCache::new(4);
        assert!(cache.get("a").is_none());

        assert!(cache.put(shared("a", &store)).inserted());
        assert_eq!(cache.get("a").unwrap().name(), "a");
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn put_existing_name_changes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let cache = ChainCache::new(4);
        let first = shared("a", &store);
        cache.put(Arc::clone(&first));

        assert!(matches!(cache.put(shared("a", &store)), CachePut::AlreadyCached));
        assert_eq!(cache.size(), 1);
        assert!(Arc::ptr_eq(&cache.get("a").unwrap(), &first));
    }

    #[test]
    fn twenty_sixth_chain_evicts_oldest() {
        let store = Arc::new(MemoryStore::new());
        let cache = ChainCache::new(25);
        fill(&cache, &store, 25);
        assert_eq!(cache.size(), 25);

        let CachePut::Inserted { evicted: Some(evicted) } = cache.put(shared("c25", &store))
        else {
            panic!("expected an eviction");
        };
        assert_eq!(evicted.name(), "c0");
        assert_eq!(cache.size(), 25);
        assert!(cache.get("c0").is_none());
        assert!(cache.get("c25").is_some());
    }

    #[tokio::test]
    async fn append_protects_chain_from_eviction() {
        let store = Arc::new(MemoryStore::new());
        let cache = ChainCache::new(3);
        fill(&cache, &store, 3);

        tokio::time::sleep(Duration::from_millis(2)).await;
        let c0 = cache.get("c0").unwrap();
        let receipt = c0
            .append(Block::new(0, BlockValue::new(), 0.0))
            .await
            .unwrap()
            .expect("live handle");
        assert!(receipt.persisted);

        let CachePut::Inserted { evicted: Some(evicted) } = cache.put(shared("c3", &store))
        else {
            panic!("expected an eviction");
        };
        assert_eq!(evicted.name(), "c1");
        assert!(cache.contains("c0"));
    }

    #[tokio::test]
    async fn evicted_handle_still_persists() {
        let store = Arc::new(MemoryStore::new());
        let cache = ChainCache::new(1);
        let a = shared("a", &store);
        cache.put(Arc::clone(&a));
        cache.put(shared("b", &store));
        assert!(!cache.contains("a"));

        assert_eq!(a.persist().await.unwrap(), 1);
        assert_eq!(store.block_count("a"), 1);
    }

    #[tokio::test]
    async fn failed_persist_is_reported_in_receipt() {
        let store = Arc::new(MemoryStore::new());
        let chain = shared("a", &store);
        store.set_offline(true);

        let receipt = chain
            .append(Block::new(0, BlockValue::new(), 3.0))
            .await
            .unwrap()
            .expect("live handle");
        assert!(!receipt.persisted);
        assert!(receipt.persist_error.is_some());
        assert_eq!(receipt.block.index(), 1);
        assert_eq!(chain.lock().await.pending_writes(), 2);
    }

    #[tokio::test]
    async fn retired_handle_refuses_appends() {
        let store = Arc::new(MemoryStore::new());
        let chain = shared("a", &store);
        assert_eq!(chain.retire().await.unwrap(), 1);
        assert!(chain.is_retired());

        let outcome = chain
            .append(Block::new(0, BlockValue::new(), 0.0))
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(chain.lock().await.size(), 1);
    }

    #[test]
    fn evict_and_digest() {
        let store = Arc::new(MemoryStore::new());
        let cache = ChainCache::new(5);
        cache.put(shared("b", &store));
        cache.put(shared("a", &store));

        let names: Vec<String> = cache.digest().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(cache.chains().len(), 2);

        assert!(cache.evict("a").is_some());
        assert!(cache.evict("a").is_none());
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn evicted_chain_drains_until_finished() {
        let store = Arc::new(MemoryStore::new());
        let cache = ChainCache::new(1);
        let a = shared("a", &store);
        cache.put(Arc::clone(&a));
        assert!(cache.draining("a").is_none());

        cache.put(shared("b", &store));
        assert!(Arc::ptr_eq(&cache.draining("a").unwrap(), &a));
        assert_eq!(cache.draining_chains().len(), 1);

        // Only the exact evicted handle clears the entry.
        cache.finish_draining(&shared("a", &store));
        assert!(cache.draining("a").is_some());
        cache.finish_draining(&a);
        assert!(cache.draining("a").is_none());
        assert!(cache.draining_chains().is_empty());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(ChainCache::new(0).capacity(), 1);
    }
}
