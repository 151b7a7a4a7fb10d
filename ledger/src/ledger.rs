//! # Ledger Service
//!
//! The capability object the HTTP layer talks to. It owns the store adapter,
//! the chain cache and the proof strategy, and turns validated requests into
//! chain operations.
//!
//! ## Cache Misses
//!
//! Every miss (restore, register, implicit open) runs under a gate keyed by
//! the chain name, so two requests can never build two different genesis
//! blocks for one name. Misses for different names run in parallel, and hits
//! never touch a gate.
//!
//! ## Eviction
//!
//! A miss that fills the cache evicts the least recently modified chain. The
//! evicted handle is retired and flushed after the gate is released. Until
//! that flush succeeds the chain stays draining, and the next miss for its
//! name finishes the flush before reading the store. A failed flush is
//! logged and counted; the eviction still happens.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;

use serde::Serialize;
use serde_json::Value;

use crate::cache::{AppendReceipt, CachePut, CachedChain, ChainCache, SharedChain};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::proof::{ProofStrategy, TrivialProof};
use crate::request::{validate_chain_name, AppendRequest, FindBlockRequest, RegisterRequest};
use crate::storage::block::Block;
use crate::storage::chain::{Chain, ChainMetadata, ChainSummary};
use crate::storage::store::{bounded, StoreAdapter};

/// Appends that keep hitting retired handles give up after this many tries.
const MAX_APPEND_ATTEMPTS: usize = 3;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LedgerStats {
    blocks_appended: AtomicU64,
    chains_registered: AtomicU64,
    chains_opened: AtomicU64,
    cache_evictions: AtomicU64,
    persist_failures: AtomicU64,
}

/// Point-in-time copy of the ledger counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub blocks_appended: u64,
    pub chains_registered: u64,
    pub chains_opened: u64,
    pub cache_evictions: u64,
    pub persist_failures: u64,
    pub cached_chains: usize,
}

/// Proof suggestion for the next block of a chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProofHint {
    pub chain: String,
    pub prev_hash: String,
    pub proof: f64,
    pub strategy: &'static str,
}

/// Outcome of [`Ledger::flush_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub chains: usize,
    pub blocks_written: usize,
    pub failed: Vec<String>,
}

// ---------------------------------------------------------------------------
// Name gates
// ---------------------------------------------------------------------------

type GateMap = parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Held while a cache miss for one chain name is resolved. The map entry is
/// dropped with the last holder.
struct NameGate<'a> {
    gates: &'a GateMap,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NameGate<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut gates = self.gates.lock();
        if gates
            .get(&self.name)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            gates.remove(&self.name);
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct Ledger {
    store: Arc<dyn StoreAdapter>,
    cache: ChainCache,
    proof: Arc<dyn ProofStrategy>,
    config: LedgerConfig,
    open_gates: GateMap,
    stats: LedgerStats,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("cache", &self.cache)
            .field("proof", &self.proof)
            .field("config", &self.config)
            .finish()
    }
}

impl Ledger {
    pub fn new(store: Arc<dyn StoreAdapter>, config: LedgerConfig) -> Self {
        Self {
            store,
            cache: ChainCache::new(config.max_cached_chains),
            proof: Arc::new(TrivialProof),
            config,
            open_gates: GateMap::default(),
            stats: LedgerStats::default(),
        }
    }

    pub fn with_defaults(store: Arc<dyn StoreAdapter>) -> Self {
        Self::new(store, LedgerConfig::default())
    }

    /// Replaces the proof strategy used for proof hints.
    pub fn with_proof_strategy(mut self, proof: Arc<dyn ProofStrategy>) -> Self {
        self.proof = proof;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // -- Chain access ---------------------------------------------------------

    /// Returns the chain named `name` from the cache, or restores it from the
    /// store. Never creates a chain.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if neither cache nor store know the chain.
    pub async fn lookup(&self, name: &str) -> LedgerResult<SharedChain> {
        validate_chain_name(name)?;
        if let Some(chain) = self.cache.get(name) {
            return Ok(chain);
        }

        let (shared, evicted) = {
            let _gate = self.gate(name).await;
            if let Some(chain) = self.cache.get(name) {
                return Ok(chain);
            }
            self.settle(name).await?;

            match Chain::open_existing(name, Arc::clone(&self.store), self.config.store_timeout)
                .await?
            {
                Some(chain) => self.admit(chain),
                None => {
                    tracing::debug!(chain = name, "chain not found");
                    return Err(LedgerError::NotFound(format!("chain {name}")));
                }
            }
        };
        self.drain(evicted).await;
        Ok(shared)
    }

    /// Like [`Ledger::lookup`], but an unknown chain is created with the
    /// default owner. The new chain is written on its first persist.
    pub async fn open(&self, name: &str) -> LedgerResult<SharedChain> {
        validate_chain_name(name)?;
        if let Some(chain) = self.cache.get(name) {
            return Ok(chain);
        }

        let (shared, evicted) = {
            let _gate = self.gate(name).await;
            if let Some(chain) = self.cache.get(name) {
                return Ok(chain);
            }
            self.settle(name).await?;

            let chain = Chain::open(
                name,
                &self.config.default_owner,
                Arc::clone(&self.store),
                self.config.store_timeout,
            )
            .await?;
            self.stats.chains_opened.fetch_add(1, Ordering::Relaxed);
            self.admit(chain)
        };
        self.drain(evicted).await;
        Ok(shared)
    }

    /// Creates and persists a new chain.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Conflict`] if the name is cached or already stored.
    /// [`LedgerError::StoreUnavailable`] if the first persist fails; the
    /// chain is then not cached.
    pub async fn register(&self, name: &str, owner: Option<&str>) -> LedgerResult<SharedChain> {
        validate_chain_name(name)?;
        let (shared, evicted) = {
            let _gate = self.gate(name).await;
            self.register_gated(name, owner).await?
        };
        self.drain(evicted).await;
        Ok(shared)
    }

    async fn register_gated(
        &self,
        name: &str,
        owner: Option<&str>,
    ) -> LedgerResult<(SharedChain, Option<SharedChain>)> {
        if self.cache.contains(name) || self.cache.draining(name).is_some() {
            return Err(LedgerError::Conflict(format!("chain {name} already exists")));
        }
        let existing = bounded(
            self.config.store_timeout,
            "find_chain_metadata",
            self.store.find_chain_metadata(name),
        )
        .await?;
        if existing.is_some() {
            return Err(LedgerError::Conflict(format!("chain {name} already exists")));
        }

        let owner = owner.unwrap_or(&self.config.default_owner);
        let mut chain = Chain::new(
            name,
            owner,
            Arc::clone(&self.store),
            self.config.store_timeout,
        )?;
        if let Err(e) = chain.persist().await {
            self.stats.persist_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(chain = name, error = %e, "could not persist new chain");
            return Err(e);
        }

        self.stats.chains_registered.fetch_add(1, Ordering::Relaxed);
        tracing::info!(chain = name, owner, "registered chain");
        Ok(self.admit(chain))
    }

    pub async fn register_request(&self, req: &RegisterRequest) -> LedgerResult<SharedChain> {
        self.register(&req.chain_name, req.chain_owner.as_deref())
            .await
    }

    // -- Blocks ---------------------------------------------------------------

    /// Parses an untyped append body and appends it. See [`AppendRequest`].
    pub async fn append_block(&self, body: &Value) -> LedgerResult<AppendReceipt> {
        let req = AppendRequest::from_json(body)?;
        self.append(req).await
    }

    /// Appends a block to `req.chain`, opening the chain if needed.
    pub async fn append(&self, req: AppendRequest) -> LedgerResult<AppendReceipt> {
        let block = Block::new(0, req.value, req.proof);

        for _ in 0..MAX_APPEND_ATTEMPTS {
            let chain = self.open(&req.chain).await?;
            let Some(receipt) = chain.append(block.clone()).await? else {
                tracing::debug!(chain = %req.chain, "chain was evicted mid-append, reopening");
                continue;
            };

            self.stats.blocks_appended.fetch_add(1, Ordering::Relaxed);
            if !receipt.persisted {
                self.stats.persist_failures.fetch_add(1, Ordering::Relaxed);
            }
            tracing::debug!(
                chain = %req.chain,
                index = receipt.block.index(),
                persisted = receipt.persisted,
                "appended block"
            );
            return Ok(receipt);
        }

        Err(LedgerError::StoreUnavailable(format!(
            "chain {} was evicted during {MAX_APPEND_ATTEMPTS} append attempts",
            req.chain
        )))
    }

    /// Finds a block by hash and proof.
    pub async fn find_block(&self, req: &FindBlockRequest) -> LedgerResult<Block> {
        let chain = self.lookup(&req.chain_name).await?;
        let guard = chain.lock().await;
        match guard.find_block(&req.hash_value, req.proof) {
            Some(block) => Ok(block.clone()),
            None => {
                tracing::debug!(chain = %req.chain_name, hash = %req.hash_value, "block not found");
                Err(LedgerError::NotFound(format!(
                    "block {} in chain {}",
                    req.hash_value, req.chain_name
                )))
            }
        }
    }

    // -- Inspection -----------------------------------------------------------

    pub async fn summary(&self, name: &str) -> LedgerResult<ChainSummary> {
        let chain = self.lookup(name).await?;
        let guard = chain.lock().await;
        Ok(guard.summary())
    }

    /// Verifies every hash and link of the chain.
    pub async fn verify(&self, name: &str) -> LedgerResult<ChainSummary> {
        let chain = self.lookup(name).await?;
        let guard = chain.lock().await;
        guard.verify()?;
        Ok(guard.summary())
    }

    pub async fn proof_hint(&self, name: &str) -> LedgerResult<ProofHint> {
        let chain = self.lookup(name).await?;
        let prev_hash = chain.lock().await.current_hash();
        Ok(ProofHint {
            chain: name.to_string(),
            proof: self.proof.solve(&prev_hash),
            prev_hash,
            strategy: self.proof.name(),
        })
    }

    /// `{name, owner}` of every cached chain.
    pub fn digest(&self) -> Vec<ChainMetadata> {
        self.cache.digest()
    }

    pub fn cached_chains(&self) -> usize {
        self.cache.size()
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.capacity()
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocks_appended: self.stats.blocks_appended.load(Ordering::Relaxed),
            chains_registered: self.stats.chains_registered.load(Ordering::Relaxed),
            chains_opened: self.stats.chains_opened.load(Ordering::Relaxed),
            cache_evictions: self.stats.cache_evictions.load(Ordering::Relaxed),
            persist_failures: self.stats.persist_failures.load(Ordering::Relaxed),
            cached_chains: self.cache.size(),
        }
    }

    // -- Persistence ----------------------------------------------------------

    /// Persists pending blocks of one chain.
    pub async fn flush(&self, name: &str) -> LedgerResult<usize> {
        let chain = self.lookup(name).await?;
        chain.persist().await.map_err(|e| {
            self.stats.persist_failures.fetch_add(1, Ordering::Relaxed);
            e
        })
    }

    /// Persists every cached chain, and every evicted chain whose flush has
    /// not succeeded yet. Failures are collected, not returned.
    pub async fn flush_all(&self) -> FlushReport {
        let mut report = FlushReport::default();
        let mut chains = self.cache.chains();
        chains.extend(self.cache.draining_chains());
        for chain in chains {
            report.chains += 1;
            match chain.persist().await {
                Ok(written) => {
                    self.cache.finish_draining(&chain);
                    report.blocks_written += written;
                }
                Err(e) => {
                    self.stats.persist_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(chain = %chain.name(), error = %e, "flush failed");
                    report.failed.push(chain.name().to_string());
                }
            }
        }
        report.failed.sort();
        report
    }

    // -- Internals ------------------------------------------------------------

    async fn gate(&self, name: &str) -> NameGate<'_> {
        let gate = Arc::clone(self.open_gates.lock().entry(name.to_string()).or_default());
        NameGate {
            gates: &self.open_gates,
            name: name.to_string(),
            guard: Some(gate.lock_owned().await),
        }
    }

    /// Finishes the flush of an evicted copy of `name`, if one is pending.
    /// Call with the name's gate held, before reading the chain from the
    /// store.
    async fn settle(&self, name: &str) -> LedgerResult<()> {
        let Some(evicted) = self.cache.draining(name) else {
            return Ok(());
        };
        match evicted.retire().await {
            Ok(written) => {
                self.cache.finish_draining(&evicted);
                tracing::debug!(chain = name, written, "settled evicted chain");
                Ok(())
            }
            Err(e) => {
                self.stats.persist_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(chain = name, error = %e, "evicted chain is still unflushed");
                Err(e)
            }
        }
    }

    /// Caches `chain`. Returns its handle and whatever it displaced, which
    /// the caller passes to [`Ledger::drain`] once the gate is released.
    fn admit(&self, chain: Chain) -> (SharedChain, Option<SharedChain>) {
        let name = chain.name().to_string();
        let shared = CachedChain::new(chain);
        match self.cache.put(Arc::clone(&shared)) {
            CachePut::Inserted { evicted } => (shared, evicted),
            // Unreachable while misses hold the name's gate.
            CachePut::AlreadyCached => (self.cache.get(&name).unwrap_or(shared), None),
        }
    }

    async fn drain(&self, evicted: Option<SharedChain>) {
        let Some(evicted) = evicted else {
            return;
        };
        self.stats.cache_evictions.fetch_add(1, Ordering::Relaxed);
        match evicted.retire().await {
            Ok(written) => {
                self.cache.finish_draining(&evicted);
                tracing::debug!(chain = %evicted.name(), written, "flushed evicted chain");
            }
            Err(e) => {
                self.stats.persist_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    chain = %evicted.name(),
                    error = %e,
                    "evicted chain could not be flushed, retrying on next access"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
