//! # Chain
//!
//! An ordered, hash-linked sequence of blocks under one name, together with
//! the protocol that keeps it in step with the store.
//!
//! ## Invariants
//!
//! - `blocks[0]` is the genesis block, sealed against [`genesis_sentinel`].
//! - `blocks[i].prev_hash == blocks[i - 1].hash` for every `i > 0`.
//! - `blocks[i].index == i`.
//! - [`Chain::append`] is the only way a chain grows.
//!
//! ## Persistence
//!
//! Appended blocks are queued in `pending`. [`Chain::persist`] drains the
//! queue front to back and clears a block's dirty flag only after its write
//! succeeds, so a failed persist leaves exactly the unwritten blocks queued.
//! The metadata document is rewritten only when it changed.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::block::{now, Block};
use super::store::{bounded, ChainDocument, StoreAdapter};
use crate::crypto::hash::genesis_sentinel;
use crate::error::{LedgerError, LedgerResult};

/// `{name, owner}` digest used by cache listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub name: String,
    pub owner: String,
}

/// Read-only view of a chain for API responses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainSummary {
    pub name: String,
    pub owner: String,
    pub length: usize,
    pub tip_hash: String,
    pub pending_writes: usize,
    pub create_time: DateTime<Utc>,
    pub modify_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// One named ledger and its persistence state.
pub struct Chain {
    name: String,
    owner: String,
    blocks: Vec<Block>,
    create_time: DateTime<Utc>,
    modify_time: DateTime<Utc>,
    /// Positions of blocks awaiting their first or retried write, in order.
    pending: VecDeque<usize>,
    metadata_dirty: bool,
    collection_ready: bool,
    store: Arc<dyn StoreAdapter>,
    store_timeout: Duration,
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("length", &self.blocks.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Chain {
    fn empty(
        name: &str,
        owner: &str,
        store: Arc<dyn StoreAdapter>,
        store_timeout: Duration,
    ) -> Self {
        let ts = now();
        Self {
            name: name.to_string(),
            owner: owner.to_string(),
            blocks: Vec::new(),
            create_time: ts,
            modify_time: ts,
            pending: VecDeque::new(),
            metadata_dirty: true,
            collection_ready: false,
            store,
            store_timeout,
        }
    }

    /// Constructs a fresh chain holding only its genesis block. Nothing is
    /// written until the first [`Chain::persist`].
    pub fn new(
        name: &str,
        owner: &str,
        store: Arc<dyn StoreAdapter>,
        store_timeout: Duration,
    ) -> LedgerResult<Self> {
        let mut chain = Self::empty(name, owner, store, store_timeout);
        chain.append(Block::genesis())?;
        Ok(chain)
    }

    /// Restores `name` from the store, or constructs a fresh chain if the
    /// store has never seen it.
    ///
    /// # Errors
    ///
    /// [`LedgerError::StoreUnavailable`] when the store cannot be reached.
    /// This never falls back to a fresh chain, which would shadow stored data.
    /// [`LedgerError::Integrity`] when the stored chain does not verify.
    pub async fn open(
        name: &str,
        owner: &str,
        store: Arc<dyn StoreAdapter>,
        store_timeout: Duration,
    ) -> LedgerResult<Self> {
        match Self::open_existing(name, Arc::clone(&store), store_timeout).await? {
            Some(chain) => Ok(chain),
            None => {
                tracing::debug!(chain = name, "no stored chain, constructing genesis");
                Self::new(name, owner, store, store_timeout)
            }
        }
    }

    /// Restores `name` from the store. `Ok(None)` means the chain was never
    /// persisted.
    pub async fn open_existing(
        name: &str,
        store: Arc<dyn StoreAdapter>,
        store_timeout: Duration,
    ) -> LedgerResult<Option<Self>> {
        let mut chain = Self::empty(name, "", store, store_timeout);
        if chain.restore().await? {
            Ok(Some(chain))
        } else {
            Ok(None)
        }
    }

    /// Loads this chain's metadata and blocks from the store.
    ///
    /// Returns `Ok(false)` if no metadata exists. On success every block is
    /// clean and the chain has been verified.
    pub async fn restore(&mut self) -> LedgerResult<bool> {
        let store = Arc::clone(&self.store);
        let deadline = self.store_timeout;

        let meta = bounded(
            deadline,
            "find_chain_metadata",
            store.find_chain_metadata(&self.name),
        )
        .await?;
        let Some(meta) = meta else {
            return Ok(false);
        };

        let docs = bounded(deadline, "find_blocks", store.find_blocks(&self.name)).await?;
        let blocks: Vec<Block> = docs.into_iter().map(Block::from_document).collect();

        self.owner = meta.owner;
        self.create_time = meta.create_time;
        self.modify_time = meta.modify_time;
        self.pending.clear();
        self.metadata_dirty = false;
        self.collection_ready = true;

        if blocks.is_empty() {
            // Metadata landed but the first block write never did. No block
            // was ever durable, so the chain starts again from genesis.
            tracing::warn!(chain = %self.name, "stored chain has no blocks, re-creating genesis");
            self.blocks.clear();
            self.append(Block::genesis())?;
            return Ok(true);
        }

        verify_blocks(&blocks)
            .map_err(|e| LedgerError::Integrity(format!("chain {}: {}", self.name, e)))?;
        self.blocks = blocks;

        tracing::debug!(chain = %self.name, length = self.blocks.len(), "chain restored");
        Ok(true)
    }

    /// The hash of the last block, or the genesis sentinel for an empty chain.
    pub fn current_hash(&self) -> String {
        self.blocks
            .last()
            .and_then(|b| b.hash())
            .map(str::to_string)
            .unwrap_or_else(genesis_sentinel)
    }

    /// Seals `block` onto the end of the chain and queues it for persistence.
    ///
    /// The block's index is overwritten with its position. On error the chain
    /// is unchanged and the block is dropped.
    pub fn append(&mut self, block: Block) -> LedgerResult<&Block> {
        if block.is_sealed() {
            return Err(LedgerError::Validation(format!(
                "block {} is already sealed",
                block.index()
            )));
        }

        let position = self.blocks.len();
        let mut block = block;
        block.set_index(position as u64);
        let sealed = block.seal(&self.current_hash())?;

        self.blocks.push(sealed);
        self.pending.push_back(position);
        self.modify_time = now();
        self.metadata_dirty = true;

        Ok(&self.blocks[position])
    }

    /// Writes pending state to the store and returns the number of blocks
    /// written.
    ///
    /// Order: collection (first write only), metadata (when changed), then
    /// pending blocks front to back. Every write is an upsert, so re-running
    /// after a partial failure is safe.
    pub async fn persist(&mut self) -> LedgerResult<usize> {
        if self.pending.is_empty() && !self.metadata_dirty {
            return Ok(0);
        }

        let store = Arc::clone(&self.store);
        let deadline = self.store_timeout;

        if !self.collection_ready {
            bounded(deadline, "create_collection", store.create_collection(&self.name)).await?;
            self.collection_ready = true;
            tracing::debug!(chain = %self.name, "created block collection");
        }

        if self.metadata_dirty {
            let doc = self.to_document();
            bounded(
                deadline,
                "upsert_chain_metadata",
                store.upsert_chain_metadata(&self.name, &doc),
            )
            .await?;
            self.metadata_dirty = false;
        }

        let mut written = 0;
        while let Some(&position) = self.pending.front() {
            let doc = self.blocks[position].to_persistable()?;
            bounded(
                deadline,
                "upsert_block",
                store.upsert_block(&self.name, &doc.hash, &doc),
            )
            .await?;
            self.blocks[position].mark_clean();
            self.pending.pop_front();
            written += 1;
        }

        if written > 0 {
            tracing::debug!(chain = %self.name, written, "persisted blocks");
        }
        Ok(written)
    }

    /// Marks a block for re-persistence without changing its hashed fields.
    pub fn touch_block(&mut self, index: u64) -> LedgerResult<()> {
        let position = usize::try_from(index)
            .ok()
            .filter(|p| *p < self.blocks.len())
            .ok_or_else(|| {
                LedgerError::NotFound(format!("block {index} in chain {}", self.name))
            })?;
        self.blocks[position].touch();
        if !self.pending.contains(&position) {
            self.pending.push_back(position);
        }
        Ok(())
    }

    /// Walks the whole chain and checks every hash and link.
    pub fn verify(&self) -> LedgerResult<()> {
        verify_blocks(&self.blocks)
            .map_err(|e| LedgerError::Integrity(format!("chain {}: {}", self.name, e)))
    }

    /// Finds the block with the given hash and proof.
    pub fn find_block(&self, hash: &str, proof: f64) -> Option<&Block> {
        self.blocks
            .iter()
            .find(|b| b.hash() == Some(hash) && b.proof() == proof)
    }

    /// `{name, owner}` digest.
    pub fn metadata(&self) -> ChainMetadata {
        ChainMetadata {
            name: self.name.clone(),
            owner: self.owner.clone(),
        }
    }

    pub fn summary(&self) -> ChainSummary {
        ChainSummary {
            name: self.name.clone(),
            owner: self.owner.clone(),
            length: self.blocks.len(),
            tip_hash: self.current_hash(),
            pending_writes: self.pending.len(),
            create_time: self.create_time,
            modify_time: self.modify_time,
        }
    }

    /// Human-readable one-liner. Not used for hashing or storage.
    pub fn render(&self) -> String {
        let tip = self.current_hash();
        format!(
            "Chain[{}] owner={} blocks={} tip={} pending={}",
            self.name,
            self.owner,
            self.blocks.len(),
            &tip[..tip.len().min(12)],
            self.pending.len()
        )
    }

    fn to_document(&self) -> ChainDocument {
        ChainDocument {
            name: self.name.clone(),
            owner: self.owner.clone(),
            create_time: self.create_time,
            modify_time: self.modify_time,
        }
    }

    // -- Accessors -----------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Number of blocks, genesis included.
    pub fn size(&self) -> usize {
        self.blocks.len()
    }

    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn modify_time(&self) -> DateTime<Utc> {
        self.modify_time
    }

    /// Number of blocks waiting to be written.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// True when the store holds everything this chain knows.
    pub fn is_clean(&self) -> bool {
        self.pending.is_empty() && !self.metadata_dirty
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

fn verify_blocks(blocks: &[Block]) -> Result<(), String> {
    if blocks.is_empty() {
        return Err("no genesis block".to_string());
    }

    let mut expected_prev = genesis_sentinel();
    for (position, block) in blocks.iter().enumerate() {
        if block.index() != position as u64 {
            return Err(format!(
                "block at position {position} has index {}",
                block.index()
            ));
        }
        block.verify_hash().map_err(|e| e.to_string())?;
        if block.prev_hash() != expected_prev {
            return Err(format!(
                "block {position} links to {}, expected {}",
                block.prev_hash(),
                expected_prev
            ));
        }
        // verify_hash succeeded, so the hash is present.
        expected_prev = block.hash().unwrap_or_default().to_string();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
