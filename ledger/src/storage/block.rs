//! # Block Structure
//!
//! A block is one entry of a chain: an opaque JSON object supplied by the
//! caller, a proof number, and the hash link that ties it to its
//! predecessor.
//!
//! ## Lifecycle
//!
//! ```text
//! Block::new ──► unsealed (hash = None, dirty)
//!                   │  seal(prev_hash)
//!                   ▼
//!                sealed (index, value, prev_hash, hash fixed)
//!                   │  persisted by the chain
//!                   ▼
//!                clean (dirty = false)
//! ```
//!
//! ## Hash Computation
//!
//! The hash is BLAKE3 over the canonical JSON encoding of
//! `index || value || proof || prev_hash || create_time`. `serde_json`'s
//! default map type keeps object keys sorted, so two values with the same
//! content always encode to the same bytes. `modify_time` and `dirty` are
//! bookkeeping and stay out of the hash.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::store::BlockDocument;
use crate::config::GENESIS_PURPOSE;
use crate::crypto::hash::blake3_hex;
use crate::error::{LedgerError, LedgerResult};

/// User payload of a block. Never interpreted by the ledger.
pub type BlockValue = serde_json::Map<String, serde_json::Value>;

/// Current wall-clock time at the precision the store keeps.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A ledger entry. Immutable once sealed, apart from `modify_time` and the
/// dirty flag.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    index: u64,
    value: BlockValue,
    proof: f64,
    hash: Option<String>,
    prev_hash: String,
    create_time: DateTime<Utc>,
    modify_time: DateTime<Utc>,
    dirty: bool,
}

/// Lightweight projection used in digests. Leaves out `value` so summaries
/// never carry payload data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub index: u64,
    pub proof: f64,
    pub prev_hash: String,
}

/// The exact field set that goes into a block hash.
#[derive(Serialize)]
struct HashPreimage<'a> {
    index: u64,
    value: &'a BlockValue,
    proof: f64,
    prev_hash: &'a str,
    create_time: i64,
}

impl Block {
    /// Creates an unsealed block. The chain assigns the final index on append.
    pub fn new(index: u64, value: BlockValue, proof: f64) -> Self {
        let ts = now();
        Self {
            index,
            value,
            proof,
            hash: None,
            prev_hash: String::new(),
            create_time: ts,
            modify_time: ts,
            dirty: true,
        }
    }

    /// The unsealed first block of every chain.
    pub fn genesis() -> Self {
        let mut value = BlockValue::new();
        value.insert(
            "purpose".to_string(),
            serde_json::Value::String(GENESIS_PURPOSE.to_string()),
        );
        Self::new(0, value, 0.0)
    }

    /// Fixes the predecessor link and computes the content hash.
    ///
    /// Sealing is a pure function of the block's fields: sealing an already
    /// sealed block against the same predecessor reproduces the same hash.
    /// Sealing it against a different predecessor is refused.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Encoding`] if the fields have no canonical encoding
    /// (a non-finite proof). [`LedgerError::Integrity`] on an attempt to
    /// relink a sealed block.
    pub fn seal(mut self, prev_hash: &str) -> LedgerResult<Self> {
        if self.hash.is_some() && self.prev_hash != prev_hash {
            return Err(LedgerError::Integrity(format!(
                "block {} is already sealed against {}",
                self.index, self.prev_hash
            )));
        }
        self.prev_hash = prev_hash.to_string();
        self.hash = Some(self.compute_hash()?);
        Ok(self)
    }

    /// Recomputes the content hash from the current fields.
    pub fn compute_hash(&self) -> LedgerResult<String> {
        let bytes = canonical_encoding(
            self.index,
            &self.value,
            self.proof,
            &self.prev_hash,
            &self.create_time,
        )?;
        Ok(blake3_hex(&bytes))
    }

    /// Checks that the stored hash matches the block's content.
    pub fn verify_hash(&self) -> LedgerResult<()> {
        let stored = self.hash.as_deref().ok_or_else(|| {
            LedgerError::Integrity(format!("block {} is not sealed", self.index))
        })?;
        let computed = self.compute_hash()?;
        if stored != computed {
            return Err(LedgerError::Integrity(format!(
                "block {} hash mismatch: stored={}, computed={}",
                self.index, stored, computed
            )));
        }
        Ok(())
    }

    /// Full projection for storage.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Integrity`] for an unsealed block, which has nothing
    /// to be keyed by.
    pub fn to_persistable(&self) -> LedgerResult<BlockDocument> {
        let hash = self.hash.clone().ok_or_else(|| {
            LedgerError::Integrity(format!("block {} is not sealed", self.index))
        })?;
        Ok(BlockDocument {
            index: self.index,
            value: self.value.clone(),
            proof: self.proof,
            hash,
            prev_hash: self.prev_hash.clone(),
            create_time: self.create_time,
            modify_time: self.modify_time,
        })
    }

    /// Reduced projection without the payload.
    pub fn to_metadata(&self) -> BlockMetadata {
        BlockMetadata {
            index: self.index,
            proof: self.proof,
            prev_hash: self.prev_hash.clone(),
        }
    }

    /// Rebuilds a block from its stored document. Restored blocks are clean.
    pub fn from_document(doc: BlockDocument) -> Self {
        Self {
            index: doc.index,
            value: doc.value,
            proof: doc.proof,
            hash: Some(doc.hash),
            prev_hash: doc.prev_hash,
            create_time: doc.create_time,
            modify_time: doc.modify_time,
            dirty: false,
        }
    }

    // -- Accessors -----------------------------------------------------------

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn value(&self) -> &BlockValue {
        &self.value
    }

    pub fn proof(&self) -> f64 {
        self.proof
    }

    /// The content hash, or `None` while the block is unsealed.
    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    pub fn prev_hash(&self) -> &str {
        &self.prev_hash
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn modify_time(&self) -> DateTime<Utc> {
        self.modify_time
    }

    pub fn is_sealed(&self) -> bool {
        self.hash.is_some()
    }

    /// True while the block has changes the store has not seen.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // -- Chain-internal mutation --------------------------------------------

    /// Positions an unsealed block. Sealed blocks keep their index.
    pub(crate) fn set_index(&mut self, index: u64) {
        if self.hash.is_none() {
            self.index = index;
        }
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Bumps `modify_time` and flags the block for re-persistence.
    pub(crate) fn touch(&mut self) {
        self.modify_time = now();
        self.dirty = true;
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = serde_json::Value::Object(self.value.clone());
        write!(f, "Block[{}]{}", self.index, value)
    }
}

// ---------------------------------------------------------------------------
// Canonical Encoding
// ---------------------------------------------------------------------------

fn canonical_encoding(
    index: u64,
    value: &BlockValue,
    proof: f64,
    prev_hash: &str,
    create_time: &DateTime<Utc>,
) -> LedgerResult<Vec<u8>> {
    // JSON has no spelling for NaN or infinity; serde_json would quietly write
    // `null` and two different proofs would hash alike.
    if !proof.is_finite() {
        return Err(LedgerError::Encoding(format!(
            "block {index}: proof {proof} has no canonical encoding"
        )));
    }
    let preimage = HashPreimage {
        index,
        value,
        proof,
        prev_hash,
        create_time: create_time.timestamp_micros(),
    };
    serde_json::to_vec(&preimage).map_err(|e| LedgerError::Encoding(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
