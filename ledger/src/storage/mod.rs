//! # Storage Module
//!
//! Blocks, chains and the persistence boundary underneath them.
//!
//! ```text
//! block.rs  — Block structure, genesis block, seal/verify, documents
//! chain.rs  — Hash-linked chain with dirty tracking, persist and restore
//! store.rs  — StoreAdapter trait, documents, per-call deadline
//! memory.rs — In-memory adapter with failure injection
//! db.rs     — sled adapter, one tree per chain collection
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! append → Block::seal → Chain (pending) → persist → StoreAdapter
//!                                                     ├─ SledStore
//!                                                     └─ MemoryStore
//! ```

pub mod block;
pub mod chain;
pub mod db;
pub mod memory;
pub mod store;

pub use block::{Block, BlockMetadata, BlockValue};
pub use chain::{Chain, ChainMetadata, ChainSummary};
pub use db::SledStore;
pub use memory::MemoryStore;
pub use store::{BlockDocument, ChainDocument, StoreAdapter, StoreError, StoreResult};
