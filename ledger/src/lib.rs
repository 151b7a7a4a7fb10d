// Copyright (c) 2026 ZChain Contributors. MIT License.
// See LICENSE for details.

//! # ZChain Ledger — Core Library
//!
//! An append-only, hash-linked ledger. Records ("blocks") are grouped into
//! named chains; each chain is persisted through a store adapter and kept in
//! a bounded in-memory cache.
//!
//! ## Architecture
//!
//! - **storage** — Blocks, chains, the store adapter trait and its sled and
//!   in-memory backends.
//! - **cache** — The bounded chain cache and per-chain locking.
//! - **ledger** — The service object: lookup, register, append, find.
//! - **request** — Validation of untyped request bodies.
//! - **proof** — Proof strategy extension point.
//! - **crypto** — BLAKE3 digests.
//! - **config** — Constants and [`LedgerConfig`].
//!
//! ## Guarantees
//!
//! 1. Every chain starts with a genesis block and every block links to its
//!    predecessor's hash.
//! 2. A block is written at most once per change; a failed write is retried
//!    on the next persist.
//! 3. An unreachable store is an error, never a reason to start over.

pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod proof;
pub mod request;
pub mod storage;

pub use cache::{AppendReceipt, CachedChain, ChainCache, SharedChain};
pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult};
pub use ledger::{FlushReport, Ledger, ProofHint, StatsSnapshot};
pub use proof::{ProofStrategy, TrivialProof};
pub use request::{AppendRequest, FindBlockRequest, RegisterRequest};
pub use storage::{Block, Chain, MemoryStore, SledStore, StoreAdapter};
