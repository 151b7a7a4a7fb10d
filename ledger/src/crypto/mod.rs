//! # Cryptographic Primitives
//!
//! The ledger only needs a content digest. BLAKE3 provides it; nothing here
//! signs or encrypts.

pub mod hash;

pub use hash::{blake3_hash, blake3_hex, genesis_sentinel, is_digest_hex};
