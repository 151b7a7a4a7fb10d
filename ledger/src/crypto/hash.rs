//! # Hashing Utilities
//!
//! Every digest in the ledger is BLAKE3, rendered as lower-case hex when it
//! leaves this module. Block hashes, the genesis sentinel and store keys all
//! use the same representation so they can be compared as plain strings.

use crate::config::GENESIS_SENTINEL_INPUT;

/// Compute the BLAKE3 hash of the input data.
///
/// # Example
///
/// ```
/// use zchain_ledger::crypto::blake3_hash;
///
/// let hash = blake3_hash(b"zchain");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Compute the BLAKE3 hash of the input and return it as a 64-character hex
/// string.
pub fn blake3_hex(data: &[u8]) -> String {
    hex::encode(blake3_hash(data))
}

/// The digest of the literal string `"genesis"`.
///
/// Every genesis block is sealed against this value, and an empty chain
/// reports it as its terminal hash.
pub fn genesis_sentinel() -> String {
    blake3_hex(GENESIS_SENTINEL_INPUT)
}

/// Returns true if `s` looks like a digest produced by [`blake3_hex`].
pub fn is_digest_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
