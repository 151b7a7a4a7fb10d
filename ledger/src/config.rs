//! # Ledger Configuration & Constants
//!
//! Every tunable of the ledger engine lives here: the cache bound, the store
//! call deadline, the defaults a chain gets when nobody names an owner, and
//! the genesis payload. Runtime knobs are grouped in [`LedgerConfig`]; the
//! node binary fills it from CLI flags and environment variables.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

/// Version of the on-store document layout. Bump when `ChainDocument` or
/// `BlockDocument` change shape.
pub const LEDGER_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Chain Defaults
// ---------------------------------------------------------------------------

/// Owner recorded for chains that are opened implicitly (first append to an
/// unknown chain) or registered without an owner.
pub const DEFAULT_CHAIN_OWNER: &str = "n0one";

/// The `purpose` field of every genesis block's value payload.
pub const GENESIS_PURPOSE: &str = "Genesis Block";

/// Input whose digest is the predecessor hash of every genesis block, and the
/// terminal hash reported by a chain that has no blocks at all.
pub const GENESIS_SENTINEL_INPUT: &[u8] = b"genesis";

/// Longest chain name accepted. Names double as store collection keys.
pub const MAX_CHAIN_NAME_LENGTH: usize = 128;

// ---------------------------------------------------------------------------
// Cache & Store
// ---------------------------------------------------------------------------

/// Upper bound on the number of chains held in memory at once.
pub const MAX_CACHED_CHAINS: usize = 25;

/// Deadline applied to every individual store adapter call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Network Defaults
// ---------------------------------------------------------------------------

/// Default HTTP API port.
pub const DEFAULT_API_PORT: u16 = 8000;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 8001;

// ---------------------------------------------------------------------------
// LedgerConfig
// ---------------------------------------------------------------------------

/// Runtime parameters of a [`crate::Ledger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Maximum number of chains kept in the chain cache.
    pub max_cached_chains: usize,
    /// Deadline for each store adapter call.
    pub store_timeout: Duration,
    /// Owner assigned to chains opened without an explicit owner.
    pub default_owner: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_cached_chains: MAX_CACHED_CHAINS,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            default_owner: DEFAULT_CHAIN_OWNER.to_string(),
        }
    }
}

impl LedgerConfig {
    /// Sets the cache capacity. Zero is raised to one.
    pub fn with_max_cached_chains(mut self, capacity: usize) -> Self {
        self.max_cached_chains = capacity.max(1);
        self
    }

    /// Sets the per-call store deadline.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Sets the owner used for implicitly opened chains.
    pub fn with_default_owner(mut self, owner: impl Into<String>) -> Self {
        self.default_owner = owner.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_constants() {
        let config = LedgerConfig::default();
        assert_eq!(config.max_cached_chains, 25);
        assert_eq!(config.store_timeout, DEFAULT_STORE_TIMEOUT);
        assert_eq!(config.default_owner, DEFAULT_CHAIN_OWNER);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let config = LedgerConfig::default().with_max_cached_chains(0);
        assert_eq!(config.max_cached_chains, 1);
    }

    #[test]
    fn ports_are_distinct() {
        assert_ne!(DEFAULT_API_PORT, DEFAULT_METRICS_PORT);
    }
}
