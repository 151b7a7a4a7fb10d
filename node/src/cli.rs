//! # CLI Interface
//!
//! Defines the command-line argument structure for `zchain-node` using
//! `clap` derive. Supports three subcommands: `run`, `verify` and `version`.
//! Every `run` flag has an environment-variable fallback.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use zchain_ledger::config::{
    DEFAULT_API_PORT, DEFAULT_CHAIN_OWNER, DEFAULT_METRICS_PORT, MAX_CACHED_CHAINS,
};
use zchain_ledger::LedgerConfig;

use crate::logging::LogFormat;

/// ZChain ledger node.
///
/// Serves the ledger HTTP API over a sled-backed (or in-memory) store and
/// exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "zchain-node",
    about = "ZChain ledger node",
    version,
    propagate_version = true
)]
pub struct ZChainCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the API and metrics servers.
    Run(RunArgs),
    /// Verify a stored chain offline and exit.
    Verify(VerifyArgs),
    /// Print version information and exit.
    Version,
}

/// Backend behind the store adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// sled database in the data directory.
    Sled,
    /// Volatile in-process store. Everything is lost on exit.
    Memory,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the sled database. Created on first run.
    #[arg(long, short = 'd', env = "ZCHAIN_DATA_DIR", default_value = "./zchain-data")]
    pub data_dir: PathBuf,

    /// Port for the HTTP API.
    #[arg(long, env = "ZCHAIN_PORT", default_value_t = DEFAULT_API_PORT)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "ZCHAIN_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Store backend.
    #[arg(long, env = "ZCHAIN_STORE", value_enum, default_value_t = StoreKind::Sled)]
    pub store: StoreKind,

    /// Maximum number of chains kept in memory.
    #[arg(long, env = "ZCHAIN_MAX_CACHED_CHAINS", default_value_t = MAX_CACHED_CHAINS)]
    pub max_cached_chains: usize,

    /// Deadline for each store call, in milliseconds.
    #[arg(long, env = "ZCHAIN_STORE_TIMEOUT_MS", default_value_t = 5000)]
    pub store_timeout_ms: u64,

    /// Owner recorded for chains created without one.
    #[arg(long, env = "ZCHAIN_DEFAULT_OWNER", default_value = DEFAULT_CHAIN_OWNER)]
    pub default_owner: String,

    /// Log output format.
    #[arg(long, env = "ZCHAIN_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl RunArgs {
    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig::default()
            .with_max_cached_chains(self.max_cached_chains)
            .with_store_timeout(Duration::from_millis(self.store_timeout_ms))
            .with_default_owner(self.default_owner.clone())
    }
}

/// Arguments for the `verify` subcommand.
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Name of the chain to verify.
    #[arg(long)]
    pub chain: String,

    /// Directory holding the sled database.
    #[arg(long, short = 'd', env = "ZCHAIN_DATA_DIR", default_value = "./zchain-data")]
    pub data_dir: PathBuf,
}
