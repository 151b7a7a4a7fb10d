// Copyright (c) 2026 ZChain Contributors. MIT License.
// See LICENSE for details.

//! # ZChain Node
//!
//! Entry point for the `zchain-node` binary. Parses CLI arguments,
//! initializes logging and metrics, and serves the ledger HTTP API.
//!
//! The binary supports three subcommands:
//!
//! - `run`     — start the API and metrics servers
//! - `verify`  — verify one stored chain offline
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;

use zchain_ledger::{Ledger, LedgerConfig, MemoryStore, SledStore, StoreAdapter};

use cli::{Commands, StoreKind, ZChainCli};
use logging::{LogFormat, DEFAULT_DIRECTIVES};
use metrics::{LedgerMetrics, MetricsState};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ZChainCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Verify(args) => verify_chain(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn open_sled(data_dir: &std::path::Path) -> Result<SledStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    SledStore::open(data_dir)
        .with_context(|| format!("failed to open database at {}", data_dir.display()))
}

/// Starts the API and metrics servers and runs until SIGINT or SIGTERM.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(DEFAULT_DIRECTIVES, args.log_format);

    tracing::info!(
        port = args.port,
        metrics_port = args.metrics_port,
        store = ?args.store,
        data_dir = %args.data_dir.display(),
        max_cached_chains = args.max_cached_chains,
        "starting zchain-node"
    );

    // --- Store ---
    let store: Arc<dyn StoreAdapter> = match args.store {
        StoreKind::Sled => {
            let store = open_sled(&args.data_dir)?;
            tracing::info!(path = %args.data_dir.display(), "database opened");
            Arc::new(store)
        }
        StoreKind::Memory => {
            tracing::warn!("using in-memory store, nothing survives a restart");
            Arc::new(MemoryStore::new())
        }
    };

    // --- Ledger & metrics ---
    let ledger = Arc::new(Ledger::new(store, args.ledger_config()));
    let ledger_metrics = Arc::new(LedgerMetrics::new().context("failed to create metrics")?);

    let app_state = api::AppState {
        ledger: Arc::clone(&ledger),
        metrics: Arc::clone(&ledger_metrics),
        started_at: Instant::now(),
        version: format!(
            "{} (ledger {})",
            env!("CARGO_PKG_VERSION"),
            zchain_ledger::config::LEDGER_VERSION,
        ),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(MetricsState {
            metrics: Arc::clone(&ledger_metrics),
            ledger: Arc::clone(&ledger),
        });
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, flushing cached chains");
        }
    }

    let report = ledger.flush_all().await;
    if report.failed.is_empty() {
        tracing::info!(
            chains = report.chains,
            blocks = report.blocks_written,
            "all cached chains flushed"
        );
    } else {
        tracing::error!(failed = ?report.failed, "some chains could not be flushed");
    }

    tracing::info!("zchain-node stopped");
    Ok(())
}

/// Restores one chain from the data directory and checks every link.
async fn verify_chain(args: cli::VerifyArgs) -> Result<()> {
    logging::init_logging("zchain_node=warn,zchain_ledger=warn", LogFormat::Pretty);

    let store = Arc::new(open_sled(&args.data_dir)?);
    let ledger = Ledger::new(store, LedgerConfig::default().with_max_cached_chains(1));

    let summary = ledger
        .verify(&args.chain)
        .await
        .with_context(|| format!("chain {} failed verification", args.chain))?;

    println!("Chain verified.");
    println!("  Name    : {}", summary.name);
    println!("  Owner   : {}", summary.owner);
    println!("  Blocks  : {}", summary.length);
    println!("  Tip     : {}", summary.tip_hash);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("zchain-node {}", env!("CARGO_PKG_VERSION"));
    println!("ledger      {}", zchain_ledger::config::LEDGER_VERSION);
    println!("rustc       {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
