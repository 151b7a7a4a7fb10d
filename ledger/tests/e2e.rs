//! End-to-end tests for the ledger engine.
//!
//! Each test drives the public [`Ledger`] API against a real backend: either
//! a sled database in a temporary directory or the in-memory store. They
//! check that chains survive restarts, that eviction never loses a persisted
//! block, and that tampering is caught on restore.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use zchain_ledger::storage::store::StoreAdapter;
use zchain_ledger::{
    FindBlockRequest, Ledger, LedgerConfig, LedgerError, MemoryStore, RegisterRequest, SledStore,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn config(capacity: usize) -> LedgerConfig {
    LedgerConfig::default()
        .with_max_cached_chains(capacity)
        .with_store_timeout(Duration::from_secs(2))
}

fn body(chain: &str, v: i64, proof: f64) -> serde_json::Value {
    json!({"chain": chain, "block_value": {"v": v}, "block_proof": proof})
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chain_survives_restart_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tip;
    {
        let store = Arc::new(SledStore::open(dir.path()).expect("open sled"));
        let ledger = Ledger::new(store, config(25));
        ledger
            .register_request(&RegisterRequest {
                chain_name: "t1".into(),
                chain_owner: Some("alice".into()),
            })
            .await
            .unwrap();
        for v in 1..=3 {
            let receipt = ledger.append_block(&body("t1", v, v as f64)).await.unwrap();
            assert!(receipt.persisted);
        }
        tip = ledger.summary("t1").await.unwrap().tip_hash;
    }

    let store = Arc::new(SledStore::open(dir.path()).expect("reopen sled"));
    let ledger = Ledger::new(store, config(25));
    let summary = ledger.verify("t1").await.unwrap();
    assert_eq!(summary.length, 4);
    assert_eq!(summary.owner, "alice");
    assert_eq!(summary.tip_hash, tip);

    let block = ledger
        .find_block(&FindBlockRequest {
            chain_name: "t1".into(),
            hash_value: tip,
            proof: 3.0,
        })
        .await
        .unwrap();
    assert_eq!(block.index(), 3);
    assert_eq!(block.value()["v"], json!(3));
}

#[tokio::test]
async fn many_chains_through_small_cache() {
    let store = Arc::new(SledStore::open_temporary().expect("temp sled"));
    let ledger = Ledger::new(store.clone(), config(3));

    for round in 0..3 {
        for c in 0..6 {
            ledger
                .append_block(&body(&format!("c{c}"), round, 0.0))
                .await
                .unwrap();
        }
    }

    assert!(ledger.cached_chains() <= 3);
    assert!(ledger.stats().cache_evictions > 0);
    for c in 0..6 {
        let name = format!("c{c}");
        let summary = ledger.verify(&name).await.unwrap();
        assert_eq!(summary.length, 4, "{name}");
        assert_eq!(store.block_count(&name).unwrap(), 4);
    }
}

#[tokio::test]
async fn tampered_block_is_detected_on_restore() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::new(store.clone(), config(25));
    for v in 1..=3 {
        ledger.append_block(&body("t1", v, 0.0)).await.unwrap();
    }

    let mut docs = store.find_blocks("t1").await.unwrap();
    let doc = &mut docs[2];
    doc.value.insert("v".into(), json!(1000));
    store.upsert_block("t1", &doc.hash, doc).await.unwrap();

    let restarted = Ledger::new(store.clone(), config(25));
    let err = restarted.lookup("t1").await.unwrap_err();
    assert!(matches!(err, LedgerError::Integrity(_)), "{err:?}");
}

#[tokio::test]
async fn flush_recovers_after_outage() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::new(store.clone(), config(25));
    ledger.register("t1", None).await.unwrap();

    store.set_offline(true);
    for v in 1..=2 {
        let receipt = ledger.append_block(&body("t1", v, 0.0)).await.unwrap();
        assert!(!receipt.persisted);
    }
    assert!(ledger.flush("t1").await.unwrap_err().is_retryable());

    store.set_offline(false);
    let report = ledger.flush_all().await;
    assert_eq!(report.blocks_written, 2);
    assert!(report.failed.is_empty());
    assert_eq!(store.block_count("t1"), 3);

    let restarted = Ledger::new(store.clone(), config(25));
    assert_eq!(restarted.verify("t1").await.unwrap().length, 3);
}

#[tokio::test]
async fn extreme_floats_survive_restart_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let proof = -1.603964615428183e+143;
    let tip;
    {
        let store = Arc::new(SledStore::open(dir.path()).expect("open sled"));
        let ledger = Ledger::new(store, config(25));
        let receipt = ledger
            .append_block(&json!({
                "chain": "t1",
                "block_value": {"x": 1.0715660391465826e-75},
                "block_proof": proof,
            }))
            .await
            .unwrap();
        assert!(receipt.persisted);
        tip = receipt.block.hash().expect("sealed").to_string();
    }

    let store = Arc::new(SledStore::open(dir.path()).expect("reopen sled"));
    let ledger = Ledger::new(store, config(25));
    let summary = ledger.verify("t1").await.unwrap();
    assert_eq!(summary.length, 2);
    assert_eq!(summary.tip_hash, tip);

    let block = ledger
        .find_block(&FindBlockRequest {
            chain_name: "t1".into(),
            hash_value: tip,
            proof,
        })
        .await
        .unwrap();
    assert_eq!(block.proof().to_bits(), proof.to_bits());
    assert_eq!(
        block.value()["x"].as_f64().map(f64::to_bits),
        Some(1.0715660391465826e-75_f64.to_bits())
    );
}
