//! # REST API
//!
//! Builds the axum router that exposes the ledger over HTTP. All endpoints
//! share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                      | Description                              |
//! |--------|---------------------------|------------------------------------------|
//! | GET    | `/`                       | Greeting with timestamp                  |
//! | GET    | `/health`                 | Liveness probe                           |
//! | GET    | `/v1/info`                | Status, uptime, cached chain digest      |
//! | GET    | `/v1/chain/:name`         | Chain summary                            |
//! | GET    | `/v1/chain/:name/verify`  | Full hash-chain verification             |
//! | GET    | `/v1/chain/:name/proof`   | Proof hint for the next block            |
//! | POST   | `/v1/chain/:name/flush`   | Persist pending blocks now               |
//! | POST   | `/v1/register_chain`      | Register a new chain                     |
//! | POST   | `/v1/block`               | Append a block                           |
//! | POST   | `/v1/block/find`          | Find a block by hash and proof           |
//!
//! Failures are answered as `{"result": "Failure", "reason": ...}` with the
//! status code chosen by [`ApiError`].

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use zchain_ledger::{Block, FindBlockRequest, Ledger, LedgerError, RegisterRequest};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything sits behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub metrics: SharedMetrics,
    pub started_at: Instant,
    /// Reported version string.
    pub version: String,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/v1/info", get(info_handler))
        .route("/v1/chain/:name", get(chain_handler))
        .route("/v1/chain/:name/verify", get(verify_handler))
        .route("/v1/chain/:name/proof", get(proof_handler))
        .route("/v1/chain/:name/flush", post(flush_handler))
        .route("/v1/register_chain", post(register_handler))
        .route("/v1/block", post(append_handler))
        .route("/v1/block/find", post(find_block_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A [`LedgerError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::Conflict(_) => StatusCode::CONFLICT,
            LedgerError::Validation(_) | LedgerError::NilBlock => StatusCode::BAD_REQUEST,
            LedgerError::Encoding(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::Integrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self.0 {
            LedgerError::NotFound(_) => tracing::debug!(error = %self.0, "not found"),
            LedgerError::Integrity(_) => tracing::error!(error = %self.0, "integrity violation"),
            e if e.is_retryable() => tracing::warn!(error = %e, "store unavailable"),
            _ => {}
        }
        (
            status,
            Json(json!({ "result": "Failure", "reason": self.0.to_string() })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Parses a request body. An empty body is a JSON null.
fn parse_body(body: &Bytes) -> Result<Value, LedgerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| LedgerError::Validation(format!("invalid JSON: {e}")))
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// JSON view of a sealed block.
#[derive(Debug, Serialize)]
pub struct BlockView {
    pub index: u64,
    pub value: serde_json::Map<String, Value>,
    pub proof: f64,
    pub hash: Option<String>,
    pub prev_hash: String,
    pub create_time: DateTime<Utc>,
    pub modify_time: DateTime<Utc>,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        Self {
            index: block.index(),
            value: block.value().clone(),
            proof: block.proof(),
            hash: block.hash().map(str::to_string),
            prev_hash: block.prev_hash().to_string(),
            create_time: block.create_time(),
            modify_time: block.modify_time(),
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /` — greeting, mostly to confirm the service is up from a browser.
async fn index_handler() -> impl IntoResponse {
    Json(json!({
        "status": 200,
        "response": "ZChain ledger API",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// `GET /health` — returns 200 if the process is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// `GET /v1/info` — uptime and a digest of the cached chains.
async fn info_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.ledger.stats();
    state.metrics.sync(stats);
    Json(json!({
        "status": "Running",
        "version": state.version,
        "uptime": state.started_at.elapsed().as_secs_f64(),
        "cache": state.ledger.digest(),
        "cache_capacity": state.ledger.cache_capacity(),
        "stats": stats,
    }))
}

async fn chain_handler(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let summary = state.ledger.summary(&name).await?;
    Ok(Json(json!({ "result": "Success", "chain": summary })))
}

async fn verify_handler(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let summary = state.ledger.verify(&name).await?;
    Ok(Json(json!({ "result": "Success", "verified": true, "chain": summary })))
}

async fn proof_handler(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let hint = state.ledger.proof_hint(&name).await?;
    Ok(Json(json!({ "result": "Success", "hint": hint })))
}

async fn flush_handler(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let written = state.ledger.flush(&name).await?;
    Ok(Json(json!({ "result": "Success", "written": written })))
}

/// `POST /v1/register_chain` — `{chain_name, chain_owner?}`.
async fn register_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let req = RegisterRequest::from_json(&parse_body(&body)?)?;
    let chain = state.ledger.register_request(&req).await?;
    let summary = chain.lock().await.summary();
    Ok((
        StatusCode::CREATED,
        Json(json!({ "result": "Success", "chain": summary })),
    ))
}

/// `POST /v1/block` — `{chain, block_value, block_proof}`.
///
/// 201 when the block was persisted, 202 when it was appended but the write
/// is still pending.
async fn append_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let started = Instant::now();
    let receipt = state.ledger.append_block(&parse_body(&body)?).await?;
    state
        .metrics
        .append_latency_seconds
        .observe(started.elapsed().as_secs_f64());

    let block = BlockView::from(&receipt.block);
    if receipt.persisted {
        Ok((
            StatusCode::CREATED,
            Json(json!({ "result": "Success", "created": block })),
        ))
    } else {
        Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "result": "Accepted",
                "created": block,
                "reason": receipt.persist_error,
            })),
        ))
    }
}

/// `POST /v1/block/find` — `{chain_name, hash_value, proof}`.
async fn find_block_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let req = FindBlockRequest::from_json(&parse_body(&body)?)?;
    let block = state.ledger.find_block(&req).await?;
    Ok(Json(json!({ "result": "Success", "block": BlockView::from(&block) })))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use zchain_ledger::{LedgerConfig, MemoryStore, SledStore};

    /// Creates a test AppState backed by the in-memory store.
    fn test_app_state() -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new(store.clone(), LedgerConfig::default()));
        let metrics = Arc::new(crate::metrics::LedgerMetrics::new().expect("metrics"));
        let state = AppState {
            ledger,
            metrics,
            started_at: Instant::now(),
            version: "0.1.0-test".into(),
        };
        (state, store)
    }

    /// Sends a GET request and returns the (status, body_json).
    async fn get(router: &Router, path: &str) -> (StatusCode, Value) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        send(router, req).await
    }

    /// Sends a POST request with a raw body and returns (status, body_json).
    async fn post_raw(router: &Router, path: &str, body: Vec<u8>) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        send(router, req).await
    }

    async fn post_json(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
        post_raw(router, path, serde_json::to_vec(&body).unwrap()).await
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    // -- Liveness -------------------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let (status, json) = get(&router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn index_has_timestamp() {
        let (state, _) = test_app_state();
        let (status, json) = get(&create_router(state), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn info_lists_cached_chains() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        post_json(&router, "/v1/register_chain", json!({"chain_name": "t1", "chain_owner": "alice"}))
            .await;

        let (status, json) = get(&router, "/v1/info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "Running");
        assert_eq!(json["cache"], json!([{"name": "t1", "owner": "alice"}]));
        assert_eq!(json["cache_capacity"], 25);
        assert_eq!(json["stats"]["chains_registered"], 1);
    }

    // -- Register ---------------------------------------------------------------

    #[tokio::test]
    async fn register_then_conflict() {
        let (state, _) = test_app_state();
        let router = create_router(state);

        let (status, json) =
            post_json(&router, "/v1/register_chain", json!({"chain_name": "t1"})).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["chain"]["length"], 1);
        assert_eq!(json["chain"]["owner"], "n0one");

        let (status, json) =
            post_json(&router, "/v1/register_chain", json!({"chain_name": "t1"})).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["result"], "Failure");
    }

    #[tokio::test]
    async fn register_with_store_down_is_503() {
        let (state, store) = test_app_state();
        store.set_offline(true);
        let (status, _) = post_json(
            &create_router(state),
            "/v1/register_chain",
            json!({"chain_name": "t1"}),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    // -- Append -----------------------------------------------------------------

    #[tokio::test]
    async fn append_and_find_block() {
        let (state, _) = test_app_state();
        let router = create_router(state);

        let mut hashes = Vec::new();
        for v in 1..=3 {
            let (status, json) = post_json(
                &router,
                "/v1/block",
                json!({"chain": "t1", "block_value": {"v": v}, "block_proof": 1.5}),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(json["created"]["index"], v);
            hashes.push(json["created"]["hash"].as_str().unwrap().to_string());
        }

        let (status, json) = post_json(
            &router,
            "/v1/block/find",
            json!({"chain_name": "t1", "hash_value": hashes[1], "proof": 1.5}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["block"]["value"]["v"], 2);
        assert_eq!(json["block"]["prev_hash"], hashes[0]);

        let (status, _) = post_json(
            &router,
            "/v1/block/find",
            json!({"chain_name": "t1", "hash_value": hashes[1], "proof": 9}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = post_json(
            &router,
            "/v1/block/find",
            json!({"chain_name": "t1", "hash_value": "not-a-digest", "proof": 1.5}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn append_with_store_down_is_accepted() {
        let (state, store) = test_app_state();
        let router = create_router(state);
        post_json(&router, "/v1/register_chain", json!({"chain_name": "t1"})).await;

        store.set_offline(true);
        let (status, json) = post_json(
            &router,
            "/v1/block",
            json!({"chain": "t1", "block_value": {"v": 1}, "block_proof": 0}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["result"], "Accepted");

        store.set_offline(false);
        let (status, json) = post_raw(&router, "/v1/chain/t1/flush", Vec::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["written"], 1);
    }

    #[tokio::test]
    async fn empty_or_null_body_is_nil_block() {
        let (state, _) = test_app_state();
        let router = create_router(state);

        let (status, json) = post_raw(&router, "/v1/block", Vec::new()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["reason"].as_str().unwrap().contains("nil block"));

        let (status, _) = post_json(
            &router,
            "/v1/block",
            json!({"chain": "t1", "block_value": null, "block_proof": 0}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn mistyped_fields_are_rejected() {
        let (state, _) = test_app_state();
        let router = create_router(state.clone());

        let (status, json) = post_json(
            &router,
            "/v1/block",
            json!({"chain": "t1", "block_value": [1, 2], "block_proof": 0}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["result"], "Failure");

        let (status, _) = post_raw(&router, "/v1/block", b"{not json".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.ledger.cached_chains(), 0);
    }

    // -- Chain inspection -------------------------------------------------------

    #[tokio::test]
    async fn unknown_chain_is_404_and_not_created() {
        let (state, _) = test_app_state();
        let router = create_router(state.clone());
        let (status, json) = get(&router, "/v1/chain/ghost").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["result"], "Failure");
        assert_eq!(state.ledger.cached_chains(), 0);
    }

    #[tokio::test]
    async fn verify_and_proof_endpoints() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        post_json(&router, "/v1/register_chain", json!({"chain_name": "t1"})).await;

        let (status, json) = get(&router, "/v1/chain/t1/verify").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["verified"], true);

        let (status, json) = get(&router, "/v1/chain/t1/proof").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["hint"]["proof"], 0.0);
        assert_eq!(json["hint"]["strategy"], "trivial");
    }

    #[tokio::test]
    async fn chain_summary_from_sled_store() {
        let store = Arc::new(SledStore::open_temporary().expect("temp sled"));
        let ledger = Arc::new(Ledger::new(store, LedgerConfig::default()));
        let state = AppState {
            ledger,
            metrics: Arc::new(crate::metrics::LedgerMetrics::new().unwrap()),
            started_at: Instant::now(),
            version: "test".into(),
        };
        let router = create_router(state);
        post_json(
            &router,
            "/v1/block",
            json!({"chain": "disk", "block_value": {"k": "v"}, "block_proof": 0}),
        )
        .await;

        let (status, json) = get(&router, "/v1/chain/disk").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["chain"]["length"], 2);
        assert_eq!(json["chain"]["pending_writes"], 0);
    }

    #[test]
    fn error_status_mapping() {
        let cases = [
            (LedgerError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (LedgerError::Conflict("x".into()), StatusCode::CONFLICT),
            (LedgerError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (LedgerError::NilBlock, StatusCode::BAD_REQUEST),
            (LedgerError::Encoding("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (LedgerError::StoreUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (LedgerError::Integrity("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
