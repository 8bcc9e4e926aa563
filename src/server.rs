//! Sync API server.
//!
//! A stateless-per-request HTTP surface over the published manifest: every
//! handler loads the (mtime-cached) manifest, runs the strategy decision and
//! streams back the corresponding artifact. Shared mutable state is limited
//! to the manifest cache, the rate limiter and two metrics counters, all of
//! them explicitly synchronized.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness plus latest manifest coordinates |
//! | `GET` | `/metrics` | Request/error counters, uptime, tracked IPs |
//! | `GET` | `/sync/status` | Strategy hint and missed count for `?current` |
//! | `GET` | `/sync/patch` | Patch chain / compacted patch for `?from[&to][&expand]` |
//! | `GET` | `/sync/snapshot` | Snapshot pointer (or records) for `?version` |
//!
//! # Error contract
//!
//! Failures are flat JSON: `{"error": "<code>"}`. Codes: `rate_limited`
//! (429), `missing_from` (400), `patch_not_found`, `snapshot_not_found`,
//! `snapshot_file_missing`, `not_found` (404), `manifest_missing` (500).
//! A client too far behind for patching gets 409
//! `{"mode":"full_required","latestVersion":...}` pointing it at
//! `/sync/snapshot`.

use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::index::MANIFEST_FILE;
use crate::models::{Manifest, SyncPolicy, VersionEntry};
use crate::ratelimit::RateLimiter;
use crate::store::read_json;
use crate::strategy::{decide, Strategy};

/// Shared application state passed by reference into every handler.
pub struct AppState {
    data_root: PathBuf,
    limiter: RateLimiter,
    requests: AtomicU64,
    errors: AtomicU64,
    started: Instant,
    manifest_cache: Mutex<Option<(SystemTime, Arc<Manifest>)>>,
}

impl AppState {
    pub fn new(data_root: PathBuf, max_req_per_minute: u32) -> Self {
        Self {
            data_root,
            limiter: RateLimiter::per_minute(max_req_per_minute),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started: Instant::now(),
            manifest_cache: Mutex::new(None),
        }
    }

    /// Load the published manifest, reusing the cached parse while the file's
    /// modification time is unchanged.
    fn load_manifest(&self) -> Result<Arc<Manifest>, AppError> {
        let path = self.data_root.join(MANIFEST_FILE);
        let mtime = std::fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .map_err(|_| self.reject(StatusCode::INTERNAL_SERVER_ERROR, "manifest_missing"))?;

        let mut cache = self.manifest_cache.lock().expect("manifest cache poisoned");
        if let Some((cached_mtime, manifest)) = cache.as_ref() {
            if *cached_mtime == mtime {
                return Ok(Arc::clone(manifest));
            }
        }

        let manifest: Manifest = read_json(&path).map_err(|err| {
            tracing::error!("failed to load manifest: {err:#}");
            self.reject(StatusCode::INTERNAL_SERVER_ERROR, "manifest_missing")
        })?;
        let manifest = Arc::new(manifest);
        *cache = Some((mtime, Arc::clone(&manifest)));
        Ok(manifest)
    }

    /// Build an error response and count it in `/metrics`.
    fn reject(&self, status: StatusCode, code: &'static str) -> AppError {
        self.errors.fetch_add(1, Ordering::Relaxed);
        AppError { status, code }
    }
}

/// Machine-readable error response: `{"error": "<code>"}` with a status.
struct AppError {
    status: StatusCode,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.code }))).into_response()
    }
}

/// Counts the request and charges one rate-limit token before any manifest
/// access. Rejections are 429 and count as errors.
async fn rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    state.requests.fetch_add(1, Ordering::Relaxed);
    let key = addr.ip().to_string();
    if !state.limiter.allow(&key) {
        tracing::debug!(client = %key, "rate limited");
        return state
            .reject(StatusCode::TOO_MANY_REQUESTS, "rate_limited")
            .into_response();
    }
    next.run(request).await
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/sync/status", get(handle_status))
        .route("/sync/patch", get(handle_patch))
        .route("/sync/snapshot", get(handle_snapshot))
        .fallback(handle_fallback)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(cors)
        .with_state(state)
}

/// Start the sync API server on the configured bind address.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(
        config.data.root.clone(),
        config.server.max_req_per_minute,
    ));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        bind = %config.server.bind,
        data_root = %config.data.root.display(),
        "sync API listening"
    );
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    ok: bool,
    dataset: String,
    latest_version: String,
    generated_at: String,
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let manifest = state.load_manifest()?;
    Ok(Json(HealthResponse {
        ok: true,
        dataset: manifest.dataset.clone(),
        latest_version: manifest.latest_version.clone(),
        generated_at: manifest.generated_at.clone(),
    })
    .into_response())
}

// ============ GET /metrics ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsResponse {
    requests: u64,
    errors: u64,
    uptime_seconds: u64,
    tracked_ips: usize,
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        requests: state.requests.load(Ordering::Relaxed),
        errors: state.errors.load(Ordering::Relaxed),
        uptime_seconds: state.started.elapsed().as_secs(),
        tracked_ips: state.limiter.tracked(),
    })
}

// ============ GET /sync/status ============

#[derive(Deserialize)]
struct StatusParams {
    current: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    dataset: String,
    latest_version: String,
    latest_hash: String,
    current_version: Option<String>,
    needs_sync: bool,
    strategy_hint: Strategy,
    missed_count: usize,
    policy: SyncPolicy,
}

async fn handle_status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatusParams>,
) -> Result<Response, AppError> {
    let manifest = state.load_manifest()?;
    let (strategy_hint, missed_count) = decide(&manifest, params.current.as_deref());

    Ok(Json(StatusResponse {
        dataset: manifest.dataset.clone(),
        latest_version: manifest.latest_version.clone(),
        latest_hash: manifest.latest_hash.clone(),
        needs_sync: params.current.as_deref() != Some(manifest.latest_version.as_str()),
        current_version: params.current,
        strategy_hint,
        missed_count,
        policy: manifest.sync_policy.clone(),
    })
    .into_response())
}

// ============ GET /sync/patch ============

#[derive(Deserialize)]
struct PatchParams {
    from: Option<String>,
    to: Option<String>,
    expand: Option<String>,
}

async fn handle_patch(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PatchParams>,
) -> Result<Response, AppError> {
    let manifest = state.load_manifest()?;

    let from = match params.from.as_deref() {
        Some(from) if !from.is_empty() => from,
        _ => return Err(state.reject(StatusCode::BAD_REQUEST, "missing_from")),
    };
    let to = params
        .to
        .as_deref()
        .unwrap_or(manifest.latest_version.as_str());

    let (strategy, _) = decide(&manifest, Some(from));
    match strategy {
        Strategy::Full => {
            // Too far behind for patching; point the client at /sync/snapshot.
            return Ok((
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "mode": "full_required",
                    "latestVersion": manifest.latest_version,
                })),
            )
                .into_response());
        }
        Strategy::Noop => {
            return Ok(Json(serde_json::json!({
                "mode": "noop",
                "fromVersion": from,
                "toVersion": to,
            }))
            .into_response());
        }
        Strategy::Compacted => {
            // Serve the one-hop artifact when it exists; otherwise fall
            // through to the incremental chain.
            let entry = manifest
                .compacted_patches
                .iter()
                .find(|row| row.from_version == from && row.to_version == to);
            if let Some(entry) = entry {
                let path = state.data_root.join(&entry.path);
                if path.exists() {
                    let body: serde_json::Value = read_json(&path).map_err(|err| {
                        tracing::error!("failed to read compacted patch: {err:#}");
                        state.reject(StatusCode::NOT_FOUND, "patch_not_found")
                    })?;
                    return Ok(Json(body).into_response());
                }
            }
        }
        Strategy::Chain => {}
    }

    // Walk incremental patches starting just after `from`, up to and
    // including `to`.
    let mut chain_paths = Vec::new();
    let mut collecting = false;
    for entry in &manifest.versions {
        if entry.version == from {
            collecting = true;
            continue;
        }
        if collecting {
            if let Some(rel) = &entry.patch_from_previous {
                chain_paths.push(rel.clone());
            }
        }
        if entry.version == to {
            break;
        }
    }

    if chain_paths.is_empty() {
        return Err(state.reject(StatusCode::NOT_FOUND, "patch_not_found"));
    }

    let expand = params.expand.as_deref() == Some("1");
    if !expand {
        return Ok(Json(serde_json::json!({
            "mode": "chain",
            "fromVersion": from,
            "toVersion": to,
            "patches": chain_paths,
        }))
        .into_response());
    }

    let mut payloads = Vec::with_capacity(chain_paths.len());
    for rel in &chain_paths {
        let body: serde_json::Value = read_json(&state.data_root.join(rel)).map_err(|err| {
            tracing::error!("failed to read patch {rel}: {err:#}");
            state.reject(StatusCode::NOT_FOUND, "patch_not_found")
        })?;
        payloads.push(body);
    }

    Ok(Json(serde_json::json!({
        "mode": "chain",
        "fromVersion": from,
        "toVersion": to,
        "patches": payloads,
    }))
    .into_response())
}

// ============ GET /sync/snapshot ============

#[derive(Deserialize)]
struct SnapshotParams {
    version: Option<String>,
    #[serde(rename = "includeRecords")]
    include_records: Option<String>,
}

async fn handle_snapshot(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SnapshotParams>,
) -> Result<Response, AppError> {
    let manifest = state.load_manifest()?;
    let version = params
        .version
        .as_deref()
        .unwrap_or(manifest.latest_version.as_str());

    // A version the manifest has never heard of is a logical 404; a
    // referenced snapshot absent on disk is storage corruption and gets its
    // own code.
    let entry: &VersionEntry = manifest
        .versions
        .iter()
        .find(|row| row.version == version)
        .ok_or_else(|| state.reject(StatusCode::NOT_FOUND, "snapshot_not_found"))?;

    let snapshot_path = state.data_root.join(&entry.snapshot_path);
    if !snapshot_path.exists() {
        return Err(state.reject(StatusCode::NOT_FOUND, "snapshot_file_missing"));
    }

    let mut payload = serde_json::json!({
        "version": version,
        "snapshotPath": entry.snapshot_path,
        "snapshotHash": entry.snapshot_hash,
    });

    if params.include_records.as_deref() == Some("1") {
        let records: serde_json::Value = read_json(&snapshot_path).map_err(|err| {
            tracing::error!("failed to read snapshot {}: {err:#}", entry.snapshot_path);
            state.reject(StatusCode::NOT_FOUND, "snapshot_file_missing")
        })?;
        payload["records"] = records;
    }

    Ok(Json(payload).into_response())
}

async fn handle_fallback(State(state): State<Arc<AppState>>) -> AppError {
    state.reject(StatusCode::NOT_FOUND, "not_found")
}
