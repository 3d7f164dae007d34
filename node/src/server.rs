// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, Request as AxumRequest, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use timevault_kernel::{reconstruct_from_stub, AnchorRecord, IntentRequest, NodeIdentity, Stub};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::{
    ApplyIntentResponse, BalanceResponse, BalancesResponse, CapabilityResponse, NodeInfoResponse, ReinforceResponse,
    SearchParams,
};
use crate::config::NodeConfig;
use crate::decay::{DecayEngine, SweepReport};
use crate::errors::EngineError;
use crate::hub::{self, Hub};
use crate::ledger::{self, Equilibrium, Ledger, LedgerError, SharedLedger};
use crate::store::{RecordStore, StoredRecord};

#[derive(Clone)]
pub struct AppState {
    pub ledger: SharedLedger,
    pub store: Arc<RecordStore>,
    pub decay: Arc<DecayEngine>,
    pub hub: Arc<Hub>,
    pub identity: Arc<NodeIdentity>,
}

impl AppState {
    /// Open the vault, replay the ledger and wire up the decay engine and hub.
    pub fn bootstrap(cfg: &NodeConfig, identity: NodeIdentity) -> Result<Self, EngineError> {
        let identity = Arc::new(identity);
        let store = Arc::new(RecordStore::open(&cfg.vault_dir, cfg.signatures)?);
        let ledger = Ledger::open(cfg, identity.clone(), store.clone())?.into_shared();
        let decay = Arc::new(DecayEngine::new(store.clone(), cfg.decay_policy));
        let hub = Arc::new(Hub::new(cfg.hub.clone(), identity.node_id()));

        Ok(Self { ledger, store, decay, hub, identity })
    }
}

async fn auth_guard(
    State(token): State<Arc<String>>,
    req: AxumRequest,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.strip_prefix("Bearer "));

    match provided {
        Some(provided) if provided == token.as_str() => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

pub fn build_router(state: AppState, auth_token: Option<String>) -> Router {
    let mut app = Router::new()
        // Ledger
        .route("/v1/balance/:account", get(get_balance))
        .route("/v1/balances", get(get_balances))
        .route("/v1/intents", post(apply_intent))
        .route("/v1/capabilities", post(anchor_capability))
        .route("/v1/ledger/equilibrium", get(get_equilibrium))
        // Records
        .route("/v1/anchors", get(search_anchors))
        .route("/v1/anchors/:id", get(get_anchor))
        .route("/v1/anchors/:id/reinforce", post(reinforce_anchor))
        .route("/v1/stubs/:id", get(get_stub))
        .route("/v1/stubs/:id/reconstruct", post(reconstruct_stub))
        .route("/v1/entropy/:hash", get(get_by_entropy))
        .route("/v1/decay/sweep", post(run_sweep))
        // Node + live feed
        .route("/v1/node", get(node_info))
        .route("/v1/feed", get(feed))
        // Observability
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    if let Some(token) = auth_token {
        tracing::info!("Auth Enabled: Bearer token required");
        app = app.layer(from_fn_with_state(Arc::new(token), auth_guard));
    } else {
        tracing::warn!("Auth Disabled: No token configured");
    }

    app.layer(CorsLayer::permissive()).layer(TraceLayer::new_for_http())
}

async fn get_balance(State(state): State<AppState>, Path(account): Path<String>) -> Json<BalanceResponse> {
    let balance = state.ledger.lock().await.balance(&account);
    Json(BalanceResponse { account, balance })
}

async fn get_balances(State(state): State<AppState>) -> Json<BalancesResponse> {
    let balances = state.ledger.lock().await.balances().clone();
    Json(BalancesResponse { balances })
}

/// Raw body so every parse failure maps to `InvalidIntent` (400).
fn parse_intent(body: &[u8]) -> Result<IntentRequest, EngineError> {
    IntentRequest::from_json(body).map_err(|e| EngineError::Ledger(LedgerError::from(e)))
}

async fn apply_intent(State(state): State<AppState>, body: Bytes) -> Result<Json<ApplyIntentResponse>, EngineError> {
    let request = parse_intent(&body)?;

    let (receipt, equilibrium) = ledger::mutate(&state.ledger, move |ledger| {
        let receipt = ledger.apply_transfer(request)?;
        Ok((receipt, ledger.equilibrium()))
    })
    .await?;
    state.hub.announce_transfer(&receipt, equilibrium);

    Ok(Json(ApplyIntentResponse {
        ok: true,
        applied_id: receipt.applied_id,
        anchor_id: receipt.anchor_id,
        balances: receipt.balances,
    }))
}

async fn anchor_capability(State(state): State<AppState>, body: Bytes) -> Result<Json<CapabilityResponse>, EngineError> {
    let request = parse_intent(&body)?;
    let anchor = ledger::mutate(&state.ledger, move |ledger| ledger.anchor_capability(request)).await?;
    Ok(Json(CapabilityResponse { ok: true, anchor_id: anchor.id }))
}

async fn get_equilibrium(State(state): State<AppState>) -> Json<Equilibrium> {
    Json(state.ledger.lock().await.equilibrium())
}

async fn search_anchors(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<AnchorRecord>> {
    let ledger = state.ledger.lock().await;
    Json(ledger.search(params.from.as_deref()))
}

async fn get_anchor(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<AnchorRecord>, EngineError> {
    state.store.get_anchor(&id).map(Json).ok_or(EngineError::NotFound(id))
}

async fn get_stub(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Stub>, EngineError> {
    state.store.get_stub(&id).map(Json).ok_or(EngineError::NotFound(id))
}

/// Exact anchor if live, else a reconstructed view of its stub (not persisted).
async fn get_by_entropy(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<AnchorRecord>, EngineError> {
    let record = state
        .store
        .find_by_digest(&hash)
        .and_then(|id| state.store.get(&id))
        .ok_or_else(|| EngineError::NotFound(hash))?;

    Ok(Json(match record {
        StoredRecord::Anchor(anchor) => anchor,
        StoredRecord::Stub(stub) => reconstruct_from_stub(&stub, Utc::now()),
    }))
}

async fn reinforce_anchor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReinforceResponse>, EngineError> {
    if state.decay.reinforce(&id, Utc::now())? {
        Ok(Json(ReinforceResponse { id, reinforced: true }))
    } else {
        Err(EngineError::NotFound(id))
    }
}

async fn reconstruct_stub(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnchorRecord>, EngineError> {
    state.decay.reconstruct(&id, Utc::now())?.map(Json).ok_or(EngineError::NotFound(id))
}

async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, EngineError> {
    let decay = state.decay.clone();
    let report = tokio::task::spawn_blocking(move || decay.sweep_now(Utc::now()))
        .await
        .map_err(|e| {
            tracing::error!("Manual sweep failed: {}", e);
            EngineError::Internal
        })?;
    Ok(Json(report))
}

async fn node_info(State(state): State<AppState>) -> Json<NodeInfoResponse> {
    let applied_intents = state.ledger.lock().await.applied_count();
    Json(NodeInfoResponse {
        node_id: state.identity.node_id().to_string(),
        public_key: state.identity.public_key(),
        peers: state.hub.peer_count(),
        applied_intents,
        vault: state.store.census(),
    })
}

async fn feed(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    let ledger = state.ledger.clone();
    ws.on_upgrade(move |socket| hub::serve_peer(hub, ledger, socket))
}

async fn metrics_handler() -> impl IntoResponse {
    crate::telemetry::get_metrics()
}
