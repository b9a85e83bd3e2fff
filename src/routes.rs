//! HTTP surface: the mining submission endpoint and the websocket upgrade
//! route, wired together the way the teacher's `routes.rs` builds its axum
//! `Router` (CORS layer, shared `AppState`, one handler per concern).

use crate::gateway::websocket;
use crate::gateway::GatewayHandle;
use crate::mining::CancellationToken;
use crate::mining::MiningRequestHandler;
use crate::AppError;
use axum::extract::State;
use axum::http::Method;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub gateway: GatewayHandle,
    pub mining: Arc<MiningRequestHandler>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .route("/thin_wallet/send_tokens", post(send_tokens))
        .route("/ws", get(websocket::upgrade))
        .layer(cors)
        .with_state(state)
}

impl axum::extract::FromRef<AppState> for GatewayHandle {
    fn from_ref(state: &AppState) -> Self {
        state.gateway.clone()
    }
}

#[derive(Debug, Deserialize)]
pub struct SendTokensRequest {
    pub tx_hex: String,
}

/// Mirrors `SendTokensResource.render_POST`: a client-disconnect is
/// signalled by axum dropping this handler's future. `cancellation` is kept
/// bound here for the handler's whole lifetime and only a *clone* is handed
/// to `submit` (which moves its clone onto the worker thread); that way,
/// when this future is dropped mid-mining, the clone held in this scope
/// drops with it and its `Drop` impl flips the shared `cancelled` flag (see
/// `CancellationToken`'s `Drop` impl). Handing `submit` the original instead
/// would let the worker thread become the sole owner, so this scope's drop
/// would never fire.
async fn send_tokens(
    State(state): State<AppState>,
    Json(request): Json<SendTokensRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cancellation = CancellationToken::new();
    let response = state.mining.submit(&request.tx_hex, cancellation.clone()).await;
    Ok(Json(serde_json::to_value(response).map_err(anyhow::Error::from)?))
}
