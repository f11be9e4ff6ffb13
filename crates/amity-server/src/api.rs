use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ServerError;
use crate::messenger::Messenger;
use crate::ws::ws_handler;

use amity_shared::constants::USER_ID_HEADER;
use amity_shared::protocol::{
    HistoryQuery, MarkReadRequest, MarkReadResponse, MessageView, UnreadSummary,
    VisibilityRequest,
};
use amity_shared::types::UserId;

#[derive(Clone)]
pub struct AppState {
    pub messenger: Messenger,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/dialogs/unread", get(unread_summary))
        .route(
            "/dialogs/:peer_id/messages",
            get(message_history).post(send_message),
        )
        .route("/dialogs/:peer_id/read", post(mark_read))
        .route("/presence/online", get(online_friends))
        .route("/me/presence", put(set_presence))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    text: String,
}

/// Caller id set by the authenticating gateway in front of this service.
pub(crate) fn caller_id(headers: &HeaderMap) -> Result<UserId, ServerError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .ok_or_else(|| ServerError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;

    raw.to_str()
        .ok()
        .and_then(|value| value.trim().parse::<UserId>().ok())
        .ok_or_else(|| ServerError::Unauthorized(format!("invalid {USER_ID_HEADER} header")))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn message_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer_id: Result<Path<UserId>, PathRejection>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let caller = caller_id(&headers)?;
    let Path(peer_id) = peer_id?;
    let Query(query) = query?;
    let messages = state.messenger.history(caller, peer_id, &query).await?;
    Ok(Json(messages))
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer_id: Result<Path<UserId>, PathRejection>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Response, ServerError> {
    let caller = caller_id(&headers)?;
    let Path(peer_id) = peer_id?;
    let Json(body) = body?;
    let sent = state
        .messenger
        .send_direct_message(caller, peer_id, &body.text)
        .await?;

    Ok(match sent {
        Some(message) => (StatusCode::CREATED, Json(message.view())).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn unread_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<UnreadSummary>>, ServerError> {
    let caller = caller_id(&headers)?;
    Ok(Json(state.messenger.unread_summary(caller).await))
}

async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer_id: Result<Path<UserId>, PathRejection>,
    body: Result<Json<MarkReadRequest>, JsonRejection>,
) -> Result<Json<MarkReadResponse>, ServerError> {
    let caller = caller_id(&headers)?;
    let Path(peer_id) = peer_id?;
    let Json(body) = body?;
    state.messenger.mark_read(caller, peer_id, &body).await?;
    Ok(Json(MarkReadResponse { ok: true }))
}

async fn online_friends(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<UserId>>, ServerError> {
    let caller = caller_id(&headers)?;
    Ok(Json(state.messenger.online_friends(caller).await))
}

async fn set_presence(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<VisibilityRequest>, JsonRejection>,
) -> Result<Json<VisibilityRequest>, ServerError> {
    let caller = caller_id(&headers)?;
    let Json(body) = body?;
    state.messenger.set_visibility(caller, body.visible).await?;
    Ok(Json(body))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
