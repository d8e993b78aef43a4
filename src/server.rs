use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::{get, post}};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};

use crate::lifecycle::{LifecycleManager, Outcome};
use crate::session::GREETING;

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub metrics: Option<PrometheusHandle>,
}

/// Operation failures map to a 500 with the detail inlined, matching
/// the wire behavior archive/delete consumers already handle.
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "detail": format!("{:#}", self.0) });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct RootResponse {
    message: &'static str,
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse { message: GREETING })
}

#[derive(Debug, Deserialize)]
pub struct ChatInput {
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub customer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatConfig {
    pub metadata: SessionMetadata,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub input: ChatInput,
    pub config: ChatConfig,
}

async fn chat(
    axum::extract::State(state): axum::extract::State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<String>, ApiError> {
    let meta = &body.config.metadata;
    let answer = state
        .lifecycle
        .chat(&meta.session_id, &meta.customer_id, &body.input.question)
        .await?;
    Ok(Json(answer))
}

async fn archive_interaction(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Query(key): axum::extract::Query<SessionMetadata>,
) -> Result<Json<Outcome>, ApiError> {
    let outcome = state
        .lifecycle
        .archive(&key.session_id, &key.customer_id)
        .await
        .map_err(|e| ApiError(e.context("Error saving interaction data")))?;
    Ok(Json(outcome))
}

async fn delete_active_interaction(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Query(key): axum::extract::Query<SessionMetadata>,
) -> Result<Json<Outcome>, ApiError> {
    let outcome = state
        .lifecycle
        .delete_active(&key.session_id, &key.customer_id)
        .await
        .map_err(|e| ApiError(e.context("Error deleting session state data")))?;
    Ok(Json(outcome))
}

async fn render_metrics(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> String {
    state.metrics.as_ref().map(|h| h.render()).unwrap_or_default()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/chatbot", post(chat))
        .route("/archive_interaction", post(archive_interaction))
        .route("/delete_active_interaction", post(delete_active_interaction))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}
