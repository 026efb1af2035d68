//! HTTP API for health, status, and inbound engine commands
//!
//! The command surface mirrors what an embedding front-end gateway calls:
//! subscribe/unsubscribe components to topics, manual refresh, transaction
//! tracking, and the visibility signal that reshapes polling cadence.

use crate::config::ApiConfig;
use crate::error::{EngineError, EngineResult};
use crate::monitor::{TrackingStats, TxKind, TxMonitor};
use crate::sched::{Visibility, VisibilitySignal};
use crate::store::{MarketStore, TopicSnapshot};
use crate::topics::{Topic, TopicRegistry};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TopicRegistry>,
    pub monitor: Arc<TxMonitor>,
    pub store: Arc<MarketStore>,
    pub visibility: Arc<VisibilitySignal>,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> EngineResult<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/stats", get(get_stats))
        .route("/topics/:topic", get(get_topic_snapshot))
        .route("/subscriptions", post(create_subscription))
        .route("/subscriptions/:id", delete(remove_subscription))
        .route(
            "/subscriptions/component/:component_id",
            delete(remove_component),
        )
        .route("/refresh/:topic", post(refresh_topic))
        .route("/transactions", post(track_transaction))
        .route("/transactions/:tx_hash", delete(stop_tracking))
        .route("/visibility", post(set_visibility))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Engine status: per-topic subscribers/pollers and tracked transactions
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let mut topics = Vec::new();
    for topic in Topic::all() {
        topics.push(TopicStatus {
            topic,
            subscribers: state.registry.subscriber_count(topic).await,
            polling: state.registry.is_polling(topic).await,
            has_snapshot: state.store.get(topic).is_some(),
        });
    }

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        hidden: state.visibility.is_hidden(),
        topics,
        tracked_transactions: state.monitor.tracked_count().await,
    })
}

/// Tracked-transaction statistics, grouped by kind and chain
async fn get_stats(State(state): State<AppState>) -> Json<TrackingStats> {
    Json(state.monitor.get_stats().await)
}

/// Latest snapshot for a topic
async fn get_topic_snapshot(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Result<Json<TopicSnapshot>, ApiError> {
    let topic: Topic = topic.parse()?;
    state
        .store
        .get(topic)
        .map(Json)
        .ok_or(ApiError::NotFound("no snapshot yet".to_string()))
}

async fn create_subscription(
    State(state): State<AppState>,
    Json(body): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<SubscribeResponse>), ApiError> {
    let topic: Topic = body.topic.parse()?;
    let id = state.registry.subscribe(&body.component_id, topic).await;
    Ok((StatusCode::CREATED, Json(SubscribeResponse { id })))
}

async fn remove_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StatusCode {
    state.registry.unsubscribe(&id).await;
    StatusCode::NO_CONTENT
}

async fn remove_component(
    State(state): State<AppState>,
    Path(component_id): Path<String>,
) -> StatusCode {
    state.registry.unsubscribe_component(&component_id).await;
    StatusCode::NO_CONTENT
}

async fn refresh_topic(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Result<StatusCode, ApiError> {
    let topic: Topic = topic.parse()?;
    state.registry.refresh(topic).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn track_transaction(
    State(state): State<AppState>,
    Json(body): Json<TrackRequest>,
) -> StatusCode {
    state
        .monitor
        .track_transaction(&body.tx_hash, &body.chain_uid, body.kind)
        .await;
    StatusCode::ACCEPTED
}

async fn stop_tracking(State(state): State<AppState>, Path(tx_hash): Path<String>) -> StatusCode {
    state.monitor.stop_tracking(&tx_hash).await;
    StatusCode::NO_CONTENT
}

/// Host-driven visibility signal (the front end reports tab state here)
async fn set_visibility(
    State(state): State<AppState>,
    Json(body): Json<VisibilityRequest>,
) -> StatusCode {
    state.visibility.set_hidden(body.hidden);
    StatusCode::NO_CONTENT
}

// Request/response types

#[derive(Deserialize)]
struct SubscribeRequest {
    component_id: String,
    topic: String,
}

#[derive(Serialize)]
struct SubscribeResponse {
    id: String,
}

#[derive(Deserialize)]
struct TrackRequest {
    tx_hash: String,
    chain_uid: String,
    kind: TxKind,
}

#[derive(Deserialize)]
struct VisibilityRequest {
    hidden: bool,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct TopicStatus {
    topic: Topic,
    subscribers: usize,
    polling: bool,
    has_snapshot: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    hidden: bool,
    topics: Vec<TopicStatus>,
    tracked_transactions: usize,
}

/// API error mapped onto HTTP status codes
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::UnknownTopic(t) => ApiError::BadRequest(format!("unknown topic: {}", t)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
