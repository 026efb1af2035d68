//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Request cache effectiveness (hits, misses, joined fetches)
//! - Polling task activity and failures
//! - Subscription counts per topic
//! - Tracked transactions and finalization outcomes

use crate::error::EngineResult;
use crate::events::EngineEvent;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Encoder, Gauge,
    GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Cache metrics
    pub static ref CACHE_HITS: CounterVec = register_counter_vec!(
        "dexpulse_cache_hits_total",
        "Requests served from a fresh cached value",
        &["key"]
    ).unwrap();

    pub static ref CACHE_MISSES: CounterVec = register_counter_vec!(
        "dexpulse_cache_misses_total",
        "Requests that started a new fetch",
        &["key"]
    ).unwrap();

    pub static ref CACHE_JOINS: CounterVec = register_counter_vec!(
        "dexpulse_cache_joins_total",
        "Requests that joined an in-flight fetch",
        &["key"]
    ).unwrap();

    // Scheduler metrics
    pub static ref TASK_FIRES: CounterVec = register_counter_vec!(
        "dexpulse_task_fires_total",
        "Polling task invocations",
        &["task"]
    ).unwrap();

    pub static ref TASK_ERRORS: CounterVec = register_counter_vec!(
        "dexpulse_task_errors_total",
        "Polling task invocations that returned an error",
        &["task"]
    ).unwrap();

    pub static ref TASKS_REGISTERED: Gauge = register_gauge!(
        "dexpulse_tasks_registered",
        "Currently registered polling tasks"
    ).unwrap();

    // Subscription metrics
    pub static ref SUBSCRIBERS: GaugeVec = register_gauge_vec!(
        "dexpulse_subscribers",
        "Active subscribers per topic",
        &["topic"]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_PUBLISHED: CounterVec = register_counter_vec!(
        "dexpulse_events_published_total",
        "Engine events published by type",
        &["event_type"]
    ).unwrap();

    // Transaction monitor metrics
    pub static ref TX_TRACKED: Gauge = register_gauge!(
        "dexpulse_transactions_tracked",
        "Currently tracked transactions"
    ).unwrap();

    pub static ref TX_FINALIZED: CounterVec = register_counter_vec!(
        "dexpulse_transactions_finalized_total",
        "Transactions leaving tracking by terminal status",
        &["status"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> EngineResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::error::EngineError::Internal(e.to_string()))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::EngineError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_cache_hit(key: &str) {
    CACHE_HITS.with_label_values(&[key]).inc();
}

pub fn record_cache_miss(key: &str) {
    CACHE_MISSES.with_label_values(&[key]).inc();
}

pub fn record_cache_join(key: &str) {
    CACHE_JOINS.with_label_values(&[key]).inc();
}

pub fn record_task_fire(task: &str) {
    TASK_FIRES.with_label_values(&[task]).inc();
}

pub fn record_task_error(task: &str) {
    TASK_ERRORS.with_label_values(&[task]).inc();
}

pub fn record_task_count(count: usize) {
    TASKS_REGISTERED.set(count as f64);
}

pub fn record_subscriptions(topic: &str, count: usize) {
    SUBSCRIBERS.with_label_values(&[topic]).set(count as f64);
}

pub fn record_event(event: &EngineEvent) {
    EVENTS_PUBLISHED.with_label_values(&[event.name()]).inc();
}

pub fn record_tx_tracked(count: usize) {
    TX_TRACKED.set(count as f64);
}

pub fn record_tx_finalized(status: &str) {
    TX_FINALIZED.with_label_values(&[status]).inc();
}
