use crate::Result;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::info;

/// Shared counters for the relay
#[derive(Debug, Default)]
pub struct RelayMetrics {
    pub total_requests: AtomicU64,
    pub forwarded: AtomicU64,
    pub intercepted: AtomicU64,
    pub upstream_failures: AtomicU64,
    // Extraction job outcomes
    pub extractions_started: AtomicU64,
    pub extractions_completed: AtomicU64,
    pub extractions_cancelled: AtomicU64,
    pub extractions_conflicted: AtomicU64,
    pub extractions_failed: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub forwarded: u64,
    pub intercepted: u64,
    pub upstream_failures: u64,
    pub extractions: ExtractionMetrics,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExtractionMetrics {
    pub started: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub conflicted: u64,
    pub failed: u64,
}

impl RelayMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            intercepted: self.intercepted.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            extractions: ExtractionMetrics {
                started: self.extractions_started.load(Ordering::Relaxed),
                completed: self.extractions_completed.load(Ordering::Relaxed),
                cancelled: self.extractions_cancelled.load(Ordering::Relaxed),
                conflicted: self.extractions_conflicted.load(Ordering::Relaxed),
                failed: self.extractions_failed.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

pub fn admin_router(metrics: Arc<RelayMetrics>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(move || metrics_handler(metrics)))
}

pub async fn start_admin_server(port: u16, metrics: Arc<RelayMetrics>) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting Admin API on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        crate::error::RelayError::Network(format!("Failed to bind admin port {}: {}", port, e))
    })?;

    axum::serve(listener, admin_router(metrics))
        .await
        .map_err(|e| crate::error::RelayError::Network(format!("Admin server failed: {}", e)))?;

    Ok(())
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn metrics_handler(metrics: Arc<RelayMetrics>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}
