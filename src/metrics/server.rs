//! Monitoring HTTP Server
//!
//! Serves health, Prometheus metrics and a snapshot of live sessions.

use crate::metrics::Metrics;
use crate::relay::{SessionRegistry, SessionStats};
use crate::Result;
use anyhow::Context;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Shared state for the monitoring handlers
#[derive(Clone)]
pub struct MonitoringState {
    pub metrics: Arc<Metrics>,
    pub registry: Arc<SessionRegistry>,
    pub start_time: SystemTime,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub accepting: bool,
    pub active_sessions: usize,
    pub uptime_seconds: u64,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SessionList {
    pub count: usize,
    pub sessions: Vec<SessionStats>,
}

/// HTTP server for monitoring endpoints
pub struct MonitoringServer {
    bind_addr: SocketAddr,
    state: MonitoringState,
}

impl MonitoringServer {
    pub fn new(
        bind_addr: SocketAddr,
        metrics: Arc<Metrics>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            bind_addr,
            state: MonitoringState {
                metrics,
                registry,
                start_time: SystemTime::now(),
            },
        }
    }

    /// Build the router
    pub fn create_router(&self) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/metrics", get(prometheus_metrics))
            .route("/sessions", get(list_sessions))
            .with_state(self.state.clone())
    }

    /// Bind and serve until the task is dropped
    pub async fn start(self) -> Result<()> {
        let app = self.create_router();

        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind monitoring server to {}", self.bind_addr))?;

        info!(bind_addr = %self.bind_addr, "Monitoring server listening");

        if let Err(e) = axum::serve(listener, app).await {
            error!("Monitoring server error: {}", e);
            return Err(e.into());
        }

        Ok(())
    }
}

async fn health_check(State(state): State<MonitoringState>) -> impl IntoResponse {
    let accepting = state.registry.is_accepting();
    let health = HealthStatus {
        status: if accepting { "healthy" } else { "shutting_down" },
        accepting,
        active_sessions: state.registry.len(),
        uptime_seconds: SystemTime::now()
            .duration_since(state.start_time)
            .unwrap_or_default()
            .as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    };

    let status = if accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

async fn prometheus_metrics(State(state): State<MonitoringState>) -> impl IntoResponse {
    debug!("Serving Prometheus metrics");
    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.export_prometheus(),
    )
}

async fn list_sessions(State(state): State<MonitoringState>) -> Json<SessionList> {
    let sessions = state.registry.snapshot();
    Json(SessionList {
        count: sessions.len(),
        sessions,
    })
}
