//! Prometheus scrape endpoint.
//!
//! Serves `/metrics` and `/health` until the capture run is cancelled.

use crate::coordinator::CancellationToken;
use crate::metrics::CaptureMetrics;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;

/// Errors from the metrics server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not bind.
    #[error("failed to bind metrics listener: {0}")]
    Bind(#[from] std::io::Error),
    /// Serving failed after binding.
    #[error("metrics server failed: {0}")]
    Server(String),
}

/// Where the metrics server listens.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Listen address.
    pub bind_addr: SocketAddr,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self::with_port(9090)
    }
}

impl MetricsServerConfig {
    /// Listens on every interface at `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], port).into(),
        }
    }
}

#[derive(Clone)]
struct ScrapeState {
    metrics: Arc<CaptureMetrics>,
    token: CancellationToken,
}

/// HTTP exporter bound to one capture run.
pub struct MetricsServer {
    config: MetricsServerConfig,
    state: ScrapeState,
}

impl MetricsServer {
    /// `token` is the run's cancellation token; the server shuts down with it.
    pub fn new(
        config: MetricsServerConfig,
        metrics: Arc<CaptureMetrics>,
        token: CancellationToken,
    ) -> Self {
        Self {
            config,
            state: ScrapeState { metrics, token },
        }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(scrape))
            .route("/health", get(health))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serves until the capture token is cancelled.
    pub async fn run(self) -> Result<(), ServerError> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Metrics server listening");

        let token = self.state.token.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                // The token blocks, so wait for it off the async workers.
                let _ = tokio::task::spawn_blocking(move || token.wait()).await;
            })
            .await
            .map_err(|e| ServerError::Server(e.to_string()))?;

        tracing::info!("Metrics server stopped");
        Ok(())
    }
}

async fn scrape(State(state): State<ScrapeState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("failed to encode metrics: {e}"),
        ),
    }
}

/// 200 while capturing, 503 once the run is stopping.
async fn health(State(state): State<ScrapeState>) -> impl IntoResponse {
    if state.token.is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, "stopping")
    } else {
        (StatusCode::OK, "capturing")
    }
}
