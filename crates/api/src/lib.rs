// SPDX-License-Identifier: Apache-2.0

//! HTTP surfaces of the scheduling engine.
//!
//! Two servers, bound separately:
//!
//! - the *scheduling API* serves `POST /scheduler/{nova,manila,cinder}/external`,
//!   the hot path every placement in the cloud waits on,
//! - the *monitoring surface* serves `/metrics`, `/livez`, `/readyz`, and
//!   `/status` for the pull-based metrics sink and the platform probes.
//!
//! Responses carry only canonical messages; everything else goes to the
//! structured logs keyed by request id and pipeline.

use axum::Router;
use cortex_config::settings::ApiSettings;
use cortex_controller::DecisionSender;
use cortex_engine::PipelineRegistry;
use cortex_telemetry::{ApiMetrics, EngineMetrics, MetricsHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod error;
mod health;
mod metrics;
mod scheduler;

pub use error::Error;

/// Shared state of the scheduling API.
#[derive(Clone)]
pub struct AppState {
    /// The live pipeline registry.
    registry: PipelineRegistry,
    /// The decision queue, absent when the decision writer is disabled.
    decisions: Option<DecisionSender>,
    /// API settings (defaults, timeout).
    settings: Arc<ApiSettings>,
    /// Request metrics.
    metrics: ApiMetrics,
    /// Pipeline run metrics attached to every tracer.
    engine_metrics: EngineMetrics,
    /// One mutex per scheduling domain; requests within a domain are
    /// serialized to reduce contention on knowledge reads, while domains
    /// proceed in parallel.
    domain_locks: Arc<[Mutex<()>; 3]>,
    /// Parent token for per-request cancellation.
    shutdown: CancellationToken,
}

impl AppState {
    /// Creates the shared state of the scheduling API.
    #[must_use]
    pub fn new(
        registry: PipelineRegistry,
        decisions: Option<DecisionSender>,
        settings: ApiSettings,
        metrics: ApiMetrics,
        engine_metrics: EngineMetrics,
        shutdown: CancellationToken,
    ) -> Self {
        AppState {
            registry,
            decisions,
            settings: Arc::new(settings),
            metrics,
            engine_metrics,
            domain_locks: Arc::new([Mutex::new(()), Mutex::new(()), Mutex::new(())]),
            shutdown,
        }
    }
}

/// Shared state of the monitoring surface.
#[derive(Clone)]
pub struct MonitoringState {
    /// The process-wide metric registry.
    metrics: MetricsHandle,
    /// The live pipeline registry, for status and readiness.
    registry: PipelineRegistry,
}

impl MonitoringState {
    /// Creates the shared state of the monitoring surface.
    #[must_use]
    pub fn new(metrics: MetricsHandle, registry: PipelineRegistry) -> Self {
        MonitoringState { metrics, registry }
    }
}

/// The scheduling API router. Public for in-process tests.
#[must_use]
pub fn api_router(state: AppState) -> Router {
    scheduler::routes().with_state(state)
}

/// The monitoring router. Public for in-process tests.
#[must_use]
pub fn monitoring_router(state: MonitoringState) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(metrics::routes())
        .with_state(state)
}

/// Runs the scheduling API until shutdown is requested.
pub async fn run_api(
    bind_address: &str,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), Error> {
    serve(bind_address, api_router(state), "scheduler API", cancel).await
}

/// Runs the monitoring surface until shutdown is requested.
pub async fn run_monitoring(
    port: u16,
    state: MonitoringState,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let bind_address = format!("0.0.0.0:{port}");
    serve(&bind_address, monitoring_router(state), "monitoring", cancel).await
}

async fn serve(
    bind_address: &str,
    app: Router,
    surface: &'static str,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let addr = bind_address
        .parse::<SocketAddr>()
        .map_err(|e| Error::InvalidBindAddress {
            bind_address: bind_address.to_owned(),
            details: e.to_string(),
        })?;
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::BindFailed {
            addr: addr.to_string(),
            details: e.to_string(),
        })?;
    info!(surface, endpoint = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| Error::ServeFailed {
            details: e.to_string(),
        })
}
