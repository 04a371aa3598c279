//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 while both loops run)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Labels for watch event metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct EventLabels {
    pub event: String,
}

impl EncodeLabelSet for EventLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("event", self.event.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for child object operations
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ChildOperationLabels {
    pub kind: String,
    pub operation: String,
    pub outcome: String,
}

impl EncodeLabelSet for ChildOperationLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("operation", self.operation.as_str()).encode(encoder.encode_label())?;
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for garbage collection metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct KindLabels {
    pub kind: String,
}

impl EncodeLabelSet for KindLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for reaper outcomes
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabels {
    pub outcome: String,
}

impl EncodeLabelSet for OutcomeLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    /// Watch notifications by type
    pub watch_events_total: Family<EventLabels, Counter>,
    /// Child create/update/delete calls by outcome
    pub child_operations_total: Family<ChildOperationLabels, Counter>,
    /// Completed resync ticks
    pub resync_ticks_total: Counter,
    /// Resync tick duration histogram
    pub resync_duration_seconds: Histogram,
    /// Orphans removed by kind
    pub garbage_collected_total: Family<KindLabels, Counter>,
    /// Deployment teardowns by outcome
    pub reaper_runs_total: Family<OutcomeLabels, Counter>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("memcached_operator");

        let watch_events_total = Family::<EventLabels, Counter>::default();
        registry.register(
            "watch_events",
            "Watch notifications received by type",
            watch_events_total.clone(),
        );

        let child_operations_total = Family::<ChildOperationLabels, Counter>::default();
        registry.register(
            "child_operations",
            "Create, update and delete calls on child objects",
            child_operations_total.clone(),
        );

        let resync_ticks_total = Counter::default();
        registry.register(
            "resync_ticks",
            "Completed periodic resync ticks",
            resync_ticks_total.clone(),
        );

        let resync_duration_seconds = Histogram::new(exponential_buckets(0.01, 2.0, 12));
        registry.register(
            "resync_duration_seconds",
            "Duration of a periodic resync tick in seconds",
            resync_duration_seconds.clone(),
        );

        let garbage_collected_total = Family::<KindLabels, Counter>::default();
        registry.register(
            "garbage_collected",
            "Orphaned child objects removed",
            garbage_collected_total.clone(),
        );

        let reaper_runs_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "reaper_runs",
            "Deployment teardowns by outcome",
            reaper_runs_total.clone(),
        );

        Self {
            watch_events_total,
            child_operations_total,
            resync_ticks_total,
            resync_duration_seconds,
            garbage_collected_total,
            reaper_runs_total,
            registry,
        }
    }

    /// Record one watch notification
    pub fn record_watch_event(&self, event: &str) {
        self.watch_events_total
            .get_or_create(&EventLabels {
                event: event.to_string(),
            })
            .inc();
    }

    /// Record one child operation
    pub fn record_child_operation(&self, kind: &str, operation: &str, outcome: &str) {
        self.child_operations_total
            .get_or_create(&ChildOperationLabels {
                kind: kind.to_string(),
                operation: operation.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Record a completed resync tick
    pub fn record_resync(&self, duration_secs: f64) {
        self.resync_ticks_total.inc();
        self.resync_duration_seconds.observe(duration_secs);
    }

    /// Record a removed orphan
    pub fn record_garbage_collected(&self, kind: &str) {
        self.garbage_collected_total
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    /// Record a finished Deployment teardown
    pub fn record_reaper_run(&self, outcome: &str) {
        self.reaper_runs_total
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether both loops are running
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable before startup and once shutdown begins.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on `0.0.0.0:<port>`
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port = port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
