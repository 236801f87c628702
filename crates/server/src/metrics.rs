//! Prometheus metrics
//!
//! The recorder is installed once per process; `/metrics` renders it.

use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Audio direction label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToAgent,
    AgentToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToAgent => "client_to_agent",
            Direction::AgentToClient => "agent_to_client",
        }
    }
}

/// Install the Prometheus recorder (idempotent)
pub fn init_metrics() -> Option<PrometheusHandle> {
    let handle = PROMETHEUS
        .get_or_try_init(|| {
            let handle = PrometheusBuilder::new().install_recorder()?;
            describe_metrics();
            Ok::<_, metrics_exporter_prometheus::BuildError>(handle)
        })
        .map_err(|e| tracing::error!(error = %e, "Failed to install Prometheus recorder"))
        .ok()?;
    Some(handle.clone())
}

fn describe_metrics() {
    describe_counter!("specflow_audio_frames_total", "Audio frames forwarded by the relay");
    describe_counter!(
        "specflow_frames_dropped_total",
        "Audio frames dropped because the destination was closed or full"
    );
    describe_counter!(
        "specflow_specifications_extracted_total",
        "Complete specifications extracted from agent text"
    );
    describe_counter!("specflow_approvals_total", "User utterances classified as approval");
    describe_counter!("specflow_generation_sessions_total", "Generation runs by outcome");
    describe_counter!("specflow_sessions_evicted_total", "Sessions removed by the staleness sweep");
    describe_histogram!(
        "specflow_generation_duration_seconds",
        Unit::Seconds,
        "Wall time of generation runs"
    );
    describe_gauge!("specflow_active_generation_sessions", "Generation sessions not yet settled");
}

pub fn record_audio_frame(direction: Direction) {
    metrics::counter!("specflow_audio_frames_total", "direction" => direction.as_str()).increment(1);
}

pub fn record_dropped_frame(direction: Direction) {
    metrics::counter!("specflow_frames_dropped_total", "direction" => direction.as_str()).increment(1);
}

pub fn record_specification_extracted() {
    metrics::counter!("specflow_specifications_extracted_total").increment(1);
}

pub fn record_approval(outcome: &'static str) {
    metrics::counter!("specflow_approvals_total", "outcome" => outcome).increment(1);
}

/// `GET /metrics`
pub async fn metrics_handler() -> Response {
    match PROMETHEUS.get() {
        Some(handle) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics disabled").into_response(),
    }
}
