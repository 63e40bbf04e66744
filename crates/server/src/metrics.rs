//! Prometheus metrics
//!
//! The recorder is installed once at startup; every crate records through
//! the `metrics` facade under the `intake_agent_` prefix.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use crate::state::AppState;
use crate::ServerError;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Calling it again returns the
/// existing handle.
pub fn init_metrics() -> Result<PrometheusHandle, ServerError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Internal(format!("metrics recorder: {}", e)))?;

    register_default_metrics();

    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Zero the headline series so dashboards see them before the first call
fn register_default_metrics() {
    gauge!("intake_agent_active_calls").set(0.0);
    counter!("intake_agent_calls_total").absolute(0);
    counter!("intake_agent_barge_ins_total").absolute(0);
    counter!("intake_agent_calls_rejected_total").absolute(0);

    for kind in ["frame_decode", "transcript_stream", "synthesis", "dialogue_backend"] {
        counter!("intake_agent_errors_total", "kind" => kind).absolute(0);
    }
    histogram!("intake_agent_call_duration_seconds").record(0.0);
}

pub fn record_request(endpoint: &'static str) {
    counter!("intake_agent_requests_total", "endpoint" => endpoint).increment(1);
}

pub fn record_call_rejected() {
    counter!("intake_agent_calls_rejected_total").increment(1);
}

pub fn record_active_connections(count: usize) {
    gauge!("intake_agent_ws_connections").set(count as f64);
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    record_active_connections(state.sessions.count());

    match get_metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics disabled".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_helpers() {
        // no recorder installed; these must not panic
        record_request("health");
        record_call_rejected();
        record_active_connections(3);
    }
}
