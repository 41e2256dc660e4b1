//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use callbridge_session::{BridgeEnd, SessionReport};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Record a call being accepted.
pub fn record_session_start() {
    metrics::gauge!("sessions_active").increment(1.0);
    metrics::counter!("sessions_total").increment(1);
}

/// Record a finished call and its counters.
pub fn record_session_end(report: &SessionReport) {
    metrics::gauge!("sessions_active").decrement(1.0);
    metrics::counter!("frames_relayed_total", "direction" => "inbound")
        .increment(report.frames_forwarded);
    metrics::counter!("frames_relayed_total", "direction" => "outbound")
        .increment(report.outbound_frames);
    metrics::counter!("tool_calls_total", "outcome" => "success")
        .increment(report.tool_calls.saturating_sub(report.tool_errors));
    metrics::counter!("tool_calls_total", "outcome" => "error").increment(report.tool_errors);
    metrics::histogram!("session_duration_seconds").record(report.duration_ms as f64 / 1000.0);

    match report.bridge_end {
        Some(BridgeEnd::ConnectFailed) => record_error("backend_connect"),
        Some(BridgeEnd::BackendClosed) => record_error("backend_closed"),
        None => record_error("bridge_task"),
        _ => {}
    }
    if report.force_cancelled {
        record_error("grace_expired");
    }
}

/// Record an error of a given kind.
pub fn record_error(kind: &str) {
    let labels = [("kind", kind.to_string())];
    metrics::counter!("errors_total", &labels).increment(1);
}
