//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define interceptor metrics (sessions, latency, connections, hook failures)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `interceptor_sessions_total` (counter): sessions by outcome, status
//! - `interceptor_session_duration_seconds` (histogram): head parsed to relay done
//! - `interceptor_active_connections` (gauge): current client connection count
//! - `interceptor_hook_failures_total` (counter): handler errors by phase
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; with no recorder
//!   installed (tests, embedding callers) every call is a no-op
//! - The exporter is installed by the binary only

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::hooks::Phase;
use crate::proxy::events::SessionOutcome;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one finished session.
pub fn record_session(outcome: SessionOutcome, status: Option<u16>, elapsed: Duration) {
    let status = status.map_or_else(|| "none".to_string(), |s| s.to_string());
    ::metrics::counter!(
        "interceptor_sessions_total",
        "outcome" => outcome.as_str(),
        "status" => status
    )
    .increment(1);
    ::metrics::histogram!("interceptor_session_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn set_active_connections(count: usize) {
    ::metrics::gauge!("interceptor_active_connections").set(count as f64);
}

pub fn record_hook_failure(phase: Phase) {
    ::metrics::counter!("interceptor_hook_failures_total", "phase" => phase.as_str()).increment(1);
}
