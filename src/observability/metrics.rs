//! Metrics collection and exposition.
//!
//! # Metrics
//! - `rpc_registry_services` (gauge): services currently in the registry
//! - `rpc_registrations_total` (counter): registration calls by service, outcome
//! - `rpc_service_close_total` (counter): shutdown outcome per service (closed, timed_out)
//! - `rpc_service_close_errors_total` (counter): `close` calls that returned an error
//! - `rpc_shutdown_duration_seconds` (histogram): duration of the shutdown pass
//! - `rpc_requests_total` (counter): TCP requests by service, status
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed (tests never install one)
//! - Prometheus exporter is optional and owns its own HTTP listener

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and start its HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn set_registered_services(count: usize) {
    gauge!("rpc_registry_services").set(count as f64);
}

pub fn record_registration(service: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!(
        "rpc_registrations_total",
        "service" => service.to_owned(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_close(service: &str, outcome: &'static str) {
    counter!(
        "rpc_service_close_total",
        "service" => service.to_owned(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_close_error(service: &str) {
    counter!("rpc_service_close_errors_total", "service" => service.to_owned()).increment(1);
}

pub fn record_shutdown(elapsed: Duration) {
    histogram!("rpc_shutdown_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_request(service: &str, status: &'static str) {
    counter!(
        "rpc_requests_total",
        "service" => service.to_owned(),
        "status" => status
    )
    .increment(1);
}
