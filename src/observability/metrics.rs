//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gatehouse_firewall_requests_total` (counter): requests by final firewall state
//! - `gatehouse_authentications_total` (counter): by firewall, authenticator, outcome
//! - `gatehouse_remember_me_total` (counter): remember-me logins by firewall, outcome
//! - `gatehouse_cookie_theft_total` (counter): detected remember-me cookie theft
//! - `gatehouse_login_throttled_total` (counter): login attempts rejected by the limiter
//! - `gatehouse_access_denied_total` (counter): access decisions that denied

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use super::ObservabilityError;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), ObservabilityError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ObservabilityError::Metrics(e.to_string()))?;

    tracing::info!(listen = %addr, "Prometheus metrics server started");
    Ok(())
}

pub fn record_firewall_request(state: &'static str) {
    counter!("gatehouse_firewall_requests_total", "state" => state).increment(1);
}

pub fn record_authentication(firewall: &str, authenticator: &'static str, outcome: &'static str) {
    counter!(
        "gatehouse_authentications_total",
        "firewall" => firewall.to_string(),
        "authenticator" => authenticator,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_remember_me(firewall: &str, outcome: &'static str) {
    counter!(
        "gatehouse_remember_me_total",
        "firewall" => firewall.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_cookie_theft(firewall: &str) {
    counter!("gatehouse_cookie_theft_total", "firewall" => firewall.to_string()).increment(1);
}

pub fn record_login_throttled(firewall: &str) {
    counter!("gatehouse_login_throttled_total", "firewall" => firewall.to_string()).increment(1);
}

pub fn record_access_denied(firewall: &str) {
    counter!("gatehouse_access_denied_total", "firewall" => firewall.to_string()).increment(1);
}
