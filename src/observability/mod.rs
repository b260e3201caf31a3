//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Firewall listeners, authenticators, remember-me, logout produce:
//!     → logging.rs (structured log events, `security_event` field on
//!       theft / throttling / denial)
//!     → metrics.rs (counters per firewall and outcome)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (atomic increments); without an installed recorder
//!   the macros are no-ops, so library users and tests pay nothing
//! - Secrets (passwords, cookie values, tokens) are never logged

pub mod logging;
pub mod metrics;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("invalid observability configuration: {0}")]
    Config(String),

    #[error("failed to install subscriber: {0}")]
    Provider(String),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(String),
}
