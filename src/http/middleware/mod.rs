//! Axum middleware.

pub mod firewall;

pub use firewall::{firewall_middleware, SessionHandle};
