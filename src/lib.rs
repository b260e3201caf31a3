//! Gatehouse: request authentication and authorization for Axum services.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::GatehouseConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use security::{FirewallDispatcher, FirewallMap};
