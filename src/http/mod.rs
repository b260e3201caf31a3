//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, tracing)
//!     → middleware/firewall.rs (buffer body, open session, dispatch)
//!     → request.rs (framework-neutral request view)
//!     → security::firewall (listeners, exception boundary)
//!     → handler, or the firewall's own response
//!     → cookie.rs (Set-Cookie for session and remember-me)
//! ```

pub mod cookie;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::SecurityRequest;
pub use server::{AppState, HttpServer, SecurityState};
