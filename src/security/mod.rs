//! Security subsystem: the request authentication/authorization pipeline.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → firewall (first matching firewall, first matching access rule)
//!     → channel        (redirect to the required scheme)
//!     → rate_limit     (login attempts per IP and per username + IP)
//!     → authenticator  (form login, HTTP basic)
//!     → remember_me    (cookie login when no token is present)
//!     → access_decision (voters over the rule's attributes)
//!     → logout         (on the logout path)
//!     → token_storage holds the resulting token for the handler
//! ```
//!
//! # Design Decisions
//! - Fail closed: a backend error is an authentication failure, never a grant
//! - No trust in client input: cookies, form fields and headers are parsed
//!   defensively and compared in constant time where secrets are involved
//! - Collaborators sit behind traits so storage and hashing are pluggable

pub mod access_decision;
pub mod access_map;
pub mod authenticator;
pub mod clock;
pub mod crypto;
pub mod csrf;
pub mod error;
pub mod firewall;
pub mod logout;
pub mod matcher;
pub mod rate_limit;
pub mod remember_me;
pub mod session;
pub mod token;
pub mod token_storage;
pub mod user;

pub use error::{AuthenticationError, ConfigurationError, SecurityError};
pub use firewall::{FirewallDispatcher, FirewallMap, FirewallState};
pub use token::{AuthenticationToken, SecurityContext};
