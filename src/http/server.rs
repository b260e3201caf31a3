//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the demo handlers
//! - Wire up middleware (firewall, timeout, request ID, tracing)
//! - Hold the hot-swappable security state
//! - Bind server to listener and shut down gracefully

use arc_swap::ArcSwap;
use axum::{
    extract::Extension,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatehouseConfig;
use crate::http::middleware::{firewall_middleware, SessionHandle};
use crate::http::response::error_response;
use crate::lifecycle::Shutdown;
use crate::security::authenticator::form_login::{DEFAULT_CSRF_TOKEN_ID, LAST_ERROR, LAST_USERNAME};
use crate::security::csrf::{CsrfTokenManager, SessionCsrfTokenStore};
use crate::security::error::ConfigurationError;
use crate::security::firewall::factory::users_from_config;
use crate::security::firewall::{Collaborators, FirewallDispatcher, FirewallMap};
use crate::security::session::{MemorySessionStore, SessionPolicy};
use crate::security::token::SecurityContext;
use crate::security::token_storage::SECURITY_NAMESPACE;

/// One configuration generation: config plus the firewalls built from it.
#[derive(Debug)]
pub struct SecurityState {
    pub config: GatehouseConfig,
    pub collaborators: Collaborators,
    pub dispatcher: FirewallDispatcher,
}

impl SecurityState {
    pub fn build(config: GatehouseConfig, collaborators: Collaborators) -> Result<Self, ConfigurationError> {
        let map = FirewallMap::from_config(&config, &collaborators)?;
        Ok(Self {
            config,
            collaborators,
            dispatcher: FirewallDispatcher::new(Arc::new(map)),
        })
    }
}

/// Application state injected into middleware and handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ArcSwap<SecurityState>>,
    pub sessions: MemorySessionStore,
}

impl AppState {
    pub fn new(config: GatehouseConfig, collaborators: Collaborators) -> Result<Self, ConfigurationError> {
        let sessions =
            MemorySessionStore::with_policy(SessionPolicy::from(&config.session), collaborators.clock.clone());
        let state = SecurityState::build(config, collaborators)?;
        Ok(Self {
            inner: Arc::new(ArcSwap::from_pointee(state)),
            sessions,
        })
    }

    /// Swap in a new configuration. On error the current one stays active.
    ///
    /// Sessions (with the lifetimes they started with), remember-me records
    /// and throttle buckets carry over; the user list is rebuilt from the new
    /// configuration.
    pub fn reload(&self, config: GatehouseConfig) -> Result<(), ConfigurationError> {
        let collaborators = self
            .inner
            .load()
            .collaborators
            .clone()
            .with_users(users_from_config(&config.users));
        let state = SecurityState::build(config, collaborators)?;
        self.inner.store(Arc::new(state));
        tracing::info!("Security configuration reloaded");
        Ok(())
    }
}

/// HTTP server for the gatehouse.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a server with in-memory collaborators.
    pub fn new(config: GatehouseConfig) -> Result<Self, ConfigurationError> {
        let collaborators = Collaborators::in_memory(&config.users);
        Self::with_collaborators(config, collaborators)
    }

    pub fn with_collaborators(config: GatehouseConfig, collaborators: Collaborators) -> Result<Self, ConfigurationError> {
        let request_timeout = Duration::from_secs(config.timeouts.request_secs);
        let state = AppState::new(config, collaborators)?;
        let router = Self::build_router(state.clone(), request_timeout);
        Ok(Self { router, state })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState, request_timeout: Duration) -> Router {
        Router::new()
            .route("/", get(home))
            .route("/login", get(login_page))
            .route("/profile", get(profile))
            .route("/admin", get(admin))
            .fallback(not_found)
            .layer(middleware::from_fn_with_state(state, firewall_middleware))
            .layer(TimeoutLayer::new(request_timeout))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let stop = shutdown.subscribe();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(Shutdown::triggered(stop))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct Greeting {
    message: &'static str,
    user: Option<String>,
}

async fn home(Extension(context): Extension<SecurityContext>) -> Json<Greeting> {
    Json(Greeting {
        message: "Welcome to the gatehouse",
        user: context.identifier().map(str::to_owned),
    })
}

#[derive(Debug, Serialize)]
struct LoginPage {
    csrf_token: String,
    last_username: Option<String>,
    last_error: Option<String>,
}

async fn login_page(Extension(SessionHandle(session)): Extension<SessionHandle>) -> Response {
    let store = SessionCsrfTokenStore::new(Arc::clone(&session), vec![DEFAULT_CSRF_TOKEN_ID.to_string()]);
    let csrf_token = match CsrfTokenManager::new(&store).get_token(DEFAULT_CSRF_TOKEN_ID) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(error = %e, "Failed to issue CSRF token");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "An internal error occurred");
        }
    };

    // Shown once.
    let take = |key: &str| {
        let value = session.get(SECURITY_NAMESPACE, key).ok().flatten();
        if value.is_some() {
            if let Err(e) = session.delete(SECURITY_NAMESPACE, key) {
                tracing::error!(error = %e, key, "Failed to clear login page value");
            }
        }
        value
    };

    Json(LoginPage {
        csrf_token,
        last_username: take(LAST_USERNAME),
        last_error: take(LAST_ERROR),
    })
    .into_response()
}

#[derive(Debug, Serialize)]
struct Profile {
    user: String,
    roles: Vec<String>,
    remembered: bool,
}

async fn profile(Extension(context): Extension<SecurityContext>) -> Response {
    match context.token {
        Some(token) => Json(Profile {
            user: token.identifier().to_string(),
            roles: token.roles().iter().cloned().collect(),
            remembered: token.is_remembered(),
        })
        .into_response(),
        None => error_response(StatusCode::UNAUTHORIZED, "unauthorized", "Not logged in"),
    }
}

async fn admin(Extension(context): Extension<SecurityContext>) -> Response {
    Json(Greeting {
        message: "Administration area",
        user: context.identifier().map(str::to_owned),
    })
    .into_response()
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not_found", "No such resource")
}
