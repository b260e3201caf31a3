//! Logout as an ordered list of independent cleanup steps.
//!
//! # Steps
//! 1. Reset token storage
//! 2. Clear CSRF tokens
//! 3. Invalidate the session
//! 4. Clear the remember-me record and cookie
//!
//! Each step runs even if an earlier one failed. A step whose collaborator is
//! not configured is skipped.

use std::fmt;
use std::sync::Arc;

use crate::http::cookie::CookieJar;
use crate::security::csrf::CsrfTokenStore;
use crate::security::remember_me::RememberMeHandler;
use crate::security::session::Session;
use crate::security::token_storage::TokenStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutStep {
    ResetToken,
    ClearCsrf,
    InvalidateSession,
    ClearRememberMe,
}

impl fmt::Display for LogoutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogoutStep::ResetToken => "reset_token",
            LogoutStep::ClearCsrf => "clear_csrf",
            LogoutStep::InvalidateSession => "invalidate_session",
            LogoutStep::ClearRememberMe => "clear_remember_me",
        };
        f.write_str(name)
    }
}

/// What happened to each step.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LogoutReport {
    pub completed: Vec<LogoutStep>,
    pub skipped: Vec<LogoutStep>,
    pub failed: Vec<(LogoutStep, String)>,
}

impl LogoutReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Request state a logout operates on.
pub struct LogoutSubject<'a> {
    pub token_storage: &'a mut TokenStorage,
    pub session: Option<&'a Arc<dyn Session>>,
    pub csrf: Option<&'a dyn CsrfTokenStore>,
    pub remember_me_cookie: Option<&'a str>,
    pub cookies: &'a mut CookieJar,
}

#[derive(Debug, Clone)]
pub struct Logout {
    path: String,
    target: String,
    invalidate_session: bool,
    remember_me: Option<Arc<RememberMeHandler>>,
}

impl Logout {
    pub fn new(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            target: target.into(),
            invalidate_session: true,
            remember_me: None,
        }
    }

    pub fn with_invalidate_session(mut self, invalidate: bool) -> Self {
        self.invalidate_session = invalidate;
        self
    }

    pub fn with_remember_me(mut self, handler: Option<Arc<RememberMeHandler>>) -> Self {
        self.remember_me = handler;
        self
    }

    /// Path that triggers logout.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Where the client is sent afterwards.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn perform(&self, subject: LogoutSubject<'_>) -> LogoutReport {
        let mut report = LogoutReport::default();
        let LogoutSubject {
            token_storage,
            session,
            csrf,
            remember_me_cookie,
            cookies,
        } = subject;

        record(&mut report, LogoutStep::ResetToken, Some(token_storage.reset().map_err(|e| e.to_string())));

        record(
            &mut report,
            LogoutStep::ClearCsrf,
            csrf.map(|store| store.clear().map_err(|e| e.to_string())),
        );

        let invalidated = session
            .filter(|_| self.invalidate_session)
            .map(|s| s.invalidate().map_err(|e| e.to_string()));
        record(&mut report, LogoutStep::InvalidateSession, invalidated);

        let cleared = self
            .remember_me
            .as_ref()
            .map(|handler| handler.clear_cookie(remember_me_cookie, cookies).map_err(|e| e.to_string()));
        record(&mut report, LogoutStep::ClearRememberMe, cleared);

        report
    }
}

fn record(report: &mut LogoutReport, step: LogoutStep, outcome: Option<Result<(), String>>) {
    match outcome {
        None => {
            tracing::debug!(step = %step, "Logout step skipped");
            report.skipped.push(step);
        }
        Some(Ok(())) => report.completed.push(step),
        Some(Err(e)) => {
            tracing::error!(step = %step, error = %e, "Logout step failed");
            report.failed.push((step, e));
        }
    }
}
