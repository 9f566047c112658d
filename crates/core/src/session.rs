//! Identity-provider boundary.
//!
//! The engine never manages token lifecycles. It only asks "is a user
//! logged in, what is their stable id, and what bearer token should a
//! request carry", plus a best-effort token refresh hook before remote
//! calls.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::errors::Result;

/// Minimum remaining token validity (seconds) requested before each
/// authenticated remote call.
pub const MIN_TOKEN_VALIDITY_SECS: u64 = 30;

/// Snapshot of the identity provider's session at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub authenticated: bool,
    /// Bearer token for authenticated requests.
    pub token: Option<String>,
    /// Stable subject identifier parsed from the token.
    pub user_id: Option<String>,
}

impl Session {
    /// Session for a visitor without an account.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Session for a logged-in user.
    pub fn authenticated(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            token: Some(token.into()),
            user_id: Some(user_id.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated && self.user_id.is_some()
    }
}

/// Read-only view of the external identity provider.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Current session snapshot.
    fn session(&self) -> Session;

    /// Ask the identity layer to refresh the token if it expires within
    /// `min_validity_secs`. Failures are reported but non-fatal; callers
    /// proceed with the token they have.
    async fn update_token(&self, min_validity_secs: u64) -> Result<()>;
}

#[async_trait]
impl<T: SessionProvider> SessionProvider for std::sync::Arc<T> {
    fn session(&self) -> Session {
        (**self).session()
    }

    async fn update_token(&self, min_validity_secs: u64) -> Result<()> {
        (**self).update_token(min_validity_secs).await
    }
}

/// In-memory session source for tests and embedding hosts that manage
/// identity elsewhere.
#[derive(Debug, Default)]
pub struct StaticSessionProvider {
    current: RwLock<Session>,
}

impl StaticSessionProvider {
    pub fn new(session: Session) -> Self {
        Self {
            current: RwLock::new(session),
        }
    }

    /// Replace the current session, e.g. to simulate login or logout.
    pub fn set_session(&self, session: Session) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = session;
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    fn session(&self) -> Session {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn update_token(&self, _min_validity_secs: u64) -> Result<()> {
        Ok(())
    }
}
