//! Session lifecycle management.
//!
//! # Architecture
//!
//! - [`RefreshingSessionManager`] - owns the cached session and decides between
//!   serving from cache, refreshing silently, or acquiring interactively
//! - [`RefreshPolicy`] - expiry-window predicate driven by an injected clock
//! - [`SessionRequest`] - a single caller's requirement
//! - [`SessionState`] - signed-in / signed-out broadcast
//!
//! The manager never inspects a session directly. It is configured with a
//! scope extractor and a refresh predicate, so any provider's session type can
//! be cached.

pub mod manager;
pub mod policy;

pub use manager::{RefreshingSessionManager, SessionManagerOptions};
pub use policy::RefreshPolicy;

use std::sync::Arc;

use crate::error::Result;
use crate::scope::ScopeSet;

/// Extracts the granted scopes from a provider session.
pub type SessionScopesFn<S> = Arc<dyn Fn(&S) -> ScopeSet + Send + Sync>;

/// Decides whether a cached session is close enough to expiry to refresh.
pub type ShouldRefreshFn<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

/// A caller's requirement for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRequest {
    /// When true, never prompt the user; an unsatisfiable request yields no session.
    pub optional: bool,
    /// Scopes the caller needs, on top of the manager's default scopes.
    pub scopes: ScopeSet,
}

impl SessionRequest {
    /// A request that may prompt the user interactively.
    pub fn required(scopes: ScopeSet) -> Self {
        Self {
            optional: false,
            scopes,
        }
    }

    /// A request that is only served from cache or by silent refresh.
    pub fn optional(scopes: ScopeSet) -> Self {
        Self {
            optional: true,
            scopes,
        }
    }
}

/// Whether a session is currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    SignedIn,
    #[default]
    SignedOut,
}

/// Session manager contract exposed to provider facades.
#[async_trait::async_trait]
pub trait SessionManager<S>: Send + Sync {
    /// Return a session satisfying `request`.
    ///
    /// Resolves to `Ok(None)` only for optional requests that cannot be served
    /// without user interaction.
    async fn get_session(&self, request: SessionRequest) -> Result<Option<S>>;

    /// Drop the cached session. Results of operations already in flight are
    /// delivered to their waiters but never cached.
    fn remove_session(&self);
}

#[async_trait::async_trait]
impl<S, T> SessionManager<S> for Arc<T>
where
    S: Send + 'static,
    T: SessionManager<S> + ?Sized,
{
    async fn get_session(&self, request: SessionRequest) -> Result<Option<S>> {
        (**self).get_session(request).await
    }

    fn remove_session(&self) {
        (**self).remove_session()
    }
}
