//! Connector contract: the round trip to an identity provider.
//!
//! A connector turns provider-specific responses into a normalized session.
//! The session manager only ever talks to this trait.
//!
//! - [`AuthConnector`] - acquire interactively / refresh silently
//! - [`DefaultAuthConnector`] - HTTP auth-backend implementation
//! - [`AuthorizationRequester`] - the external popup/redirect transport used
//!   for interactive acquisition

pub mod default;

pub use default::{
    AuthorizationPrompt, AuthorizationRequester, DefaultAuthConnector, DefaultConnectorOptions,
};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AuthError, Result};
use crate::scope::ScopeSet;

/// Performs the actual round trip to obtain or refresh a session.
#[async_trait]
pub trait AuthConnector<S>: Send + Sync {
    /// Run the interactive flow for `scopes`.
    ///
    /// Fails with [`AuthError::AuthenticationFailed`] when the user cancels or
    /// the provider rejects the request, [`AuthError::Network`] on transport
    /// failure.
    async fn create_session(&self, scopes: &ScopeSet) -> Result<S>;

    /// Attempt a non-interactive refresh for `scopes`.
    ///
    /// Fails with [`AuthError::RefreshFailed`] when the provider requires the
    /// user to interact again, [`AuthError::Network`] on transport failure.
    async fn refresh_session(&self, scopes: &ScopeSet) -> Result<S>;
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<S, T> AuthConnector<S> for Arc<T>
where
    S: Send + 'static,
    T: AuthConnector<S> + ?Sized,
{
    async fn create_session(&self, scopes: &ScopeSet) -> Result<S> {
        (**self).create_session(scopes).await
    }

    async fn refresh_session(&self, scopes: &ScopeSet) -> Result<S> {
        (**self).refresh_session(scopes).await
    }
}

/// Static provider metadata shown alongside authorization prompts.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProviderInfo {
    /// Identifier used in backend routes (e.g. "github").
    pub id: String,
    /// Human-readable name (e.g. "GitHub").
    pub title: String,
}

impl ProviderInfo {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }

    /// Reject metadata that cannot address a backend route.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AuthError::Config("Provider id must not be empty".to_string()));
        }
        if self.id.contains(['/', '?', '#']) || self.id.contains(char::is_whitespace) {
            return Err(AuthError::Config(format!(
                "Provider id '{}' must be a single path segment",
                self.id
            )));
        }
        if self.title.trim().is_empty() {
            return Err(AuthError::Config(format!(
                "Provider '{}' must have a title",
                self.id
            )));
        }
        Ok(())
    }
}
