//! Provider facades.
//!
//! Each provider wires its default scopes, metadata and session shape onto a
//! [`RefreshingSessionManager`](crate::session::RefreshingSessionManager) and
//! exposes the minimal [`OAuthApi`] surface to application code.

pub mod github;

pub use github::{GithubAuth, GithubAuthOptions, GithubAuthResponse, GithubSession};

use crate::error::Result;
use crate::scope::ScopeInput;

/// Access-token surface shared by all provider facades.
///
/// Dyn-compatible so application code can hold `Arc<dyn OAuthApi>` without
/// knowing which provider sits behind it.
#[async_trait::async_trait]
pub trait OAuthApi: Send + Sync {
    /// Get an access token carrying at least `scope` plus the provider defaults.
    ///
    /// May prompt the user interactively.
    async fn get_access_token(&self, scope: ScopeInput) -> Result<String>;

    /// Forget the local session.
    fn logout(&self);
}
