//! OAuth session lifecycle management.
//!
//! Keeps one cached session per identity provider, refreshes it before it
//! expires, grows its scope set on demand, and coalesces concurrent callers
//! onto a single in-flight provider round trip.
//!
//! - [`session`] - the refreshing session manager
//! - [`connector`] - the provider round trip and its HTTP auth-backend implementation
//! - [`providers`] - provider facades (GitHub)

pub mod clock;
pub mod config;
pub mod connector;
pub mod error;
pub mod providers;
pub mod scope;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use connector::{AuthConnector, AuthorizationRequester, DefaultAuthConnector, ProviderInfo};
pub use error::{AuthError, Result};
pub use providers::{GithubAuth, GithubAuthOptions, GithubSession, OAuthApi};
pub use scope::{ScopeInput, ScopeSet, normalize_scopes};
pub use session::{
    RefreshPolicy, RefreshingSessionManager, SessionManager, SessionManagerOptions,
    SessionRequest, SessionState,
};
