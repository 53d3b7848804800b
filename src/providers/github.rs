//! GitHub provider facade.
//!
//! # Key Characteristics
//! - Default scope set: `user`
//! - Sessions carry an access token, an ID token, the granted scopes and an
//!   absolute expiry computed from `expiresInSeconds`
//! - Sessions are refreshed once less than 5 minutes of lifetime remain
//!
//! The auth backend answers both the authorization page and the refresh route
//! with the same camelCase JSON body:
//!
//! ```text
//! { "accessToken": "..", "idToken": "..", "scope": "repo user", "expiresInSeconds": 3600 }
//! ```

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use url::Url;

use super::OAuthApi;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::connector::{
    AuthConnector, AuthorizationRequester, DefaultAuthConnector, DefaultConnectorOptions,
    ProviderInfo,
};
use crate::error::{AuthError, Result};
use crate::scope::{ScopeInput, ScopeSet, normalize_scopes};
use crate::session::policy::DEFAULT_REFRESH_WINDOW_SECS;
use crate::session::{
    RefreshPolicy, RefreshingSessionManager, SessionManagerOptions, SessionRequest, SessionState,
};

/// Provider identifier for GitHub.
pub const PROVIDER_ID: &str = "github";

/// Display title for GitHub.
pub const PROVIDER_TITLE: &str = "GitHub";

/// Scopes every GitHub session carries.
const DEFAULT_SCOPES: &[&str] = &["user"];

/// A cached GitHub session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubSession {
    pub access_token: String,
    pub id_token: String,
    pub scopes: ScopeSet,
    pub expires_at: DateTime<Utc>,
}

/// Body returned by the auth backend for GitHub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubAuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: String,
    /// Granted scopes, space separated.
    #[serde(default)]
    pub scope: String,
    pub expires_in_seconds: i64,
}

impl GithubAuthResponse {
    /// Normalize the response into a session relative to `now`.
    ///
    /// Fails when `expiresInSeconds` does not describe a representable instant.
    pub fn into_session(self, now: DateTime<Utc>) -> Result<GithubSession> {
        let expires_at = Duration::try_seconds(self.expires_in_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                AuthError::Other(format!(
                    "expiresInSeconds out of range: {}",
                    self.expires_in_seconds
                ))
            })?;

        Ok(GithubSession {
            access_token: self.access_token,
            id_token: self.id_token,
            scopes: normalize_scopes(self.scope),
            expires_at,
        })
    }
}

/// Options for [`GithubAuth::create`].
#[derive(Clone)]
pub struct GithubAuthOptions {
    pub api_origin: Url,
    pub base_path: String,
    pub environment: String,
    pub provider: ProviderInfo,
    pub default_scopes: ScopeSet,
    pub refresh_window: Duration,
    pub timeout: StdDuration,
    pub clock: Arc<dyn Clock>,
    pub requester: Arc<dyn AuthorizationRequester>,
}

impl GithubAuthOptions {
    /// Options with GitHub defaults against the given auth backend.
    pub fn new(api_origin: Url, requester: Arc<dyn AuthorizationRequester>) -> Self {
        Self {
            api_origin,
            base_path: "/api/auth".to_string(),
            environment: "dev".to_string(),
            provider: ProviderInfo::new(PROVIDER_ID, PROVIDER_TITLE),
            default_scopes: DEFAULT_SCOPES.iter().collect(),
            refresh_window: Duration::seconds(DEFAULT_REFRESH_WINDOW_SECS),
            timeout: StdDuration::from_secs(30),
            clock: Arc::new(SystemClock),
            requester,
        }
    }

    /// Options taken from the application config.
    pub fn from_config(config: &Config, requester: Arc<dyn AuthorizationRequester>) -> Result<Self> {
        config.validate()?;
        let github = &config.providers.github;
        Ok(Self {
            api_origin: Url::parse(&config.backend.api_origin)?,
            base_path: config.backend.base_path.clone(),
            environment: config.backend.environment.clone(),
            provider: ProviderInfo::new(&github.id, &github.title),
            default_scopes: github.default_scopes.iter().collect(),
            refresh_window: refresh_window(config.session.refresh_window_secs)?,
            timeout: StdDuration::from_secs(config.backend.timeout_secs),
            clock: Arc::new(SystemClock),
            requester,
        })
    }

    /// Use a different time source (tests, simulations).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for GithubAuthOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubAuthOptions")
            .field("api_origin", &self.api_origin.as_str())
            .field("base_path", &self.base_path)
            .field("environment", &self.environment)
            .field("provider", &self.provider)
            .field("default_scopes", &self.default_scopes)
            .field("refresh_window_secs", &self.refresh_window.num_seconds())
            .finish()
    }
}

/// Convert a configured window in seconds, rejecting values chrono cannot hold.
fn refresh_window(secs: u64) -> Result<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| AuthError::Config(format!("Refresh window out of range: {secs}s")))
}

/// GitHub access tokens for application code.
#[derive(Debug, Clone)]
pub struct GithubAuth {
    manager: RefreshingSessionManager<GithubSession>,
}

impl GithubAuth {
    /// Wire the default HTTP connector and a refreshing session manager.
    pub fn create(options: GithubAuthOptions) -> Result<Self> {
        if options.refresh_window <= Duration::zero() {
            return Err(AuthError::Config(
                "Refresh window must be positive".to_string(),
            ));
        }

        let transform_clock = Arc::clone(&options.clock);
        let mut connector_options =
            DefaultConnectorOptions::new(options.api_origin, options.provider);
        connector_options.base_path = options.base_path;
        connector_options.environment = options.environment;
        connector_options.timeout = options.timeout;

        let connector = DefaultAuthConnector::new(
            connector_options,
            options.requester,
            move |response: GithubAuthResponse| response.into_session(transform_clock.now()),
        )?;

        let policy = RefreshPolicy::new(options.refresh_window, options.clock);
        Ok(Self::from_connector(
            Arc::new(connector),
            options.default_scopes,
            policy,
        ))
    }

    /// Build on any connector producing GitHub sessions.
    pub fn from_connector(
        connector: Arc<dyn AuthConnector<GithubSession>>,
        default_scopes: ScopeSet,
        policy: RefreshPolicy,
    ) -> Self {
        let manager = RefreshingSessionManager::new(SessionManagerOptions {
            connector,
            default_scopes,
            session_scopes: Arc::new(|session: &GithubSession| session.scopes.clone()),
            session_should_refresh: policy.into_predicate(|session: &GithubSession| {
                session.expires_at
            }),
        });
        Self::new(manager)
    }

    pub fn new(manager: RefreshingSessionManager<GithubSession>) -> Self {
        Self { manager }
    }

    /// Get an access token for `scope` (plus the default `user` scope).
    ///
    /// Accepts a single scope, a space-separated string, a list, or nothing.
    pub async fn get_access_token(&self, scope: impl Into<ScopeInput>) -> Result<String> {
        let scopes = normalize_scopes(scope);
        let session = self
            .manager
            .get_session(SessionRequest::required(scopes))
            .await?
            .ok_or(AuthError::SessionUnavailable)?;
        Ok(session.access_token)
    }

    pub fn logout(&self) {
        self.manager.remove_session();
    }

    pub fn session_state(&self) -> watch::Receiver<SessionState> {
        self.manager.session_state()
    }

    pub fn session_manager(&self) -> &RefreshingSessionManager<GithubSession> {
        &self.manager
    }
}

#[async_trait::async_trait]
impl OAuthApi for GithubAuth {
    async fn get_access_token(&self, scope: ScopeInput) -> Result<String> {
        GithubAuth::get_access_token(self, scope).await
    }

    fn logout(&self) {
        GithubAuth::logout(self)
    }
}
