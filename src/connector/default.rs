//! Connector backed by a server-side auth backend.
//!
//! The backend owns provider secrets and exposes two routes per provider:
//!
//! - `GET {origin}{base_path}/{provider}/start?scope=..&env=..` - the page the
//!   authorization UI is pointed at; it finishes by posting the provider
//!   response back to the opener
//! - `GET {origin}{base_path}/{provider}/refresh?optional&scope=..&env=..` -
//!   silent refresh, answered with the provider response as JSON
//!
//! Opening and talking to the authorization UI is left to an
//! [`AuthorizationRequester`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{AuthConnector, ProviderInfo};
use crate::error::{AuthError, Result};
use crate::scope::ScopeSet;

/// Default HTTP timeout for refresh requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Envelope type the authorization page posts back to its opener.
const AUTHORIZATION_RESPONSE_TYPE: &str = "authorization_response";

/// What the requester needs to run one interactive authorization.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationPrompt<'a> {
    pub provider: &'a ProviderInfo,
    /// URL the authorization UI should open.
    pub url: &'a Url,
    pub scopes: &'a ScopeSet,
}

/// Opens the provider's authorization UI and returns its response payload.
///
/// Implementations own the popup/redirect mechanics and any user-facing
/// "sign in to {title}" prompt. A user who declines should be reported as
/// [`AuthError::AuthenticationFailed`].
#[async_trait]
pub trait AuthorizationRequester: Send + Sync {
    async fn authorize(&self, prompt: AuthorizationPrompt<'_>) -> Result<serde_json::Value>;
}

/// Construction options for [`DefaultAuthConnector`].
#[derive(Debug, Clone)]
pub struct DefaultConnectorOptions {
    /// Origin of the auth backend, e.g. `http://localhost:7000`.
    pub api_origin: Url,
    /// Path prefix of the auth routes, e.g. `/api/auth`.
    pub base_path: String,
    /// Backend environment the provider is configured for.
    pub environment: String,
    pub provider: ProviderInfo,
    pub timeout: Duration,
}

impl DefaultConnectorOptions {
    pub fn new(api_origin: Url, provider: ProviderInfo) -> Self {
        Self {
            api_origin,
            base_path: "/api/auth".to_string(),
            environment: "dev".to_string(),
            provider,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// HTTP connector generic over the provider response `R` and session `S`.
///
/// The transform may reject a decoded response it cannot turn into a session
/// (e.g. an expiry that does not fit the clock); the rejection is reported as
/// the failure kind of the flow that produced the response.
pub struct DefaultAuthConnector<R, S> {
    provider: ProviderInfo,
    environment: String,
    /// `{origin}{base_path}/{provider}/`, always with a trailing slash.
    provider_url: Url,
    http_client: reqwest::Client,
    requester: Arc<dyn AuthorizationRequester>,
    transform: Arc<dyn Fn(R) -> Result<S> + Send + Sync>,
}

impl<R, S> DefaultAuthConnector<R, S>
where
    R: DeserializeOwned + Send + 'static,
    S: Send + 'static,
{
    /// Create a connector, validating the provider metadata and backend address.
    pub fn new(
        options: DefaultConnectorOptions,
        requester: Arc<dyn AuthorizationRequester>,
        transform: impl Fn(R) -> Result<S> + Send + Sync + 'static,
    ) -> Result<Self> {
        options.provider.validate()?;

        if !matches!(options.api_origin.scheme(), "http" | "https") {
            return Err(AuthError::Config(format!(
                "Unsupported API origin scheme: {}",
                options.api_origin.scheme()
            )));
        }
        if !options.base_path.starts_with('/') {
            return Err(AuthError::Config(format!(
                "Base path '{}' must start with '/'",
                options.base_path
            )));
        }

        let provider_url = options.api_origin.join(&format!(
            "{}/{}/",
            options.base_path.trim_end_matches('/'),
            options.provider.id
        ))?;

        let http_client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            provider: options.provider,
            environment: options.environment,
            provider_url,
            http_client,
            requester,
            transform: Arc::new(transform),
        })
    }

    /// Replace the HTTP client (custom TLS, proxies, tests).
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = client;
        self
    }

    pub fn provider(&self) -> &ProviderInfo {
        &self.provider
    }

    /// Authorization page URL for `scopes`.
    pub fn start_url(&self, scopes: &ScopeSet) -> Result<Url> {
        let url = self.provider_url.join("start")?;
        Ok(Url::parse(&format!(
            "{}?scope={}&env={}",
            url,
            urlencoding::encode(&scopes.to_scope_string()),
            urlencoding::encode(&self.environment),
        ))?)
    }

    /// Silent refresh URL for `scopes`.
    pub fn refresh_url(&self, scopes: &ScopeSet) -> Result<Url> {
        let url = self.provider_url.join("refresh")?;
        Ok(Url::parse(&format!(
            "{}?optional&scope={}&env={}",
            url,
            urlencoding::encode(&scopes.to_scope_string()),
            urlencoding::encode(&self.environment),
        ))?)
    }
}

#[async_trait]
impl<R, S> AuthConnector<S> for DefaultAuthConnector<R, S>
where
    R: DeserializeOwned + Send + 'static,
    S: Send + 'static,
{
    #[instrument(skip(self), fields(provider = %self.provider.id, scopes = %scopes))]
    async fn create_session(&self, scopes: &ScopeSet) -> Result<S> {
        let url = self.start_url(scopes)?;
        info!("Requesting interactive authorization");

        let payload = self
            .requester
            .authorize(AuthorizationPrompt {
                provider: &self.provider,
                url: &url,
                scopes,
            })
            .await?;

        let payload = unwrap_authorization_envelope(payload);
        if let Some(message) = backend_error(&payload) {
            warn!(error = %message, "Authorization rejected");
            return Err(AuthError::AuthenticationFailed(message));
        }

        let response: R = serde_json::from_value(payload).map_err(|e| {
            AuthError::AuthenticationFailed(format!("Invalid authorization response: {e}"))
        })?;

        let session = (self.transform)(response).map_err(|e| {
            AuthError::AuthenticationFailed(format!("Invalid authorization response: {e}"))
        })?;

        debug!("Interactive authorization completed");
        Ok(session)
    }

    #[instrument(skip(self), fields(provider = %self.provider.id, scopes = %scopes))]
    async fn refresh_session(&self, scopes: &ScopeSet) -> Result<S> {
        let url = self.refresh_url(scopes)?;
        debug!("Requesting silent refresh");

        let response = self
            .http_client
            .get(url)
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_server_error() {
            return Err(AuthError::Network(format!(
                "Auth refresh request failed (HTTP {}): {}",
                status.as_u16(),
                body
            )));
        }
        if !status.is_success() {
            warn!(status = status.as_u16(), "Auth refresh request rejected");
            return Err(AuthError::RefreshFailed(format!(
                "Auth refresh request failed (HTTP {}): {}",
                status.as_u16(),
                body
            )));
        }

        let payload: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            AuthError::RefreshFailed(format!("Failed to parse refresh response: {e}"))
        })?;

        if let Some(message) = backend_error(&payload) {
            warn!(error = %message, "Auth backend refused refresh");
            return Err(AuthError::RefreshFailed(message));
        }

        let response: R = serde_json::from_value(payload).map_err(|e| {
            AuthError::RefreshFailed(format!("Failed to parse refresh response: {e}"))
        })?;

        let session = (self.transform)(response)
            .map_err(|e| AuthError::RefreshFailed(format!("Invalid refresh response: {e}")))?;

        debug!("Silent refresh completed");
        Ok(session)
    }
}

impl<R, S> std::fmt::Debug for DefaultAuthConnector<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultAuthConnector")
            .field("provider", &self.provider.id)
            .field("environment", &self.environment)
            .field("provider_url", &self.provider_url.as_str())
            .finish()
    }
}

/// Strip the `{ "type": "authorization_response", "response": .. }` envelope
/// if the requester passed it through untouched.
fn unwrap_authorization_envelope(mut payload: serde_json::Value) -> serde_json::Value {
    let is_envelope = payload.get("type").and_then(|t| t.as_str())
        == Some(AUTHORIZATION_RESPONSE_TYPE);
    match payload.get_mut("response") {
        Some(inner) if is_envelope => inner.take(),
        _ => payload,
    }
}

/// Extract the message from an `{ "error": .. }` body.
///
/// The backend sends either a bare string or an object with `message`/`name`.
fn backend_error(payload: &serde_json::Value) -> Option<String> {
    let error = payload.get("error")?;
    match error {
        serde_json::Value::Null => None,
        serde_json::Value::String(message) => Some(message.clone()),
        other => Some(
            other
                .get("message")
                .or_else(|| other.get("name"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        ),
    }
}
