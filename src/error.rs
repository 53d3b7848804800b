//! Error taxonomy shared by connectors, the session manager and provider facades.

/// Errors that can occur while obtaining or refreshing a session.
///
/// The type is `Clone` because a single connector outcome is handed to every
/// caller that was coalesced onto the same in-flight operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The user cancelled the interactive flow or the provider rejected it.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A silent refresh is not possible; the caller must re-authenticate interactively.
    #[error("Refresh failed: {0}")]
    RefreshFailed(String),

    /// Transport-level failure talking to the identity provider.
    #[error("Network error: {0}")]
    Network(String),

    /// An optional request could not be satisfied without user interaction.
    #[error("Session unavailable")]
    SessionUnavailable,

    /// Invalid configuration supplied at construction time.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl AuthError {
    /// Whether repeating the same call may succeed without user involvement.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        tracing::warn!(error = %err, "HTTP client error");
        Self::Network(err.to_string())
    }
}

impl From<url::ParseError> for AuthError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("Invalid URL: {err}"))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AuthError>;
