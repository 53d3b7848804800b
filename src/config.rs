use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::connector::ProviderInfo;
use crate::error::AuthError;

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "backend.api_origin") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// Get all overrides as a map of setting key -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

/// Where the auth backend lives.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default = "default_api_origin")]
    pub api_origin: String,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Backend environment the provider apps are registered for.
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_origin: default_api_origin(),
            base_path: default_base_path(),
            environment: default_environment(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Refresh once less than this many seconds of lifetime remain.
    #[serde(default = "default_refresh_window_secs")]
    pub refresh_window_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_window_secs: default_refresh_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub github: GithubProviderConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubProviderConfig {
    #[serde(default = "default_github_id")]
    pub id: String,
    #[serde(default = "default_github_title")]
    pub title: String,
    #[serde(default = "default_github_scopes")]
    pub default_scopes: Vec<String>,
}

impl Default for GithubProviderConfig {
    fn default() -> Self {
        Self {
            id: default_github_id(),
            title: default_github_title(),
            default_scopes: default_github_scopes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_api_origin() -> String {
    "http://localhost:7000".to_string()
}
fn default_base_path() -> String {
    "/api/auth".to_string()
}
fn default_environment() -> String {
    "dev".to_string()
}
const fn default_timeout_secs() -> u64 {
    30
}
const fn default_refresh_window_secs() -> u64 {
    300
}
fn default_github_id() -> String {
    "github".to_string()
}
fn default_github_title() -> String {
    "GitHub".to_string()
}
fn default_github_scopes() -> Vec<String> {
    vec!["user".to_string()]
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading, env overrides, and validation
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `TOKENWARD_` takes precedence over
    /// the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Save the current (file-level) configuration to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the settings that cannot be corrected later at request time.
    pub fn validate(&self) -> Result<(), AuthError> {
        let origin = url::Url::parse(&self.backend.api_origin).map_err(|e| {
            AuthError::Config(format!(
                "Invalid backend.api_origin '{}': {e}",
                self.backend.api_origin
            ))
        })?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(AuthError::Config(format!(
                "backend.api_origin must be http or https, got '{}'",
                origin.scheme()
            )));
        }
        if !self.backend.base_path.starts_with('/') {
            return Err(AuthError::Config(format!(
                "backend.base_path '{}' must start with '/'",
                self.backend.base_path
            )));
        }
        if self.session.refresh_window_secs == 0 {
            return Err(AuthError::Config(
                "session.refresh_window_secs must be greater than zero".to_string(),
            ));
        }
        if i64::try_from(self.session.refresh_window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .is_none()
        {
            return Err(AuthError::Config(format!(
                "session.refresh_window_secs {} is out of range",
                self.session.refresh_window_secs
            )));
        }

        let github = &self.providers.github;
        ProviderInfo::new(&github.id, &github.title).validate()
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Every supported setting has a corresponding `TOKENWARD_*` env var. When
    /// set, the env var value replaces the file/default value and the setting
    /// key is recorded in `env_overrides`.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }

        // -- Backend --
        env_str!(
            "backend.api_origin",
            "TOKENWARD_API_ORIGIN",
            self.backend.api_origin
        );
        env_str!(
            "backend.base_path",
            "TOKENWARD_BASE_PATH",
            self.backend.base_path
        );
        env_str!(
            "backend.environment",
            "TOKENWARD_ENVIRONMENT",
            self.backend.environment
        );
        env_parse!(
            "backend.timeout_secs",
            "TOKENWARD_TIMEOUT_SECS",
            self.backend.timeout_secs
        );

        // -- Session --
        env_parse!(
            "session.refresh_window_secs",
            "TOKENWARD_REFRESH_WINDOW_SECS",
            self.session.refresh_window_secs
        );

        // -- Providers --
        env_str!(
            "providers.github.id",
            "TOKENWARD_GITHUB_ID",
            self.providers.github.id
        );
        env_str!(
            "providers.github.title",
            "TOKENWARD_GITHUB_TITLE",
            self.providers.github.title
        );
        if let Ok(val) = std::env::var("TOKENWARD_GITHUB_DEFAULT_SCOPES") {
            self.providers.github.default_scopes = val
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            ov.record(
                "providers.github.default_scopes",
                "TOKENWARD_GITHUB_DEFAULT_SCOPES",
            );
        }

        // -- Logging --
        env_str!("logging.level", "TOKENWARD_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "TOKENWARD_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backend.api_origin, "http://localhost:7000");
        assert_eq!(config.backend.base_path, "/api/auth");
        assert_eq!(config.backend.environment, "dev");
        assert_eq!(config.backend.timeout_secs, 30);
        assert_eq!(config.session.refresh_window_secs, 300);
        assert_eq!(config.providers.github.id, "github");
        assert_eq!(config.providers.github.title, "GitHub");
        assert_eq!(config.providers.github.default_scopes, vec!["user"]);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_tracking() {
        let mut ov = EnvOverrides::default();
        assert!(!ov.is_overridden("backend.api_origin"));
        assert!(ov.env_var_for("backend.api_origin").is_none());

        ov.record("backend.api_origin", "TOKENWARD_API_ORIGIN");
        assert!(ov.is_overridden("backend.api_origin"));
        assert_eq!(
            ov.env_var_for("backend.api_origin"),
            Some("TOKENWARD_API_ORIGIN")
        );
        assert_eq!(ov.all().len(), 1);
    }

    #[test]
    fn test_env_override_applies() {
        // SAFETY: Tests are run sequentially for env-mutating tests.
        unsafe {
            std::env::set_var("TOKENWARD_API_ORIGIN", "https://auth.example.com");
            std::env::set_var("TOKENWARD_GITHUB_ID", "github-enterprise");
            std::env::set_var("TOKENWARD_GITHUB_DEFAULT_SCOPES", "user, read:org");
            std::env::set_var("TOKENWARD_LOG_JSON", "yes");
        }

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.backend.api_origin, "https://auth.example.com");
        assert_eq!(config.providers.github.id, "github-enterprise");
        assert_eq!(
            config.providers.github.default_scopes,
            vec!["user", "read:org"]
        );
        assert!(config.logging.json);

        assert!(config.env_overrides.is_overridden("backend.api_origin"));
        assert!(config.env_overrides.is_overridden("providers.github.id"));
        assert!(!config.env_overrides.is_overridden("backend.environment"));

        unsafe {
            std::env::remove_var("TOKENWARD_API_ORIGIN");
            std::env::remove_var("TOKENWARD_GITHUB_ID");
            std::env::remove_var("TOKENWARD_GITHUB_DEFAULT_SCOPES");
            std::env::remove_var("TOKENWARD_LOG_JSON");
        }
    }

    #[test]
    fn test_env_parse_ignores_garbage() {
        // SAFETY: Tests are run sequentially for env-mutating tests.
        unsafe { std::env::set_var("TOKENWARD_TIMEOUT_SECS", "soon"); }
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.backend.timeout_secs, 30);
        assert!(!config.env_overrides.is_overridden("backend.timeout_secs"));
        unsafe { std::env::remove_var("TOKENWARD_TIMEOUT_SECS"); }
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = Config::default();
        config.backend.api_origin = "not a url".to_string();
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));

        let mut config = Config::default();
        config.backend.api_origin = "ftp://files.example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.refresh_window_secs = 0;
        assert!(config.validate().is_err());

        for secs in [u64::MAX, i64::MAX as u64] {
            let mut config = Config::default();
            config.session.refresh_window_secs = secs;
            assert!(matches!(config.validate(), Err(AuthError::Config(_))));
        }

        let mut config = Config::default();
        config.providers.github.id = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.providers.github.title = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_load_missing_file() {
        let path = Path::new("/tmp/nonexistent_tokenward_config_test.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.session.refresh_window_secs, 300);
    }

    #[test]
    fn test_config_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.toml");
        std::fs::write(
            &path,
            r#"
[backend]
base_path = "/auth"
environment = "prod"
timeout_secs = 10

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.backend.base_path, "/auth");
        assert_eq!(config.backend.environment, "prod");
        assert_eq!(config.backend.timeout_secs, 10);
        assert_eq!(config.providers.github.title, "GitHub");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_config_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("save_test.toml");

        let mut config = Config::default();
        config.backend.environment = "staging".to_string();
        config.session.refresh_window_secs = 600;
        config.save(&path).unwrap();

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.backend.environment, "staging");
        assert_eq!(reloaded.session.refresh_window_secs, 600);
    }
}
