use crate::catalog::CollectionScope;
use crate::core::{Result, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::env;
use std::time::Duration;
use tracing::warn;

/// Environment variable holding the application identifier.
pub const APP_ID_VAR: &str = "SOAPSTOCK_APP_ID";
/// Environment variable holding the JSON backend configuration blob.
pub const BACKEND_CONFIG_VAR: &str = "SOAPSTOCK_BACKEND_CONFIG";
/// Environment variable holding an optional pre-issued auth token.
pub const AUTH_TOKEN_VAR: &str = "SOAPSTOCK_AUTH_TOKEN";

pub const DEFAULT_APP_ID: &str = "default-app-id";

/// Which document store the application talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process realtime store.
    #[default]
    Memory,
    /// Conventional REST backend, polled for changes.
    Rest,
}

/// Backend connection settings parsed from the configuration blob.
///
/// Unknown keys are kept in `extra` untouched, so provider-specific settings
/// pass through to whoever needs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub backend: BackendKind,

    /// Base URL of the REST backend, e.g. `http://localhost:8080/api`
    pub base_url: Option<String>,

    /// Poll period of REST change listeners
    pub poll_interval_ms: u64,

    /// Per-request timeout of the REST client
    pub timeout_ms: u64,

    /// Collection scoping policy
    pub scope: CollectionScope,

    #[serde(flatten)]
    pub extra: JsonMap<String, JsonValue>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            base_url: None,
            poll_interval_ms: 2_000,
            timeout_ms: 10_000,
            scope: CollectionScope::Public,
            extra: JsonMap::new(),
        }
    }
}

impl BackendConfig {
    /// Configuration for a REST backend at `base_url`, using flat collection paths.
    pub fn rest(base_url: &str) -> Self {
        Self {
            backend: BackendKind::Rest,
            base_url: Some(base_url.to_string()),
            scope: CollectionScope::Flat,
            ..Self::default()
        }
    }

    /// Parses the JSON blob. Blank input yields the default configuration.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| StoreError::MalformedConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn scope(mut self, scope: CollectionScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend == BackendKind::Rest && self.base_url.as_deref().is_none_or(str::is_empty) {
            return Err(StoreError::MalformedConfiguration(
                "REST backend requires 'base_url'".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(StoreError::MalformedConfiguration(
                "'poll_interval_ms' must be > 0".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(StoreError::MalformedConfiguration(
                "'timeout_ms' must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Application configuration supplied by the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub app_id: String,
    pub backend: BackendConfig,
    pub auth_token: Option<String>,
}

impl AppConfig {
    pub fn new(app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            backend: BackendConfig::default(),
            auth_token: None,
        }
    }

    pub fn backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_string());
        self
    }

    /// Assembles the configuration from raw environment values.
    ///
    /// A malformed backend blob does not abort startup: it is logged and
    /// replaced by the default configuration. Blank tokens count as absent.
    pub fn from_parts(
        app_id: Option<&str>,
        raw_backend: Option<&str>,
        token: Option<&str>,
    ) -> Self {
        let app_id = app_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(DEFAULT_APP_ID);

        let backend = match BackendConfig::parse(raw_backend.unwrap_or_default()) {
            Ok(backend) => backend,
            Err(err) => {
                warn!(error = %err, "ignoring backend configuration, using defaults");
                BackendConfig::default()
            }
        };

        let auth_token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string);

        Self {
            app_id: app_id.to_string(),
            backend,
            auth_token,
        }
    }

    /// Reads `SOAPSTOCK_*` variables, loading a `.env` file first when present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let app_id = env::var(APP_ID_VAR).ok();
        let raw_backend = env::var(BACKEND_CONFIG_VAR).ok();
        let token = env::var(AUTH_TOKEN_VAR).ok();

        Self::from_parts(app_id.as_deref(), raw_backend.as_deref(), token.as_deref())
    }

    pub fn validate(&self) -> Result<()> {
        if self.app_id.is_empty() || self.app_id.contains('/') {
            return Err(StoreError::MalformedConfiguration(format!(
                "app id '{}' must be non-empty and contain no '/'",
                self.app_id
            )));
        }
        self.backend.validate()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new(DEFAULT_APP_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.app_id, "default-app-id");
        assert_eq!(config.backend.backend, BackendKind::Memory);
        assert_eq!(config.backend.scope, CollectionScope::Public);
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_parse_rest_blob_keeps_extra_keys() {
        let config = BackendConfig::parse(
            r#"{"backend":"rest","base_url":"http://localhost:8080/api",
                "scope":"flat","projectId":"demo"}"#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Rest);
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8080/api"));
        assert_eq!(config.scope, CollectionScope::Flat);
        assert_eq!(config.extra.get("projectId"), Some(&JsonValue::from("demo")));
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_malformed_blob_is_an_error() {
        let err = BackendConfig::parse("{not json").unwrap_err();
        assert!(matches!(err, StoreError::MalformedConfiguration(_)));

        let err = BackendConfig::parse(r#"{"backend":"rest"}"#).unwrap_err();
        assert!(matches!(err, StoreError::MalformedConfiguration(_)));
    }

    #[test]
    fn test_from_parts_degrades_to_default() {
        let config = AppConfig::from_parts(Some("inventario"), Some("{broken"), Some("  "));
        assert_eq!(config.app_id, "inventario");
        assert_eq!(config.backend, BackendConfig::default());
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_from_parts_defaults_app_id() {
        let config = AppConfig::from_parts(None, None, Some("tok"));
        assert_eq!(config.app_id, DEFAULT_APP_ID);
        assert_eq!(config.auth_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_validate() {
        assert!(AppConfig::new("app").validate().is_ok());
        assert!(AppConfig::new("").validate().is_err());
        assert!(AppConfig::new("a/b").validate().is_err());
    }
}
