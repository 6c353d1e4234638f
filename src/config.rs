//! Configuration loading and constants.
//!
//! Loads application configuration from TOML files and defines constants for
//! the status routes, keyword validation limits, run-mode port selection,
//! logging defaults, and default paths. `AppConfig` is the root configuration
//! struct containing all settings, including the deployment topology.

use const_format::concatcp;
use serde::Deserialize;
use std::path::Path;

use crate::deploy::DeploymentTopology;

// =============================================================================
// Status Routes
// =============================================================================

/// Body returned by the status routes
pub const STATUS_BODY: &str = "Up and running";

/// Path probed by the load balancer and the container health check
pub const STATUS_PATH: &str = "/status";

/// Secondary status path, kept for smoke tests
pub const TEST_PATH: &str = "/test";

/// Health probes must always reach the process
pub const CACHE_CONTROL_STATUS: &str = "no-store";

// =============================================================================
// Keyword Route Validation
// =============================================================================

/// Path parameter captured by the keyword route
pub const KEYWORD_PARAM: &str = "keyword";

/// Optional query parameter accepted by the keyword route
pub const OPTIONAL_QUERY_PARAM: &str = "optionalParameter1";

/// Keyword length bounds (characters)
pub const KEYWORD_MIN_LENGTH: usize = 1;
pub const KEYWORD_MAX_LENGTH: usize = 10;

/// Maximum length of the optional query parameter (characters)
pub const OPTIONAL_QUERY_MAX_LENGTH: usize = 10;

/// Route pattern for the keyword lookup
pub const KEYWORD_ROUTE: &str = concatcp!("/{", KEYWORD_PARAM, "}");

// =============================================================================
// Run Mode / Port Selection
// =============================================================================

/// Environment variable selecting the run mode
pub const RUN_MODE_ENV_VAR: &str = "APP_ENV";

/// Run mode value that selects the production port
pub const PRODUCTION_MODE: &str = "prod";

/// Port used in production mode
pub const PRODUCTION_PORT: u16 = 80;

/// Port used in every other mode
pub const DEVELOPMENT_PORT: u16 = 3000;

/// Seconds to wait for in-flight requests during graceful shutdown
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "starter_kit_api=debug,tower_http=debug";

/// Default bind address
pub const DEFAULT_HTTP_HOST: &str = "0.0.0.0";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub http: HttpServerConfig,
    /// Which routes are mounted
    #[serde(default)]
    pub routes: RouteConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Container cluster, load balancer and delivery pipeline
    #[serde(default)]
    pub deployment: DeploymentTopology,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "HttpServerConfig::default_host")]
    pub host: String,
    /// Explicit port. When absent the port follows the run mode.
    pub port: Option<u16>,
    #[serde(default = "HttpServerConfig::default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: None,
            shutdown_grace_seconds: Self::default_shutdown_grace(),
        }
    }
}

impl HttpServerConfig {
    fn default_host() -> String {
        DEFAULT_HTTP_HOST.to_string()
    }

    fn default_shutdown_grace() -> u64 {
        DEFAULT_SHUTDOWN_GRACE_SECS
    }

    /// Get effective port (configured or run-mode default)
    pub fn port(&self, mode: RunMode) -> u16 {
        self.port.unwrap_or_else(|| mode.default_port())
    }
}

/// Process run mode, selected by [`RUN_MODE_ENV_VAR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Production,
    Development,
}

impl RunMode {
    /// Read the run mode from the environment.
    pub fn from_env() -> Self {
        Self::from_value(std::env::var(RUN_MODE_ENV_VAR).ok().as_deref())
    }

    pub fn from_value(value: Option<&str>) -> Self {
        match value {
            Some(PRODUCTION_MODE) => RunMode::Production,
            _ => RunMode::Development,
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            RunMode::Production => PRODUCTION_PORT,
            RunMode::Development => DEVELOPMENT_PORT,
        }
    }
}

/// Route toggles
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    /// Mount the validated keyword echo route (default: true)
    #[serde(default = "RouteConfig::default_keyword_lookup")]
    pub keyword_lookup: bool,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            keyword_lookup: Self::default_keyword_lookup(),
        }
    }
}

impl RouteConfig {
    fn default_keyword_lookup() -> bool {
        true
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: Self::default_format(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> LogFormat {
        LogFormat::Text
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;

        config
            .deployment
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        Ok(config)
    }

    /// Load from an explicit path, or from [`DEFAULT_CONFIG_PATH`] when it
    /// exists, falling back to built-in defaults.
    pub fn load_or_default(path: Option<&str>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_keyword_route_pattern() {
        assert_eq!(KEYWORD_ROUTE, "/{keyword}");
    }

    #[test]
    fn test_run_mode_prod_selects_port_80() {
        assert_eq!(RunMode::from_value(Some("prod")), RunMode::Production);
        assert_eq!(RunMode::Production.default_port(), 80);
    }

    #[test]
    fn test_run_mode_anything_else_selects_port_3000() {
        for value in [None, Some("dev"), Some("production"), Some("")] {
            let mode = RunMode::from_value(value);
            assert_eq!(mode, RunMode::Development);
            assert_eq!(mode.default_port(), 3000);
        }
    }

    #[test]
    fn test_explicit_port_overrides_run_mode() {
        let http = HttpServerConfig {
            port: Some(8080),
            ..Default::default()
        };
        assert_eq!(http.port(RunMode::Production), 8080);
        assert_eq!(HttpServerConfig::default().port(RunMode::Production), 80);
    }

    #[test]
    fn test_load_empty_file_uses_defaults() {
        let file = write_config("");
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.http.host, DEFAULT_HTTP_HOST);
        assert!(config.http.port.is_none());
        assert!(config.routes.keyword_lookup);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.deployment.service.max_replicas, 2);
    }

    #[test]
    fn test_load_overrides() {
        let file = write_config(
            r#"
            [http]
            host = "127.0.0.1"
            port = 4000

            [routes]
            keyword_lookup = false

            [logging]
            format = "json"

            [deployment]
            stack_name = "Demo"
            "#,
        );
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.http.host, "127.0.0.1");
        assert_eq!(config.http.port, Some(4000));
        assert!(!config.routes.keyword_lookup);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.deployment.stack_name, "Demo");
    }

    #[test]
    fn test_load_rejects_invalid_topology() {
        let file = write_config(
            r#"
            [deployment.service]
            min_replicas = 3
            max_replicas = 2
            "#,
        );
        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load("/nonexistent/starter-kit.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_load_malformed_file() {
        let file = write_config("[http\nport = ");
        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
