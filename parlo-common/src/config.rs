//! Configuration loading and config file resolution
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `PARLO_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/parlo/config.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing file is not an error: a warning is logged and defaults are
//! used. A file that exists but cannot be parsed or validated is.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "PARLO_CONFIG";

/// Longest retry wait accepted from config (one day)
pub const MAX_RETRY_INTERVAL_SECS: f64 = 86_400.0;

/// Root of the TOML configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,
    pub backend: BackendConfig,
    pub session: SessionConfig,
    pub connectivity: ConnectivityConfig,
    pub retry: RetryConfig,
    pub health: HealthConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Hosted backend (BaaS) connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL, e.g. `https://project.example.co`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Public API key sent as the `apikey` header
    #[serde(default)]
    pub api_key: Option<String>,

    /// Path probed by the reachability check
    #[serde(default = "default_probe_path")]
    pub probe_path: String,

    /// Reachability probe timeout
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Timeout for session/profile requests
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            probe_path: default_probe_path(),
            probe_timeout_secs: default_probe_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl BackendConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Locally stored session
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Bearer token of the signed-in user; absent means signed out
    #[serde(default)]
    pub access_token: Option<String>,

    /// Id of the signed-in user
    #[serde(default)]
    pub user_id: Option<String>,

    /// Table holding user profiles
    #[serde(default = "default_profiles_table")]
    pub profiles_table: String,

    /// Where the synced profile is cached
    #[serde(default)]
    pub profile_cache_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            user_id: None,
            profiles_table: default_profiles_table(),
            profile_cache_path: None,
        }
    }
}

/// Passive network path observation
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
    /// `host:port` connected to for generic path reachability.
    /// Derived from `backend.base_url` when absent.
    #[serde(default)]
    pub path_probe_addr: Option<String>,

    #[serde(default = "default_path_poll_interval_secs")]
    pub path_poll_interval_secs: u64,

    #[serde(default = "default_path_connect_timeout_secs")]
    pub path_connect_timeout_secs: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            path_probe_addr: None,
            path_poll_interval_secs: default_path_poll_interval_secs(),
            path_connect_timeout_secs: default_path_connect_timeout_secs(),
        }
    }
}

/// Offline retry backoff
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_interval_secs")]
    pub initial_interval_secs: f64,

    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: f64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_secs: default_initial_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            multiplier: default_multiplier(),
        }
    }
}

/// Admin health-check service
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_port")]
    pub listen_port: u16,

    /// Bearer secret the cron caller must present
    #[serde(default)]
    pub cron_secret: Option<String>,

    /// Consecutive failures before an endpoint is alerted
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Minimum gap between two down alerts for the same endpoint
    #[serde(default = "default_alert_cooldown_secs")]
    pub alert_cooldown_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    #[serde(default)]
    pub sms: Option<SmsConfig>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            listen_port: default_health_port(),
            cron_secret: None,
            failure_threshold: default_failure_threshold(),
            alert_cooldown_secs: default_alert_cooldown_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            endpoints: Vec::new(),
            sms: None,
        }
    }
}

/// One monitored endpoint
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
}

/// SMS gateway for operator alerts
#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
    pub url: String,
    pub token: String,
    /// Recipient phone number
    pub to: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:54321".to_string()
}

fn default_probe_path() -> String {
    "/rest/v1/".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    8
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_profiles_table() -> String {
    "profiles".to_string()
}

fn default_path_poll_interval_secs() -> u64 {
    5
}

fn default_path_connect_timeout_secs() -> u64 {
    3
}

fn default_initial_interval_secs() -> f64 {
    3.0
}

fn default_max_interval_secs() -> f64 {
    30.0
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_health_port() -> u16 {
    5790
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_alert_cooldown_secs() -> u64 {
    3600
}

impl TomlConfig {
    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit file
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Resolve the config file and load it, falling back to defaults
    ///
    /// An explicitly named file (CLI or environment) that does not exist is
    /// still only a warning; the service starts on defaults.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::load_file(&path)
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject values the bootstrap core cannot run with
    pub fn validate(&self) -> Result<()> {
        let retry = &self.retry;
        if !(retry.initial_interval_secs.is_finite() && retry.initial_interval_secs > 0.0) {
            return Err(Error::Config(
                "retry.initial_interval_secs must be positive".to_string(),
            ));
        }
        if !retry.max_interval_secs.is_finite()
            || retry.max_interval_secs < retry.initial_interval_secs
        {
            return Err(Error::Config(
                "retry.max_interval_secs must be >= retry.initial_interval_secs".to_string(),
            ));
        }
        if retry.max_interval_secs > MAX_RETRY_INTERVAL_SECS {
            return Err(Error::Config(format!(
                "retry.max_interval_secs must be <= {}",
                MAX_RETRY_INTERVAL_SECS
            )));
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(Error::Config("retry.multiplier must be >= 1.0".to_string()));
        }
        if self.backend.probe_timeout_secs == 0 {
            return Err(Error::Config(
                "backend.probe_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.health.failure_threshold == 0 {
            return Err(Error::Config(
                "health.failure_threshold must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolve which config file to read, without touching its contents
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    let user_config = dirs::config_dir().map(|d| d.join("parlo").join("config.toml"));
    match user_config {
        Some(path) if path.exists() => Some(path),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = TomlConfig::from_toml_str("").expect("empty config is valid");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.retry.initial_interval_secs, 3.0);
        assert_eq!(config.retry.max_interval_secs, 30.0);
        assert_eq!(config.retry.multiplier, 1.5);
        assert_eq!(config.backend.probe_timeout_secs, 8);
        assert_eq!(config.health.failure_threshold, 3);
        assert!(config.health.endpoints.is_empty());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [retry]
            max_interval_secs = 60.0
            "#,
        )
        .unwrap();
        assert_eq!(config.retry.initial_interval_secs, 3.0);
        assert_eq!(config.retry.max_interval_secs, 60.0);
    }

    #[test]
    fn test_rejects_inverted_intervals() {
        let err = TomlConfig::from_toml_str(
            r#"
            [retry]
            initial_interval_secs = 10.0
            max_interval_secs = 5.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_shrinking_multiplier() {
        let err = TomlConfig::from_toml_str("[retry]\nmultiplier = 0.5\n").unwrap_err();
        assert!(err.to_string().contains("multiplier"));
    }

    #[test]
    fn test_rejects_oversized_max_interval() {
        let err = TomlConfig::from_toml_str(
            r#"
            [retry]
            initial_interval_secs = 1e20
            max_interval_secs = 1e20
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_interval_secs"));

        let config = TomlConfig::from_toml_str("[retry]\nmax_interval_secs = 86400.0\n").unwrap();
        assert_eq!(config.retry.max_interval_secs, MAX_RETRY_INTERVAL_SECS);
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = TomlConfig::from_toml_str("[retry\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_cli_path_wins() {
        let path = PathBuf::from("/tmp/parlo-cli.toml");
        assert_eq!(resolve_config_path(Some(&path)), Some(path));
    }
}
