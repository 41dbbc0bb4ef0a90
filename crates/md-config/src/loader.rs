//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "dispatcher.toml",
    "./config/config.toml",
    "./config/dispatcher.toml",
    "/etc/dispatcher/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, |key| env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("DISPATCHER_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn split_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Apply `DISPATCHER_*` overrides read through `lookup`.
pub(crate) fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // HTTP
    if let Some(port) = lookup("DISPATCHER_HTTP_PORT").and_then(|v| v.parse().ok()) {
        config.http.port = port;
    }
    if let Some(val) = lookup("DISPATCHER_HTTP_HOST") {
        config.http.host = val;
    }

    // Database
    if let Some(val) = lookup("DISPATCHER_DATABASE_TYPE") {
        config.database.db_type = val;
    }
    if let Some(val) = lookup("DISPATCHER_DATABASE_URL") {
        config.database.url = val;
    }
    if let Some(max) = lookup("DISPATCHER_DATABASE_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
        config.database.max_connections = max;
    }
    if let Some(val) = lookup("DISPATCHER_DATABASE_INIT_SCHEMA") {
        config.database.init_schema = val.parse().unwrap_or(false);
    }

    // Redis
    if let Some(val) = lookup("DISPATCHER_REDIS_TYPE") {
        config.redis.cache_type = val;
    }
    if let Some(val) = lookup("DISPATCHER_REDIS_URL") {
        config.redis.url = val;
    }

    // Gateway
    if let Some(val) = lookup("DISPATCHER_GATEWAY_BASE_URL") {
        config.gateway.base_url = val;
    }
    if let Some(val) = lookup("DISPATCHER_GATEWAY_API_KEY") {
        config.gateway.api_key = val;
    }
    if let Some(val) = lookup("DISPATCHER_GATEWAY_API_KEY_HEADER") {
        config.gateway.api_key_header = val;
    }
    if let Some(ms) = lookup("DISPATCHER_GATEWAY_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.gateway.request_timeout_ms = ms;
    }

    // Poller
    if let Some(secs) = lookup("DISPATCHER_POLL_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        config.poller.poll_interval_secs = secs;
    }
    if let Some(val) = lookup("DISPATCHER_POLLER_AUTO_START") {
        config.poller.auto_start = val.parse().unwrap_or(true);
    }
    if let Some(n) = lookup("DISPATCHER_POLLER_CONCURRENCY").and_then(|v| v.parse().ok()) {
        config.poller.concurrency = n;
    }

    // Auth
    if let Some(val) = lookup("DISPATCHER_AUTH_MODE") {
        config.auth.mode = val.to_ascii_lowercase();
    }
    if let Some(val) = lookup("DISPATCHER_API_USER_CURRENT") {
        config.auth.current_credentials = split_list(&val);
    }
    if let Some(val) = lookup("DISPATCHER_API_USER_PREVIOUS") {
        config.auth.previous_credentials = split_list(&val);
    }

    if let Some(val) = lookup("DISPATCHER_DEV_MODE") {
        config.dev_mode = val.parse().unwrap_or(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, lookup_from(&[
            ("DISPATCHER_HTTP_PORT", "9090"),
            ("DISPATCHER_DATABASE_TYPE", "sqlite"),
            ("DISPATCHER_DATABASE_URL", "sqlite::memory:"),
            ("DISPATCHER_GATEWAY_BASE_URL", "http://provider.test/send"),
            ("DISPATCHER_POLL_INTERVAL_SECS", "30"),
            ("DISPATCHER_POLLER_AUTO_START", "false"),
            ("DISPATCHER_AUTH_MODE", "NONE"),
        ]));

        assert_eq!(config.http.port, 9090);
        assert_eq!(config.database.db_type, "sqlite");
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.gateway.base_url, "http://provider.test/send");
        assert_eq!(config.poller.poll_interval_secs, 30);
        assert!(!config.poller.auto_start);
        assert_eq!(config.auth.mode, "none");
    }

    #[test]
    fn test_unparseable_override_keeps_default() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, lookup_from(&[("DISPATCHER_HTTP_PORT", "not-a-port")]));
        assert_eq!(config.http.port, 8080);
    }

    #[test]
    fn test_credential_lists() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, lookup_from(&[
            ("DISPATCHER_API_USER_CURRENT", "abc, def,"),
            ("DISPATCHER_API_USER_PREVIOUS", "123"),
        ]));

        assert_eq!(config.auth.current_credentials, vec!["abc", "def"]);
        assert_eq!(config.auth.previous_credentials, vec!["123"]);
    }

    #[test]
    fn test_with_path_missing_file_falls_back() {
        let loader = ConfigLoader::with_path("/nonexistent/dispatcher.toml");
        assert!(loader.config_path.is_some());
    }
}
