//! Engine configuration
//!
//! Loaded from an optional `ledger-sync.toml`, then overridden by environment
//! variables (a `.env` file next to the config is honoured), then by CLI flags.
//!
//! ## Environment Variables
//!
//! - `LEDGER_SYNC_DATA_DIR` - Local store directory
//! - `LEDGER_SYNC_BASE_URL` - Remote API base URL
//! - `LEDGER_SYNC_TOKEN` - Bearer token for the remote API
//! - `LEDGER_SYNC_TIMEOUT_SECS` - Per-request timeout
//! - `LEDGER_SYNC_AUTO_SYNC` - Drain automatically on reconnect (`true`/`false`)
//! - `LEDGER_SYNC_INTERVAL_SECS` - Periodic drain interval, 0 disables it
//! - `LEDGER_SYNC_MAX_ATTEMPTS` - Replay attempts per entry per drain

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::sync::RetryPolicy;

pub const CONFIG_FILE_NAME: &str = "ledger-sync.toml";

pub const ENV_DATA_DIR: &str = "LEDGER_SYNC_DATA_DIR";
pub const ENV_BASE_URL: &str = "LEDGER_SYNC_BASE_URL";
pub const ENV_TOKEN: &str = "LEDGER_SYNC_TOKEN";
pub const ENV_TIMEOUT_SECS: &str = "LEDGER_SYNC_TIMEOUT_SECS";
pub const ENV_AUTO_SYNC: &str = "LEDGER_SYNC_AUTO_SYNC";
pub const ENV_INTERVAL_SECS: &str = "LEDGER_SYNC_INTERVAL_SECS";
pub const ENV_MAX_ATTEMPTS: &str = "LEDGER_SYNC_MAX_ATTEMPTS";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Directory holding the RocksDB files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSettings {
    /// Drain the queue on every transition to online
    #[serde(default = "default_true")]
    pub auto_sync: bool,
    /// Periodic drain while online; 0 means reconnect-only
    #[serde(default)]
    pub sync_interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_sync: true,
            sync_interval_secs: 0,
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_multiplier(),
        }
    }
}

impl EngineConfig {
    /// Load `ledger-sync.toml` and `.env` from `dir`. A missing config file
    /// yields the defaults; overrides from the environment still apply.
    pub fn load(dir: &Path) -> SyncResult<Self> {
        let env_path = dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
        }

        let config_path = dir.join(CONFIG_FILE_NAME);
        let mut config = if config_path.exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> SyncResult<Self> {
        toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Empty or unparsable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get(ENV_DATA_DIR) {
            self.store.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = get(ENV_BASE_URL) {
            self.remote.base_url = url;
        }
        if let Some(token) = get(ENV_TOKEN) {
            self.remote.auth_token = Some(token);
        }
        if let Some(secs) = get(ENV_TIMEOUT_SECS).and_then(|v| v.parse().ok()) {
            self.remote.timeout_secs = secs;
        }
        if let Some(flag) = get(ENV_AUTO_SYNC).and_then(|v| parse_bool(&v)) {
            self.sync.auto_sync = flag;
        }
        if let Some(secs) = get(ENV_INTERVAL_SECS).and_then(|v| v.parse().ok()) {
            self.sync.sync_interval_secs = secs;
        }
        if let Some(n) = get(ENV_MAX_ATTEMPTS).and_then(|v| v.parse().ok()) {
            self.sync.max_attempts = n;
        }
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.remote.base_url.trim().is_empty() {
            return Err(SyncError::Config("remote.base_url must not be empty".into()));
        }
        if self.remote.timeout_secs == 0 {
            return Err(SyncError::Config("remote.timeout_secs must be > 0".into()));
        }
        if self.sync.max_attempts == 0 {
            return Err(SyncError::Config("sync.max_attempts must be >= 1".into()));
        }
        if !(self.sync.backoff_multiplier >= 1.0) {
            return Err(SyncError::Config(
                "sync.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        if self.sync.max_backoff_ms < self.sync.initial_backoff_ms {
            return Err(SyncError::Config(
                "sync.max_backoff_ms must be >= sync.initial_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sync.max_attempts,
            initial_backoff: Duration::from_millis(self.sync.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.sync.max_backoff_ms),
            multiplier: self.sync.backoff_multiplier,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs)
    }

    pub fn sync_interval(&self) -> Option<Duration> {
        match self.sync.sync_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.sync.max_attempts, 3);
        assert!(config.sync.auto_sync);
        assert_eq!(config.sync_interval(), None);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [remote]
            base_url = "https://ledger.example.com"

            [sync]
            max_attempts = 5
            sync_interval_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.remote.base_url, "https://ledger.example.com");
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.sync.max_attempts, 5);
        assert_eq!(config.sync_interval(), Some(Duration::from_secs(60)));
        assert_eq!(config.store.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = EngineConfig::from_toml("[sync]\nmax_attempts = \"three\"").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_BASE_URL, "http://10.0.0.2:9000"),
            (ENV_TOKEN, "secret"),
            (ENV_AUTO_SYNC, "off"),
            (ENV_MAX_ATTEMPTS, "7"),
            (ENV_TIMEOUT_SECS, "not-a-number"),
            (ENV_DATA_DIR, ""),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.remote.base_url, "http://10.0.0.2:9000");
        assert_eq!(config.remote.auth_token.as_deref(), Some("secret"));
        assert!(!config.sync.auto_sync);
        assert_eq!(config.sync.max_attempts, 7);
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.store.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.sync.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.sync.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.remote.base_url = "  ".into();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.remote.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config.sync.max_backoff_ms, 5_000);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = EngineConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(200));
        assert_eq!(policy.max_backoff, Duration::from_secs(5));
    }
}
