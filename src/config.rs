//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path (e.g. a `--config <path>` flag in the host binary)
//! 2. `~/.propedge/config.toml` (user)
//! 3. `/etc/propedge/config.toml` (system)
//!
//! Every field has a default, so an empty file (or no file at all, via
//! [`Config::load_or_default`]) yields a working in-process setup.
//! [`Config::apply_env`] then lets the deployment point the store at a
//! shared backend without editing files.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;

use crate::store::memory::DEFAULT_MEMORY_MAX_ENTRIES;
use crate::{PropEdgeError, Result};

/// Environment variables that select the store backend, in priority order.
const STORE_URL_ENV_VARS: &[&str] = &["PROPEDGE_STORE_URL", "REDIS_URL"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub ttl: TtlConfig,
    #[serde(default)]
    pub locks: LockConfig,
}

/// Store backend selection.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Durable backend URL. Absent means an in-process store.
    #[serde(default)]
    pub backend_url: Option<String>,
    /// Capacity of the in-process store (default: 100,000).
    #[serde(default = "default_memory_max_entries")]
    pub memory_max_entries: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            memory_max_entries: default_memory_max_entries(),
        }
    }
}

fn default_memory_max_entries() -> u64 {
    DEFAULT_MEMORY_MAX_ENTRIES
}

/// Daily upstream call budgets.
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    /// Soft cap for providers without an explicit entry (default: 90).
    #[serde(default = "default_soft_cap")]
    pub default_soft_cap: u64,
    /// Per-provider soft caps, keyed on provider prefix.
    #[serde(default)]
    pub providers: HashMap<String, u64>,
    /// IANA timezone whose midnight starts a new budget day (default: UTC).
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// How long a day's counter is kept (default: 26h).
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_soft_cap: default_soft_cap(),
            providers: HashMap::new(),
            timezone: default_timezone(),
            retention_secs: default_retention(),
        }
    }
}

fn default_soft_cap() -> u64 {
    90
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_retention() -> u64 {
    26 * 3600
}

impl BudgetConfig {
    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone.parse::<Tz>().map_err(|e| {
            PropEdgeError::Configuration(format!("invalid budget timezone '{}': {e}", self.timezone))
        })
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Default freshness and resilience windows.
#[derive(Debug, Clone, Deserialize)]
pub struct TtlConfig {
    /// Fresh copy TTL in seconds (default: 1 hour).
    #[serde(default = "default_fresh_secs")]
    pub fresh_secs: u64,
    /// Stale copy TTL in seconds (default: 3 days).
    #[serde(default = "default_stale_secs")]
    pub stale_secs: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            fresh_secs: default_fresh_secs(),
            stale_secs: default_stale_secs(),
        }
    }
}

fn default_fresh_secs() -> u64 {
    3600
}

fn default_stale_secs() -> u64 {
    3 * 86_400
}

/// Single-flight lock table limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Maximum number of per-key locks retained (default: 10,000).
    #[serde(default = "default_max_keys")]
    pub max_keys: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_keys: default_max_keys(),
        }
    }
}

fn default_max_keys() -> u64 {
    10_000
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.propedge/config.toml`
    /// 3. `/etc/propedge/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    /// Like [`load`](Self::load), but falls back to defaults when no config
    /// file exists. An explicit path that does not exist is still an error.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        match explicit_path {
            Some(_) => Self::load(explicit_path),
            None => match Self::find_standard_path() {
                Some(path) => Self::load_from_file(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PropEdgeError::Configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would silently disable caching or budgeting.
    ///
    /// Zero TTLs make every cache write fail, and a zero retention expires
    /// each day's counter as soon as it is written, so the soft cap would
    /// never be reached.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("ttl.fresh_secs", self.ttl.fresh_secs),
            ("ttl.stale_secs", self.ttl.stale_secs),
            ("budget.retention_secs", self.budget.retention_secs),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);

        match zero {
            Some((field, _)) => Err(PropEdgeError::Configuration(format!(
                "{field} must be greater than zero"
            ))),
            None => Ok(()),
        }
    }

    /// Apply environment overrides.
    ///
    /// `PROPEDGE_STORE_URL`, then `REDIS_URL`, replace `store.backend_url`.
    pub fn apply_env(self) -> Self {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    fn apply_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = STORE_URL_ENV_VARS
            .iter()
            .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
        {
            self.store.backend_url = Some(url);
        }
        self
    }

    /// Fresh copy TTL.
    pub fn fresh_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl.fresh_secs)
    }

    /// Stale copy TTL.
    pub fn stale_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl.stale_secs)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PropEdgeError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            PropEdgeError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(PropEdgeError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        Self::find_standard_path().ok_or_else(|| {
            PropEdgeError::Configuration(
                "No config file found. Create ~/.propedge/config.toml or /etc/propedge/config.toml"
                    .to_string(),
            )
        })
    }

    fn find_standard_path() -> Option<PathBuf> {
        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".propedge").join("config.toml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/propedge/config.toml");
        system_config.exists().then_some(system_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert!(config.store.backend_url.is_none());
        assert_eq!(config.store.memory_max_entries, 100_000);
        assert_eq!(config.budget.default_soft_cap, 90);
        assert_eq!(config.budget.timezone, "UTC");
        assert_eq!(config.budget.retention(), Duration::from_secs(26 * 3600));
        assert_eq!(config.fresh_ttl(), Duration::from_secs(3600));
        assert_eq!(config.stale_ttl(), Duration::from_secs(3 * 86_400));
        assert_eq!(config.locks.max_keys, 10_000);
    }

    #[test]
    fn parse_minimal_config() {
        let config = Config::from_toml(
            r#"
            [budget]
            default_soft_cap = 50
        "#,
        )
        .unwrap();
        assert_eq!(config.budget.default_soft_cap, 50);
        // Defaults preserved
        assert_eq!(config.ttl.fresh_secs, 3600);
        assert!(config.budget.providers.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let config = Config::from_toml(
            r#"
            [store]
            backend_url = "redis://localhost:6379/0"
            memory_max_entries = 500

            [budget]
            default_soft_cap = 90
            timezone = "America/Phoenix"
            retention_secs = 100000

            [budget.providers]
            apisports = 95
            odds = 400

            [ttl]
            fresh_secs = 900
            stale_secs = 86400

            [locks]
            max_keys = 64
        "#,
        )
        .unwrap();
        assert_eq!(
            config.store.backend_url.as_deref(),
            Some("redis://localhost:6379/0")
        );
        assert_eq!(config.store.memory_max_entries, 500);
        assert_eq!(config.budget.providers.get("apisports"), Some(&95));
        assert_eq!(config.budget.providers.get("odds"), Some(&400));
        assert_eq!(config.budget.default_soft_cap, 90);
        assert_eq!(config.budget.tz().unwrap(), chrono_tz::America::Phoenix);
        assert_eq!(config.fresh_ttl(), Duration::from_secs(900));
        assert_eq!(config.stale_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.locks.max_keys, 64);
    }

    #[test]
    fn invalid_timezone_is_configuration_error() {
        let config = Config::from_toml(
            r#"
            [budget]
            timezone = "Mars/Olympus_Mons"
        "#,
        )
        .unwrap();
        let err = config.budget.tz().unwrap_err();
        assert!(matches!(err, PropEdgeError::Configuration(_)));
    }

    #[test]
    fn env_override_prefers_propedge_var() {
        let config = Config::default().apply_env_with(|name| match name {
            "PROPEDGE_STORE_URL" => Some("redis://primary:6379".into()),
            "REDIS_URL" => Some("redis://fallback:6379".into()),
            _ => None,
        });
        assert_eq!(
            config.store.backend_url.as_deref(),
            Some("redis://primary:6379")
        );
    }

    #[test]
    fn env_override_falls_back_to_redis_url() {
        let config = Config::default().apply_env_with(|name| match name {
            "PROPEDGE_STORE_URL" => Some("  ".into()),
            "REDIS_URL" => Some("redis://fallback:6379".into()),
            _ => None,
        });
        assert_eq!(
            config.store.backend_url.as_deref(),
            Some("redis://fallback:6379")
        );
    }

    #[test]
    fn no_env_keeps_file_value() {
        let mut config = Config::default();
        config.store.backend_url = Some("redis://from-file:6379".into());
        let config = config.apply_env_with(|_| None);
        assert_eq!(
            config.store.backend_url.as_deref(),
            Some("redis://from-file:6379")
        );
    }

    #[test]
    fn config_not_found_returns_error() {
        let result = Config::load(Some(Path::new("/nonexistent/config.toml")));
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }

    #[test]
    fn zero_retention_is_rejected() {
        let err = Config::from_toml(
            r#"
            [budget]
            default_soft_cap = 1
            retention_secs = 0
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, PropEdgeError::Configuration(ref msg) if msg.contains("retention_secs")));
    }

    #[test]
    fn zero_ttls_are_rejected() {
        for content in ["[ttl]\nfresh_secs = 0\n", "[ttl]\nstale_secs = 0\n"] {
            assert!(matches!(
                Config::from_toml(content),
                Err(PropEdgeError::Configuration(_))
            ));
        }
    }
}
