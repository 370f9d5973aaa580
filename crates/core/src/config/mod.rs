//! Application configuration with layered loading.
//!
//! Sources, lowest to highest precedence:
//!
//! 1. Built-in defaults
//! 2. TOML config file (if FORUMCACHE_CONFIG_FILE set)
//! 3. Environment variables (FORUMCACHE_*)

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_RETENTION_DAYS;

mod validation;

pub use validation::ConfigError;

const ENV_PREFIX: &str = "FORUMCACHE_";
const CONFIG_FILE_VAR: &str = "FORUMCACHE_CONFIG_FILE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite cache database.
    ///
    /// Set via FORUMCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Records untouched for longer than this are pruned.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Delay between entering the foreground and pruning.
    #[serde(default = "default_prune_delay_secs")]
    pub prune_delay_secs: u64,

    /// Directory of JSON snapshots the shell fetches from.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,

    /// Whether private messaging is enabled for the account. Gates inbox refreshes.
    #[serde(default = "default_true")]
    pub messaging_enabled: bool,

    /// Whether the shell starts logged in.
    #[serde(default = "default_true")]
    pub logged_in: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./forumcache.sqlite")
}

fn default_retention_days() -> i64 {
    DEFAULT_RETENTION_DAYS
}

fn default_prune_delay_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            retention_days: default_retention_days(),
            prune_delay_secs: default_prune_delay_secs(),
            snapshot_dir: None,
            messaging_enabled: true,
            logged_in: true,
        }
    }
}

impl AppConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn prune_delay(&self) -> Duration {
        Duration::from_secs(self.prune_delay_secs)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the config file or environment cannot be
    /// parsed, or if validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var(CONFIG_FILE_VAR) {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).map(|key| key.as_str().to_lowercase().into()).split("__"));

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// The snapshot directory, required by the shell.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if no directory is configured.
    pub fn require_snapshot_dir(&self) -> Result<&PathBuf, ConfigError> {
        self.snapshot_dir.as_ref().ok_or_else(|| ConfigError::Missing {
            field: "snapshot_dir".into(),
            hint: "Set FORUMCACHE_SNAPSHOT_DIR environment variable".into(),
        })
    }
}
