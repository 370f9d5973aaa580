//! Configuration validation rules.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `retention_days` is outside 1..=365
    /// - `prune_delay_secs` exceeds one hour
    /// - `db_path` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=365).contains(&self.retention_days) {
            return Err(ConfigError::Invalid {
                field: "retention_days".into(),
                reason: "must be between 1 and 365".into(),
            });
        }

        if self.prune_delay_secs > 3600 {
            return Err(ConfigError::Invalid {
                field: "prune_delay_secs".into(),
                reason: "must not exceed 1 hour (3600s)".into(),
            });
        }

        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid { field: "db_path".into(), reason: "must not be empty".into() });
        }

        if !self.logged_in && self.snapshot_dir.is_some() {
            tracing::debug!("starting logged out; snapshots will not be fetched until login");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_retention_bounds() {
        for days in [0, 366, -1] {
            let config = AppConfig { retention_days: days, ..Default::default() };
            let result = config.validate();
            assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "retention_days"));
        }
        for days in [1, 365] {
            assert!(AppConfig { retention_days: days, ..Default::default() }.validate().is_ok());
        }
    }

    #[test]
    fn test_validate_prune_delay() {
        let config = AppConfig { prune_delay_secs: 3601, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "prune_delay_secs"));
        assert!(AppConfig { prune_delay_secs: 0, ..Default::default() }.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_db_path() {
        let config = AppConfig { db_path: "".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "db_path"));
    }
}
