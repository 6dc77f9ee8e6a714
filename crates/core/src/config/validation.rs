//! Configuration validation rules, applied after loading.

use crate::config::{AppConfig, StorageType};
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
    /// Returns `ConfigError::Invalid` for out-of-range timeouts and empty
    /// agents, and `ConfigError::Missing` when the selected storage engine
    /// lacks a required setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }
        if self.max_bytes == 0 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must be greater than 0".into() });
        }
        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }
        if self.robots.agent.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "robots.agent".into(), reason: "must not be empty".into() });
        }
        if self.splash.timeout_secs == 0 || self.splash.timeout_secs > 3600 {
            return Err(ConfigError::Invalid {
                field: "splash.timeout_secs".into(),
                reason: "must be between 1 and 3600".into(),
            });
        }
        if !(0.0..=60.0).contains(&self.splash.wait_secs) {
            return Err(ConfigError::Invalid {
                field: "splash.wait_secs".into(),
                reason: "must be between 0 and 60".into(),
            });
        }
        if self.chrome.navigation_timeout_ms < 100 {
            return Err(ConfigError::Invalid {
                field: "chrome.navigation_timeout_ms".into(),
                reason: "must be at least 100ms".into(),
            });
        }

        self.validate_storage()
    }

    fn validate_storage(&self) -> Result<(), ConfigError> {
        let storage = &self.storage;
        if storage.expire_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "storage.expire_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        match storage.kind {
            StorageType::Disk if storage.disk_dir.as_os_str().is_empty() => {
                Err(ConfigError::Invalid { field: "storage.disk_dir".into(), reason: "must not be empty".into() })
            }
            StorageType::S3 if storage.s3_bucket.as_deref().is_none_or(str::is_empty) => Err(ConfigError::Missing {
                field: "storage.s3_bucket".into(),
                hint: "Set TRAWL_STORAGE__S3_BUCKET environment variable".into(),
            }),
            StorageType::Redis if storage.redis_pool_size == 0 => Err(ConfigError::Invalid {
                field: "storage.redis_pool_size".into(),
                reason: "must be greater than 0".into(),
            }),
            StorageType::Cassandra if storage.cassandra_nodes.is_empty() => Err(ConfigError::Missing {
                field: "storage.cassandra_nodes".into(),
                hint: "Set at least one host:port".into(),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_timeout_too_small() {
        let config = AppConfig { timeout_ms: 50, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));
    }

    #[test]
    fn test_validate_timeout_exceeds_limit() {
        let config = AppConfig { timeout_ms: 301_000, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));
    }

    #[test]
    fn test_validate_empty_robots_agent() {
        let mut config = AppConfig::default();
        config.robots.agent = " ".into();
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "robots.agent"));
    }

    #[test]
    fn test_validate_splash_wait() {
        let mut config = AppConfig::default();
        config.splash.wait_secs = -1.0;
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "splash.wait_secs"));
    }

    #[test]
    fn test_validate_s3_requires_bucket() {
        let config = AppConfig {
            storage: StorageConfig { kind: StorageType::S3, ..Default::default() },
            ..Default::default()
        };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Missing { field, .. }) if field == "storage.s3_bucket"));

        let config = AppConfig {
            storage: StorageConfig { kind: StorageType::S3, s3_bucket: Some("pages".into()), ..Default::default() },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_cassandra_requires_nodes() {
        let config = AppConfig {
            storage: StorageConfig { kind: StorageType::Cassandra, cassandra_nodes: Vec::new(), ..Default::default() },
            ..Default::default()
        };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Missing { field, .. }) if field == "storage.cassandra_nodes"));
    }

    #[test]
    fn test_validate_zero_expire() {
        let config =
            AppConfig { storage: StorageConfig { expire_secs: 0, ..Default::default() }, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "storage.expire_secs"));
    }
}
