//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

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
    /// - `api_base_url` is not an absolute http(s) URL
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `mutation_max_retries` exceeds 1
    /// - `retry_base_delay_ms` exceeds `retry_max_delay_ms`
    /// - `avatar_dedupe_window_ms` is 0
    /// - `gc_interval_ms` is under one second
    /// - any cache policy evicts before it goes stale
    pub fn validate(&self) -> Result<(), ConfigError> {
        match url::Url::parse(&self.api_base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ConfigError::Invalid {
                    field: "api_base_url".into(),
                    reason: format!("unsupported scheme: {}", url.scheme()),
                });
            }
            Err(e) => {
                return Err(ConfigError::Invalid { field: "api_base_url".into(), reason: e.to_string() });
            }
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.mutation_max_retries > 1 {
            return Err(ConfigError::Invalid {
                field: "mutation_max_retries".into(),
                reason: "mutations retry at most once".into(),
            });
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::Invalid {
                field: "retry_base_delay_ms".into(),
                reason: "must not exceed retry_max_delay_ms".into(),
            });
        }

        if self.avatar_dedupe_window_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "avatar_dedupe_window_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.gc_interval_ms < 1_000 {
            return Err(ConfigError::Invalid { field: "gc_interval_ms".into(), reason: "must be at least 1s".into() });
        }

        self.policy_table()?;

        if self.query_max_retries > 5 {
            tracing::warn!(
                query_max_retries = self.query_max_retries,
                "High query retry count; failed reads will take a long time to surface"
            );
        }

        Ok(())
    }
}
