//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (PRAYERLINE_*)
//! 2. TOML config file (if PRAYERLINE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::collections::BTreeMap;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::cache::{CachePolicy, PolicyTable, ResourceKind, RetryPolicy};

mod validation;

pub use validation::ConfigError;

/// Staleness/GC override for one resource kind, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverride {
    pub stale_ms: u64,
    pub gc_ms: u64,
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (PRAYERLINE_*, `__` separates nested keys)
/// 2. TOML config file (if PRAYERLINE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the remote REST gateway.
    ///
    /// Set via PRAYERLINE_API_BASE_URL environment variable.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Bearer token sent with every gateway request.
    ///
    /// Set via PRAYERLINE_API_TOKEN environment variable.
    /// Required only for writes.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Gateway request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Staleness window for kinds without an explicit policy.
    #[serde(default = "default_stale_ms")]
    pub default_stale_ms: u64,

    /// GC window for kinds without an explicit policy.
    #[serde(default = "default_gc_ms")]
    pub default_gc_ms: u64,

    /// Per-kind overrides keyed by resource kind name (`prayers`, `user-profile`, ...).
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyOverride>,

    /// Retries after the first attempt for cache fetches.
    #[serde(default = "default_query_max_retries")]
    pub query_max_retries: u32,

    /// Retries after the first attempt for mutations (0 or 1).
    #[serde(default = "default_mutation_max_retries")]
    pub mutation_max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Identical avatar signals closer than this are dropped.
    #[serde(default = "default_avatar_dedupe_window_ms")]
    pub avatar_dedupe_window_ms: u64,

    /// Upper bound on waiting for a final avatar image to load.
    #[serde(default = "default_avatar_preload_timeout_ms")]
    pub avatar_preload_timeout_ms: u64,

    /// Interval of the background cache GC task.
    #[serde(default = "default_gc_interval_ms")]
    pub gc_interval_ms: u64,
}

fn default_api_base_url() -> String {
    "http://localhost:8080/api/".into()
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_stale_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_gc_ms() -> u64 {
    600_000 // 10 minutes
}

fn default_query_max_retries() -> u32 {
    3
}

fn default_mutation_max_retries() -> u32 {
    1
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_avatar_dedupe_window_ms() -> u64 {
    100
}

fn default_avatar_preload_timeout_ms() -> u64 {
    10_000
}

fn default_gc_interval_ms() -> u64 {
    60_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_token: None,
            timeout_ms: default_timeout_ms(),
            default_stale_ms: default_stale_ms(),
            default_gc_ms: default_gc_ms(),
            policies: BTreeMap::new(),
            query_max_retries: default_query_max_retries(),
            mutation_max_retries: default_mutation_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            avatar_dedupe_window_ms: default_avatar_dedupe_window_ms(),
            avatar_preload_timeout_ms: default_avatar_preload_timeout_ms(),
            gc_interval_ms: default_gc_interval_ms(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn dedupe_window(&self) -> Duration {
        Duration::from_millis(self.avatar_dedupe_window_ms)
    }

    pub fn preload_timeout(&self) -> Duration {
        Duration::from_millis(self.avatar_preload_timeout_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn query_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.query_max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn mutation_retry(&self) -> RetryPolicy {
        RetryPolicy { max_retries: self.mutation_max_retries, ..self.query_retry() }
    }

    /// Built-in policy table with the configured default and overrides applied.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if any policy's GC window is shorter
    /// than its staleness window.
    pub fn policy_table(&self) -> Result<PolicyTable, ConfigError> {
        let mut table =
            PolicyTable::with_default(CachePolicy::from_millis(self.default_stale_ms, self.default_gc_ms))?;
        for (name, policy) in &self.policies {
            table.set(ResourceKind::from(name.as_str()), CachePolicy::from_millis(policy.stale_ms, policy.gc_ms))?;
        }
        Ok(table)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `PRAYERLINE_`
    /// 2. TOML file from `PRAYERLINE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("PRAYERLINE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("PRAYERLINE_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Check if the API token is available (for deferred validation).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the API token is not set.
    pub fn require_api_token(&self) -> Result<&str, ConfigError> {
        self.api_token.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "api_token".into(),
            hint: "Set PRAYERLINE_API_TOKEN environment variable".into(),
        })
    }
}
