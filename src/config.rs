//! Engine configuration loaded from the environment.
//!
//! Every setting has a default except the API keys, which are optional:
//! a provider without a key is registered but reports itself unavailable.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::llm::{HttpRetry, ProviderSettings};
use crate::scheduler::{
    WorkerPoolConfig, DEFAULT_LEASE_TTL, DEFAULT_LOCK_PREFIX, DEFAULT_MAX_RETRIES,
    DEFAULT_QUEUE_KEY,
};

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the review engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Queue settings
    pub redis_url: String,
    pub queue_key: String,
    pub lock_prefix: String,
    pub lease_ttl: Duration,

    // Task store
    pub database_url: String,
    pub task_max_retries: u32,

    // Providers
    /// Id of the primary provider.
    pub default_provider: String,
    /// Id of the provider tried when the primary fails.
    pub fallback_provider: String,
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,

    // Workers
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub review_timeout: Duration,
    /// `None` disables the background reconciler.
    pub reconcile_interval: Option<Duration>,
    pub pending_grace: Duration,

    /// Template file replacing the built-in review prompt.
    pub prompt_template_path: Option<PathBuf>,

    /// Where the worker serves `/metrics`; `None` disables the endpoint.
    pub metrics_addr: Option<SocketAddr>,
}

/// Default metrics listen address.
pub const DEFAULT_METRICS_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 9090);

impl Default for EngineConfig {
    fn default() -> Self {
        let pool = WorkerPoolConfig::default();
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            lock_prefix: DEFAULT_LOCK_PREFIX.to_string(),
            lease_ttl: DEFAULT_LEASE_TTL,
            database_url: "sqlite://review-forge.db".to_string(),
            task_max_retries: DEFAULT_MAX_RETRIES,
            default_provider: "openai".to_string(),
            fallback_provider: "anthropic".to_string(),
            openai: ProviderSettings::openai(None),
            anthropic: ProviderSettings::anthropic(None),
            worker_count: pool.num_workers,
            poll_interval: pool.poll_interval,
            review_timeout: pool.review_timeout,
            reconcile_interval: pool.reconcile_interval,
            pending_grace: crate::scheduler::reconcile::DEFAULT_PENDING_GRACE,
            prompt_template_path: None,
            metrics_addr: Some(DEFAULT_METRICS_ADDR),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables.
    ///
    /// Supported variables:
    /// - `REDIS_URL`, `QUEUE_KEY`, `LOCK_PREFIX`, `LEASE_TTL_SECS`
    /// - `DATABASE_URL` (default: sqlite://review-forge.db), `TASK_MAX_RETRIES`
    /// - `AI_PROVIDER_DEFAULT` (default: openai), `AI_PROVIDER_FALLBACK` (default: anthropic)
    /// - `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `OPENAI_MODEL`, `OPENAI_TIMEOUT_SECS`
    /// - `ANTHROPIC_API_KEY`, `ANTHROPIC_BASE_URL`, `ANTHROPIC_MODEL`,
    ///   `ANTHROPIC_TIMEOUT_SECS`, `ANTHROPIC_VERSION`
    /// - `AI_MAX_TOKENS`, `AI_TEMPERATURE` (both providers)
    /// - `PROVIDER_MAX_RETRIES`, `PROVIDER_BACKOFF_BASE_MS`
    /// - `WORKER_COUNT`, `WORKER_POLL_INTERVAL_MS`, `REVIEW_TIMEOUT_SECS`
    /// - `RECONCILE_INTERVAL_SECS` (0 disables), `PENDING_GRACE_SECS`
    /// - `PROMPT_TEMPLATE_PATH`
    /// - `METRICS_ADDR` (default: 0.0.0.0:9090, `off` or empty disables)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let secs = |key: &str| -> Result<Option<Duration>, ConfigError> {
            lookup(key)
                .map(|val| parse_env_value::<u64>(&val, key).map(Duration::from_secs))
                .transpose()
        };
        let millis = |key: &str| -> Result<Option<Duration>, ConfigError> {
            lookup(key)
                .map(|val| parse_env_value::<u64>(&val, key).map(Duration::from_millis))
                .transpose()
        };

        // Queue settings
        if let Some(val) = lookup("REDIS_URL") {
            config.redis_url = val;
        }
        if let Some(val) = lookup("QUEUE_KEY") {
            config.queue_key = val;
        }
        if let Some(val) = lookup("LOCK_PREFIX") {
            config.lock_prefix = val;
        }
        if let Some(ttl) = secs("LEASE_TTL_SECS")? {
            config.lease_ttl = ttl;
        }

        // Task store
        if let Some(val) = lookup("DATABASE_URL") {
            config.database_url = val;
        }
        if let Some(val) = lookup("TASK_MAX_RETRIES") {
            config.task_max_retries = parse_env_value(&val, "TASK_MAX_RETRIES")?;
        }

        // Providers
        if let Some(val) = lookup("AI_PROVIDER_DEFAULT") {
            config.default_provider = val;
        }
        if let Some(val) = lookup("AI_PROVIDER_FALLBACK") {
            config.fallback_provider = val;
        }

        config.openai.api_key = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty());
        if let Some(val) = lookup("OPENAI_BASE_URL") {
            config.openai = config.openai.with_base_url(val);
        }
        if let Some(val) = lookup("OPENAI_MODEL") {
            config.openai = config.openai.with_model(val);
        }
        if let Some(timeout) = secs("OPENAI_TIMEOUT_SECS")? {
            config.openai = config.openai.with_timeout(timeout);
        }

        config.anthropic.api_key = lookup("ANTHROPIC_API_KEY").filter(|k| !k.is_empty());
        if let Some(val) = lookup("ANTHROPIC_BASE_URL") {
            config.anthropic = config.anthropic.with_base_url(val);
        }
        if let Some(val) = lookup("ANTHROPIC_MODEL") {
            config.anthropic = config.anthropic.with_model(val);
        }
        if let Some(timeout) = secs("ANTHROPIC_TIMEOUT_SECS")? {
            config.anthropic = config.anthropic.with_timeout(timeout);
        }
        if let Some(val) = lookup("ANTHROPIC_VERSION") {
            config.anthropic.api_version = Some(val);
        }

        if let Some(val) = lookup("AI_MAX_TOKENS") {
            let max_tokens: u32 = parse_env_value(&val, "AI_MAX_TOKENS")?;
            config.openai.max_tokens = max_tokens;
            config.anthropic.max_tokens = max_tokens;
        }
        if let Some(val) = lookup("AI_TEMPERATURE") {
            let temperature: f64 = parse_env_value(&val, "AI_TEMPERATURE")?;
            config.openai.temperature = temperature;
            config.anthropic.temperature = temperature;
        }

        let mut retry = HttpRetry::default();
        if let Some(val) = lookup("PROVIDER_MAX_RETRIES") {
            retry.max_retries = parse_env_value(&val, "PROVIDER_MAX_RETRIES")?;
        }
        if let Some(base) = millis("PROVIDER_BACKOFF_BASE_MS")? {
            retry.backoff_base = base;
        }
        config.openai.retry = retry;
        config.anthropic.retry = retry;

        // Workers
        if let Some(val) = lookup("WORKER_COUNT") {
            config.worker_count = parse_env_value(&val, "WORKER_COUNT")?;
        }
        if let Some(interval) = millis("WORKER_POLL_INTERVAL_MS")? {
            config.poll_interval = interval;
        }
        if let Some(timeout) = secs("REVIEW_TIMEOUT_SECS")? {
            config.review_timeout = timeout;
        }
        if let Some(interval) = secs("RECONCILE_INTERVAL_SECS")? {
            config.reconcile_interval = (!interval.is_zero()).then_some(interval);
        }
        if let Some(grace) = secs("PENDING_GRACE_SECS")? {
            config.pending_grace = grace;
        }

        if let Some(val) = lookup("PROMPT_TEMPLATE_PATH").filter(|p| !p.is_empty()) {
            config.prompt_template_path = Some(PathBuf::from(val));
        }

        if let Some(val) = lookup("METRICS_ADDR") {
            let val = val.trim();
            config.metrics_addr = if val.is_empty() || val.eq_ignore_ascii_case("off") {
                None
            } else {
                Some(parse_env_value(val, "METRICS_ADDR")?)
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        if self.queue_key.is_empty() || self.lock_prefix.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue_key and lock_prefix cannot be empty".to_string(),
            ));
        }

        if self.lease_ttl.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "lease_ttl must be at least 1 second".to_string(),
            ));
        }

        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        if self.task_max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "task_max_retries must be at least 1".to_string(),
            ));
        }

        if self.default_provider.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "default provider id cannot be empty".to_string(),
            ));
        }

        for provider in [&self.openai, &self.anthropic] {
            if provider.max_tokens == 0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "max_tokens for '{}' must be greater than 0",
                    provider.id
                )));
            }
            if !(0.0..=2.0).contains(&provider.temperature) {
                return Err(ConfigError::ValidationFailed(format!(
                    "temperature for '{}' must be between 0.0 and 2.0",
                    provider.id
                )));
            }
            if provider.timeout.is_zero() {
                return Err(ConfigError::ValidationFailed(format!(
                    "timeout for '{}' must be greater than 0",
                    provider.id
                )));
            }
        }

        if self.worker_count == 0 {
            return Err(ConfigError::ValidationFailed(
                "worker_count must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.review_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "review_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Settings of every built-in provider, ready for the registry.
    pub fn provider_settings(&self) -> Vec<ProviderSettings> {
        vec![self.openai.clone(), self.anthropic.clone()]
    }

    /// Worker pool configuration derived from these settings.
    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.worker_count)
            .with_poll_interval(self.poll_interval)
            .with_review_timeout(self.review_timeout)
            .with_reconcile_interval(self.reconcile_interval)
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).expect("defaults are valid");
        assert_eq!(config.queue_key, "task:queue");
        assert_eq!(config.lock_prefix, "task:lock:");
        assert_eq!(config.lease_ttl, Duration::from_secs(300));
        assert_eq!(config.database_url, "sqlite://review-forge.db");
        assert_eq!(config.task_max_retries, 3);
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.fallback_provider, "anthropic");
        assert!(config.openai.api_key.is_none());
        assert_eq!(config.openai.retry.max_retries, 2);
        assert_eq!(config.worker_count, 4);
        assert!(config.prompt_template_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_BASE_URL", "http://localhost:8080/"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("ANTHROPIC_TIMEOUT_SECS", "90"),
            ("AI_MAX_TOKENS", "2048"),
            ("AI_TEMPERATURE", "0.1"),
            ("PROVIDER_MAX_RETRIES", "5"),
            ("PROVIDER_BACKOFF_BASE_MS", "250"),
            ("WORKER_COUNT", "8"),
            ("RECONCILE_INTERVAL_SECS", "0"),
            ("AI_PROVIDER_DEFAULT", "anthropic"),
            ("AI_PROVIDER_FALLBACK", "openai"),
        ])
        .expect("valid overrides");

        assert_eq!(config.openai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.openai.base_url, "http://localhost:8080");
        assert_eq!(config.openai.model, "gpt-4o");
        assert_eq!(config.anthropic.timeout, Duration::from_secs(90));
        assert_eq!(config.anthropic.max_tokens, 2048);
        assert!((config.openai.temperature - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.anthropic.retry.max_retries, 5);
        assert_eq!(config.openai.retry.backoff_base, Duration::from_millis(250));
        assert_eq!(config.pool_config().num_workers, 8);
        assert!(config.reconcile_interval.is_none());
        assert_eq!(config.default_provider, "anthropic");
    }

    #[test]
    fn test_metrics_addr() {
        assert_eq!(
            load(&[]).expect("valid").metrics_addr,
            Some(DEFAULT_METRICS_ADDR)
        );
        let config = load(&[("METRICS_ADDR", "127.0.0.1:9464")]).expect("valid");
        assert_eq!(config.metrics_addr.map(|a| a.port()), Some(9464));
        assert!(load(&[("METRICS_ADDR", "off")])
            .expect("valid")
            .metrics_addr
            .is_none());
        assert!(load(&[("METRICS_ADDR", "not-an-addr")]).is_err());
    }

    #[test]
    fn test_empty_api_key_is_absent() {
        let config = load(&[("ANTHROPIC_API_KEY", "")]).expect("valid");
        assert!(config.anthropic.api_key.is_none());
    }

    #[test]
    fn test_invalid_number() {
        let err = load(&[("WORKER_COUNT", "many")]).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "WORKER_COUNT"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let err = load(&[("WORKER_COUNT", "0")]).unwrap_err();
        assert!(err.to_string().contains("worker_count"));
    }

    #[test]
    fn test_validation_rejects_zero_task_retries() {
        let err = load(&[("TASK_MAX_RETRIES", "0")]).unwrap_err();
        assert!(err.to_string().contains("task_max_retries"));
    }

    #[test]
    fn test_validation_rejects_temperature() {
        let err = load(&[("AI_TEMPERATURE", "3.5")]).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed(_)));
    }

    #[test]
    fn test_provider_settings_ids() {
        let ids: Vec<String> = EngineConfig::default()
            .provider_settings()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["openai", "anthropic"]);
    }
}
