//! Queue and worker configuration.
//!
//! Values come from [`QueueConfig::default`] and can be overridden through
//! `CONVEYOR_*` environment variables with [`QueueConfig::from_env`].

use std::env;
use std::time::Duration;

use crate::error::ConveyorError;

const DEFAULT_PREFIX: &str = "queue";
const DEFAULT_IDLE_INTERVAL_MS: u64 = 100;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RETENTION_SECS: u64 = 24 * 60 * 60;
const MAX_RETENTION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

pub const ENV_PREFIX: &str = "CONVEYOR_PREFIX";
pub const ENV_IDLE_INTERVAL_MS: &str = "CONVEYOR_IDLE_INTERVAL_MS";
pub const ENV_STORE_TIMEOUT_MS: &str = "CONVEYOR_STORE_TIMEOUT_MS";
pub const ENV_STATUS_TTL_SECS: &str = "CONVEYOR_STATUS_TTL_SECS";
pub const ENV_NOTIFICATION_TTL_SECS: &str = "CONVEYOR_NOTIFICATION_TTL_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Key namespace prefix (`{prefix}:{task_type}`, `{prefix}:status:{id}`, ...).
    pub prefix: String,
    /// Sleep between two sweeps that found no work.
    pub idle_interval: Duration,
    /// Upper bound for every single store call.
    pub store_timeout: Duration,
    /// Retention of `{prefix}:status:{id}` records.
    pub status_ttl: Duration,
    /// Retention of `{prefix}:notification:{id}` records.
    pub notification_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            idle_interval: Duration::from_millis(DEFAULT_IDLE_INTERVAL_MS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            status_ttl: Duration::from_secs(DEFAULT_RETENTION_SECS),
            notification_ttl: Duration::from_secs(DEFAULT_RETENTION_SECS),
        }
    }
}

impl QueueConfig {
    /// Build a config from the process environment.
    pub fn from_env() -> Result<Self, ConveyorError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConveyorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(prefix) = lookup(ENV_PREFIX) {
            config.prefix = prefix;
        }
        if let Some(ms) = parse_u64(&lookup, ENV_IDLE_INTERVAL_MS)? {
            config.idle_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, ENV_STORE_TIMEOUT_MS)? {
            config.store_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_u64(&lookup, ENV_STATUS_TTL_SECS)? {
            config.status_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(&lookup, ENV_NOTIFICATION_TTL_SECS)? {
            config.notification_ttl = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Reject values that would make the pool spin, expire records immediately,
    /// or push an expiry past what the backends can represent.
    pub fn validate(&self) -> Result<(), ConveyorError> {
        if self.prefix.trim().is_empty() {
            return Err(ConveyorError::InvalidConfig("prefix must not be empty".into()));
        }
        if self.prefix.contains(char::is_whitespace) {
            return Err(ConveyorError::InvalidConfig(format!(
                "prefix must not contain whitespace: {:?}",
                self.prefix
            )));
        }
        if self.idle_interval.is_zero() {
            return Err(ConveyorError::InvalidConfig("idle_interval must be > 0".into()));
        }
        if self.store_timeout.is_zero() {
            return Err(ConveyorError::InvalidConfig("store_timeout must be > 0".into()));
        }
        for (name, ttl) in [
            ("status_ttl", self.status_ttl),
            ("notification_ttl", self.notification_ttl),
        ] {
            if ttl < Duration::from_secs(1) {
                return Err(ConveyorError::InvalidConfig(format!("{name} must be at least 1s")));
            }
            if ttl > Duration::from_secs(MAX_RETENTION_SECS) {
                return Err(ConveyorError::InvalidConfig(format!(
                    "{name} must be at most {MAX_RETENTION_SECS}s, got {}s",
                    ttl.as_secs()
                )));
            }
        }
        Ok(())
    }
}

fn parse_u64<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConveyorError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConveyorError::InvalidConfig(format!("{key}={raw:?}: {e}"))),
    }
}
