//! Service configuration read from the environment

use std::str::FromStr;

use thiserror::Error;

use crate::services::outbox::OutboxPolicy;

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Without a database the service runs on the in-memory gateway.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub port: u16,
    pub nats_url: Option<String>,
    pub nats_subject_prefix: String,
    pub outbox_poll_interval_ms: u64,
    pub outbox_max_attempts: u32,
    pub outbox_batch_size: usize,
    pub admin_cache_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            port: 8083,
            nats_url: None,
            nats_subject_prefix: "marketplace".to_string(),
            outbox_poll_interval_ms: 1000,
            outbox_max_attempts: 8,
            outbox_batch_size: 50,
            admin_cache_ttl_secs: 300,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let config = Self {
            database_url: non_empty("DATABASE_URL"),
            max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            port: parse(&lookup, "PORT", defaults.port)?,
            nats_url: non_empty("NATS_URL"),
            nats_subject_prefix: non_empty("NATS_SUBJECT_PREFIX").unwrap_or(defaults.nats_subject_prefix),
            outbox_poll_interval_ms: parse(&lookup, "OUTBOX_POLL_INTERVAL_MS", defaults.outbox_poll_interval_ms)?,
            outbox_max_attempts: parse(&lookup, "OUTBOX_MAX_ATTEMPTS", defaults.outbox_max_attempts)?,
            outbox_batch_size: parse(&lookup, "OUTBOX_BATCH_SIZE", defaults.outbox_batch_size)?,
            admin_cache_ttl_secs: parse(&lookup, "ADMIN_CACHE_TTL_SECS", defaults.admin_cache_ttl_secs)?,
        };
        if config.outbox_max_attempts == 0 {
            return Err(ConfigError::Invalid { key: "OUTBOX_MAX_ATTEMPTS", value: "0".into() });
        }
        Ok(config)
    }

    pub fn outbox_policy(&self) -> OutboxPolicy {
        OutboxPolicy {
            max_attempts: self.outbox_max_attempts,
            batch_size: self.outbox_batch_size,
            poll_interval: std::time::Duration::from_millis(self.outbox_poll_interval_ms),
            ..OutboxPolicy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(Config::from_lookup(lookup(&[])).unwrap(), Config::default());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/marketplace"),
            ("PORT", "9000"),
            ("NATS_URL", " "),
            ("OUTBOX_MAX_ATTEMPTS", "3"),
        ])).unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/marketplace"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.nats_url, None);
        assert_eq!(config.outbox_policy().max_attempts, 3);
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            Config::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err(),
            ConfigError::Invalid { key: "PORT", value: "eighty".into() }
        );
        assert!(Config::from_lookup(lookup(&[("OUTBOX_MAX_ATTEMPTS", "0")])).is_err());
    }
}
