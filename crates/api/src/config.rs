//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use saga::NodeCreationSettings;
use store::{DEFAULT_MAX_BATCH_SIZE, LockOptions};

/// Smallest usable `MAX_BATCH_SIZE`: a user's first node commits the graph,
/// its pointer, the node and two outbox records in one batch.
pub const MIN_BATCH_SIZE: usize = 5;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default `"0.0.0.0"`)
/// - `PORT`: listen port (default `3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory store if unset
/// - `LOCK_TTL_SECS` (30), `LOCK_ACQUIRE_TIMEOUT_MS` (5000)
/// - `OPERATION_RETENTION_SECS` (3600), `CLEANUP_INTERVAL_SECS` (60)
/// - `OUTBOX_POLL_INTERVAL_MS` (500), `MAX_BATCH_SIZE` (25)
///
/// Zero is rejected for the TTL, retention and loop intervals, and
/// `MAX_BATCH_SIZE` is raised to at least [`MIN_BATCH_SIZE`].
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub lock_ttl: Duration,
    pub lock_acquire_timeout: Duration,
    pub operation_retention: Duration,
    pub cleanup_interval: Duration,
    pub outbox_poll_interval: Duration,
    pub max_batch_size: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults for unset, unparsable or out-of-range values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let positive = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|n| *n > 0)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(lookup("PORT"), defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            lock_ttl: positive("LOCK_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_ttl),
            lock_acquire_timeout: lookup("LOCK_ACQUIRE_TIMEOUT_MS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_acquire_timeout),
            operation_retention: positive("OPERATION_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.operation_retention),
            cleanup_interval: positive("CLEANUP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_interval),
            outbox_poll_interval: positive("OUTBOX_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_poll_interval),
            max_batch_size: parse_or(lookup("MAX_BATCH_SIZE"), defaults.max_batch_size)
                .max(MIN_BATCH_SIZE),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            ttl: self.lock_ttl,
            acquire_timeout: self.lock_acquire_timeout,
            ..LockOptions::default()
        }
    }

    pub fn node_creation_settings(&self) -> NodeCreationSettings {
        NodeCreationSettings {
            lock: self.lock_options(),
            ..NodeCreationSettings::default()
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            lock_ttl: Duration::from_secs(30),
            lock_acquire_timeout: Duration::from_millis(5000),
            operation_retention: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
            outbox_poll_interval: Duration::from_millis(500),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_map(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.database_url, None);
        assert_eq!(config.lock_ttl, Duration::from_secs(30));
        assert_eq!(config.max_batch_size, 25);
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        assert_eq!(from_map(&[]), Config::default());
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = from_map(&[
            ("PORT", "8080"),
            ("DATABASE_URL", "postgres://localhost/graph"),
            ("LOCK_ACQUIRE_TIMEOUT_MS", "250"),
            ("OUTBOX_POLL_INTERVAL_MS", "100"),
            ("MAX_BATCH_SIZE", "10"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/graph"));
        assert_eq!(config.lock_acquire_timeout, Duration::from_millis(250));
        assert_eq!(config.outbox_poll_interval, Duration::from_millis(100));
        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.node_creation_settings().lock.acquire_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_garbage_falls_back_to_defaults() {
        let config = from_map(&[("PORT", "eighty"), ("LOCK_TTL_SECS", "-1"), ("DATABASE_URL", " ")]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.lock_ttl, Duration::from_secs(30));
        assert_eq!(config.database_url, None);
    }

    #[test]
    fn test_zero_intervals_fall_back_to_defaults() {
        let config = from_map(&[
            ("CLEANUP_INTERVAL_SECS", "0"),
            ("OUTBOX_POLL_INTERVAL_MS", "0"),
            ("OPERATION_RETENTION_SECS", "0"),
            ("LOCK_TTL_SECS", "0"),
            ("LOCK_ACQUIRE_TIMEOUT_MS", "0"),
        ]);
        let defaults = Config::default();
        assert_eq!(config.cleanup_interval, defaults.cleanup_interval);
        assert_eq!(config.outbox_poll_interval, defaults.outbox_poll_interval);
        assert_eq!(config.operation_retention, defaults.operation_retention);
        assert_eq!(config.lock_ttl, defaults.lock_ttl);
        // A zero acquire timeout means a single attempt
        assert_eq!(config.lock_acquire_timeout, Duration::ZERO);
    }

    #[test]
    fn test_batch_size_is_raised_to_minimum() {
        assert_eq!(from_map(&[("MAX_BATCH_SIZE", "2")]).max_batch_size, MIN_BATCH_SIZE);
        assert_eq!(from_map(&[("MAX_BATCH_SIZE", "0")]).max_batch_size, MIN_BATCH_SIZE);
        assert_eq!(from_map(&[("MAX_BATCH_SIZE", "7")]).max_batch_size, 7);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
