//! Runtime configuration resolved from the environment.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Process-wide provisioning settings.
///
/// Descriptor-level knobs (timeouts, wait strategy) live on the
/// [`Descriptor`](crate::descriptor::Descriptor); these are the ambient ones.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Prefix for container names.
    pub container_prefix: String,
    /// Host address container ports are published on.
    pub publish_host: String,
    /// Interval between readiness probe attempts.
    pub poll_interval: Duration,
    /// Keep containers around on teardown (for debugging).
    pub keep_on_teardown: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            container_prefix: "needdock".to_string(),
            publish_host: "127.0.0.1".to_string(),
            poll_interval: Duration::from_millis(500),
            keep_on_teardown: false,
        }
    }
}

impl RuntimeConfig {
    /// Resolve configuration from `NEEDDOCK_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            container_prefix: optional_env("NEEDDOCK_CONTAINER_PREFIX")?
                .unwrap_or(defaults.container_prefix),
            publish_host: optional_env("NEEDDOCK_PUBLISH_HOST")?.unwrap_or(defaults.publish_host),
            poll_interval: Duration::from_millis(parse_optional_env(
                "NEEDDOCK_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            keep_on_teardown: optional_env("NEEDDOCK_KEEP_ON_TEARDOWN")?
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "NEEDDOCK_KEEP_ON_TEARDOWN".to_string(),
                    message: format!("must be 'true' or 'false': {e}"),
                })?
                .unwrap_or(defaults.keep_on_teardown),
        })
    }
}

fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
            key: key.to_string(),
        }),
    }
}

fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match optional_env(key)? {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.container_prefix, "needdock");
        assert_eq!(config.publish_host, "127.0.0.1");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert!(!config.keep_on_teardown);
    }

    #[test]
    fn test_parse_optional_env_falls_back() {
        let value: u64 = parse_optional_env("NEEDDOCK_TEST_UNSET_KEY", 42).expect("default");
        assert_eq!(value, 42);
    }
}
