//! Broker configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tether_core::{Error, Result};

/// Default number of compare-and-swap attempts when locking a provider.
pub const DEFAULT_LOCK_RETRIES: u32 = 5;

/// Default horizon after which an unrefreshed advertisement is marked
/// inactive.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// Default cadence of the lifecycle observer.
pub const DEFAULT_OBSERVER_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for the Tether broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    pub http_port: u16,

    /// Enable debug mode.
    ///
    /// When enabled, the caller identity may come from the `x-cluster-id`
    /// header (dev/tests). When disabled, only the identity forwarded by
    /// the mTLS-terminating front (`x-forwarded-client-cn`) is accepted.
    pub debug: bool,

    /// Directory holding `tls.crt`, `tls.key` and `ca.crt` for the
    /// terminating front. Required when `debug` is false.
    #[serde(default)]
    pub cert_path: Option<PathBuf>,

    /// Key namespace in the state store.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Compare-and-swap attempts when locking a provider advertisement.
    #[serde(default = "default_lock_retries")]
    pub lock_retries: u32,

    /// Advertisements unrefreshed for longer than this are marked inactive.
    #[serde(default = "default_stale_after", with = "humantime_serde")]
    pub stale_after: Duration,

    /// Cadence of the lifecycle observer loop. Zero disables the loop.
    #[serde(default = "default_observer_interval", with = "humantime_serde")]
    pub observer_interval: Duration,
}

fn default_namespace() -> String {
    "tether".to_string()
}

fn default_lock_retries() -> u32 {
    DEFAULT_LOCK_RETRIES
}

fn default_stale_after() -> Duration {
    DEFAULT_STALE_AFTER
}

fn default_observer_interval() -> Duration {
    DEFAULT_OBSERVER_INTERVAL
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            debug: false,
            cert_path: None,
            namespace: default_namespace(),
            lock_retries: DEFAULT_LOCK_RETRIES,
            stale_after: DEFAULT_STALE_AFTER,
            observer_interval: DEFAULT_OBSERVER_INTERVAL,
        }
    }
}

impl Config {
    /// Loads configuration from `TETHER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when a variable is set but
    /// malformed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = read_env("TETHER_HTTP_PORT")? {
            config.http_port = port
                .parse()
                .map_err(|e| Error::InvalidInput(format!("TETHER_HTTP_PORT: {e}")))?;
        }
        if let Some(debug) = read_env("TETHER_DEBUG")? {
            config.debug = debug
                .parse()
                .map_err(|e| Error::InvalidInput(format!("TETHER_DEBUG: {e}")))?;
        }
        if let Some(path) = read_env("TETHER_CERT_PATH")? {
            config.cert_path = Some(PathBuf::from(path));
        }
        if let Some(namespace) = read_env("TETHER_STORE_NAMESPACE")? {
            config.namespace = namespace;
        }
        if let Some(retries) = read_env("TETHER_LOCK_RETRIES")? {
            config.lock_retries = retries
                .parse()
                .map_err(|e| Error::InvalidInput(format!("TETHER_LOCK_RETRIES: {e}")))?;
        }
        if let Some(span) = read_env("TETHER_STALE_AFTER")? {
            config.stale_after = parse_span("TETHER_STALE_AFTER", &span)?;
        }
        if let Some(span) = read_env("TETHER_OBSERVER_INTERVAL")? {
            config.observer_interval = parse_span("TETHER_OBSERVER_INTERVAL", &span)?;
        }

        Ok(config)
    }

    /// Validates the configuration before serving.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if !self.debug && self.cert_path.is_none() {
            return Err(Error::InvalidInput(
                "TETHER_CERT_PATH is required when TETHER_DEBUG=false".to_string(),
            ));
        }
        if self.lock_retries == 0 {
            return Err(Error::InvalidInput(
                "TETHER_LOCK_RETRIES must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_env(name: &str) -> Result<Option<String>> {
    match std::env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(Error::InvalidInput(format!("{name}: {e}"))),
    }
}

fn parse_span(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).map_err(|e| Error::InvalidInput(format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_in_debug() {
        let config = Config {
            debug: true,
            ..Config::default()
        };
        config.validate().unwrap();
        assert_eq!(config.lock_retries, 5);
        assert_eq!(config.stale_after, Duration::from_secs(300));
    }

    #[test]
    fn cert_path_required_outside_debug() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let config = Config {
            cert_path: Some(PathBuf::from("/etc/tether/certs")),
            ..Config::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn zero_lock_retries_rejected() {
        let config = Config {
            debug: true,
            lock_retries: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
