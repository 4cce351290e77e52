//! Agent configuration.

use std::path::PathBuf;
use std::time::Duration;

use tether_core::{Error, Result};

/// Default advertisement publish cadence.
pub const DEFAULT_ADVERTISE_INTERVAL: Duration = Duration::from_secs(30);

/// Default instruction poll cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for the Tether agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the broker, e.g. `https://broker.example:8443`.
    pub broker_url: String,

    /// This cluster's identity; must match the client certificate's
    /// common name.
    pub cluster_id: String,

    /// Human-readable cluster name carried on advertisements.
    pub cluster_name: String,

    /// Directory holding `tls.crt`, `tls.key` and `ca.crt` for mTLS to
    /// the broker. When absent the agent speaks plain HTTP and relies on
    /// the broker's debug identity header.
    pub cert_path: Option<PathBuf>,

    /// Advertisement publish cadence.
    pub advertise_interval: Duration,

    /// Instruction poll cadence.
    pub poll_interval: Duration,
}

impl AgentConfig {
    /// Loads configuration from `TETHER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when a required variable is
    /// missing or a value is malformed.
    pub fn from_env() -> Result<Self> {
        let broker_url = require_env("TETHER_BROKER_URL")?;
        let cluster_id = require_env("TETHER_CLUSTER_ID")?;
        let cluster_name =
            read_env("TETHER_CLUSTER_NAME")?.unwrap_or_else(|| cluster_id.clone());
        let cert_path = read_env("TETHER_CERT_PATH")?.map(PathBuf::from);

        let advertise_interval = match read_env("TETHER_ADVERTISE_INTERVAL")? {
            Some(span) => parse_span("TETHER_ADVERTISE_INTERVAL", &span)?,
            None => DEFAULT_ADVERTISE_INTERVAL,
        };
        let poll_interval = match read_env("TETHER_POLL_INTERVAL")? {
            Some(span) => parse_span("TETHER_POLL_INTERVAL", &span)?,
            None => DEFAULT_POLL_INTERVAL,
        };

        let config = Self {
            broker_url,
            cluster_id,
            cluster_name,
            cert_path,
            advertise_interval,
            poll_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.broker_url.trim().is_empty() {
            return Err(Error::InvalidInput(
                "TETHER_BROKER_URL must not be empty".to_string(),
            ));
        }
        if self.cluster_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "TETHER_CLUSTER_ID must not be empty".to_string(),
            ));
        }
        if self.advertise_interval.is_zero() || self.poll_interval.is_zero() {
            return Err(Error::InvalidInput(
                "advertisement and poll intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn require_env(name: &str) -> Result<String> {
    read_env(name)?.ok_or_else(|| Error::InvalidInput(format!("{name} is required")))
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

    fn base() -> AgentConfig {
        AgentConfig {
            broker_url: "https://broker.example:8443".to_string(),
            cluster_id: "c1".to_string(),
            cluster_name: "cluster one".to_string(),
            cert_path: None,
            advertise_interval: DEFAULT_ADVERTISE_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[test]
    fn valid_config_passes() {
        base().validate().unwrap();
    }

    #[test]
    fn empty_identity_is_rejected() {
        let config = AgentConfig {
            cluster_id: " ".to_string(),
            ..base()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let config = AgentConfig {
            poll_interval: Duration::ZERO,
            ..base()
        };
        assert!(config.validate().is_err());
    }
}
