//! Strongly-typed reservation identifiers.
//!
//! Reservation ids name the requester and the creation instant, with a
//! random suffix so two requests landing in the same millisecond cannot
//! collide:
//!
//! ```text
//! rsv-<requesterID>-<unix-millis>-<suffix>
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

/// Length of the random suffix taken from a freshly generated ULID.
const SUFFIX_LEN: usize = 8;

/// A unique identifier for a reservation record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(String);

impl ReservationId {
    /// Generates a new id for a reservation made by `requester_id`.
    #[must_use]
    pub fn generate(requester_id: &str) -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let ulid = Ulid::new().to_string();
        let suffix = ulid[ulid.len() - SUFFIX_LEN..].to_ascii_lowercase();
        Self(format!("rsv-{requester_id}-{millis}-{suffix}"))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ReservationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.strip_prefix("rsv-").is_none_or(str::is_empty) {
            return Err(Error::InvalidInput(format!(
                "invalid reservation id '{s}': expected rsv-<requester>-<millis>-<suffix>"
            )));
        }
        Ok(Self(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_name_the_requester() {
        let id = ReservationId::generate("cluster-1");
        assert!(id.as_str().starts_with("rsv-cluster-1-"));
    }

    #[test]
    fn generated_ids_are_unique_within_a_millisecond() {
        let a = ReservationId::generate("cluster-1");
        let b = ReservationId::generate("cluster-1");
        assert_ne!(a, b);
    }

    #[test]
    fn parse_rejects_foreign_shapes() {
        assert!("".parse::<ReservationId>().is_err());
        assert!("rsv-".parse::<ReservationId>().is_err());
        assert!("run-abc".parse::<ReservationId>().is_err());
        assert!("rsv-c1-123-abcd".parse::<ReservationId>().is_ok());
    }
}
