//! Persisted record types: cluster advertisements and reservations.
//!
//! Both record kinds live in the state store as JSON documents under
//! versioned keys; the opaque version token is carried alongside the
//! record by the typed stores (`crate::store`), never inside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::ReservationId;
use crate::resources::{ResourceMetrics, ResourceQuantities};

/// A cluster's advertised resources, keyed by `<clusterID>-adv`.
///
/// Ownership is split: the agent owns everything except
/// `resources.reserved`, which only the broker's reservation path mutates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAdvertisement {
    /// Stable cluster identifier, equal to the agent's transport identity.
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    /// Human-readable cluster name.
    pub cluster_name: String,
    /// When the agent last refreshed this advertisement.
    pub timestamp: DateTime<Utc>,
    /// The cluster's resource snapshot.
    pub resources: ResourceMetrics,
    /// Whether the cluster is a live placement candidate. Cleared by the
    /// lifecycle observer when the advertisement goes stale.
    pub active: bool,
}

impl ClusterAdvertisement {
    /// Returns the canonical store key for a cluster's advertisement.
    #[must_use]
    pub fn store_key(cluster_id: &str) -> String {
        format!("{cluster_id}-adv")
    }

    /// Returns this advertisement's store key.
    #[must_use]
    pub fn key(&self) -> String {
        Self::store_key(&self.cluster_id)
    }
}

/// Lifecycle phase of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationPhase {
    /// Created, provider capacity not yet locked.
    Pending,
    /// Provider capacity locked; instruction deliverable.
    Reserved,
    /// Peering established by the external flow.
    Active,
    /// Capacity returned to the provider. Terminal.
    Released,
    /// Placement or locking failed. Terminal.
    Failed,
}

impl ReservationPhase {
    /// Returns true for phases that will never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Released | Self::Failed)
    }

    /// Returns true for phases during which the target's reserved
    /// component includes this reservation.
    #[must_use]
    pub fn holds_capacity(self) -> bool {
        matches!(self, Self::Reserved | Self::Active)
    }
}

impl std::fmt::Display for ReservationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Reserved => "Reserved",
            Self::Active => "Active",
            Self::Released => "Released",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Mutable status of a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationStatus {
    /// Current phase.
    pub phase: ReservationPhase,
    /// Operator-facing explanation of the latest transition.
    pub message: String,
    /// When the provider lock landed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_at: Option<DateTime<Utc>>,
    /// When the reservation lapses, if a duration was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Last status write.
    pub last_update: DateTime<Utc>,
}

/// A broker-managed claim of one cluster's capacity by another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Unique reservation id; also the store key.
    pub id: ReservationId,
    /// The cluster asking for capacity.
    #[serde(rename = "requesterID")]
    pub requester_id: String,
    /// The provider cluster chosen by the decision engine.
    #[serde(rename = "targetClusterID")]
    pub target_cluster_id: String,
    /// The quantities claimed.
    pub requested: ResourceQuantities,
    /// Placement priority (higher wins future scheduling refinements).
    pub priority: i32,
    /// Requested lifetime, if bounded.
    #[serde(default, with = "humantime_serde::option")]
    pub duration: Option<std::time::Duration>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Set while the target's reserved component includes this record.
    /// The release flow is the only writer allowed to clear it, and the
    /// lifecycle observer refuses to drop a record while it is set.
    pub pinned: bool,
    /// Mutable status.
    pub status: ReservationStatus,
}

impl Reservation {
    /// Creates a new reservation in phase `Pending` with the pin set.
    #[must_use]
    pub fn new(
        id: ReservationId,
        requester_id: impl Into<String>,
        target_cluster_id: impl Into<String>,
        requested: ResourceQuantities,
        priority: i32,
        duration: Option<std::time::Duration>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            requester_id: requester_id.into(),
            target_cluster_id: target_cluster_id.into(),
            requested,
            priority,
            duration,
            created_at: now,
            pinned: true,
            status: ReservationStatus {
                phase: ReservationPhase::Pending,
                message: "awaiting provider lock".to_string(),
                reserved_at: None,
                expires_at: None,
                last_update: now,
            },
        }
    }

    /// Marks the provider lock as taken and stamps expiry from the
    /// requested duration.
    pub fn mark_reserved(&mut self, message: impl Into<String>) {
        let now = Utc::now();
        self.status.phase = ReservationPhase::Reserved;
        self.status.message = message.into();
        self.status.reserved_at = Some(now);
        self.status.expires_at = self
            .duration
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| now + d);
        self.status.last_update = now;
    }

    /// Marks the external peering as established.
    pub fn mark_active(&mut self, message: impl Into<String>) {
        self.status.phase = ReservationPhase::Active;
        self.status.message = message.into();
        self.status.last_update = Utc::now();
    }

    /// Marks the reservation failed and clears the pin (no capacity held).
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status.phase = ReservationPhase::Failed;
        self.status.message = message.into();
        self.status.last_update = Utc::now();
        self.pinned = false;
    }

    /// Marks the capacity as returned and clears the pin. Callers release
    /// the provider lock first.
    pub fn mark_released(&mut self, message: impl Into<String>) {
        self.status.phase = ReservationPhase::Released;
        self.status.message = message.into();
        self.status.last_update = Utc::now();
        self.pinned = false;
    }

    /// Returns true once the reservation's expiry instant has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status
            .expires_at
            .is_some_and(|expires_at| expires_at <= now)
    }
}
