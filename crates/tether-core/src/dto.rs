//! Wire contracts shared by the broker API and the agent client.
//!
//! All bodies are JSON. Quantities travel as unit-suffixed strings and are
//! parsed at this boundary; timestamps are RFC 3339; durations are
//! human-readable spans (`1h`, `30m`). Conversions to record types return
//! the structured errors the HTTP layer maps to 400s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{Error, Result};
use crate::quantity::Quantity;
use crate::records::{ClusterAdvertisement, Reservation, ReservationPhase};
use crate::resources::{ResourceMetrics, ResourceQuantities};

/// Component quantities as unit-suffixed decimal strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuantitiesDto {
    /// CPU quantity, e.g. `500m`.
    pub cpu: String,
    /// Memory quantity, e.g. `1Gi`.
    pub memory: String,
    /// Optional GPU count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<String>,
    /// Optional storage quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
}

impl ResourceQuantitiesDto {
    /// Parses the string quantities into their fixed-point form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when a required component is empty
    /// and [`Error::InvalidQuantity`] when any component fails to parse.
    pub fn parse(&self) -> Result<ResourceQuantities> {
        if self.cpu.is_empty() || self.memory.is_empty() {
            return Err(Error::InvalidInput(
                "cpu and memory quantities are required".to_string(),
            ));
        }
        Ok(ResourceQuantities {
            cpu: self.cpu.parse()?,
            memory: self.memory.parse()?,
            gpu: parse_optional(self.gpu.as_deref())?,
            storage: parse_optional(self.storage.as_deref())?,
        })
    }
}

fn parse_optional(value: Option<&str>) -> Result<Option<Quantity>> {
    match value {
        None | Some("") => Ok(None),
        Some(s) => Ok(Some(s.parse()?)),
    }
}

impl From<&ResourceQuantities> for ResourceQuantitiesDto {
    fn from(rq: &ResourceQuantities) -> Self {
        Self {
            cpu: rq.cpu.to_string(),
            memory: rq.memory.to_string(),
            gpu: rq.gpu.as_ref().map(Quantity::to_string),
            storage: rq.storage.as_ref().map(Quantity::to_string),
        }
    }
}

/// A cluster's resource snapshot on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetricsDto {
    /// Total physical capacity.
    pub capacity: ResourceQuantitiesDto,
    /// Schedulable ceiling.
    pub allocatable: ResourceQuantitiesDto,
    /// Consumed by local workloads.
    pub allocated: ResourceQuantitiesDto,
    /// Remaining headroom.
    pub available: ResourceQuantitiesDto,
    /// Broker-owned reserved component; agents normally omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved: Option<ResourceQuantitiesDto>,
}

impl ResourceMetricsDto {
    /// Parses the snapshot into its fixed-point form.
    ///
    /// # Errors
    ///
    /// Propagates quantity parse failures from any component group.
    pub fn parse(&self) -> Result<ResourceMetrics> {
        Ok(ResourceMetrics {
            capacity: self.capacity.parse()?,
            allocatable: self.allocatable.parse()?,
            allocated: self.allocated.parse()?,
            available: self.available.parse()?,
            reserved: self.reserved.as_ref().map(ResourceQuantitiesDto::parse).transpose()?,
        })
    }
}

impl From<&ResourceMetrics> for ResourceMetricsDto {
    fn from(m: &ResourceMetrics) -> Self {
        Self {
            capacity: (&m.capacity).into(),
            allocatable: (&m.allocatable).into(),
            allocated: (&m.allocated).into(),
            available: (&m.available).into(),
            reserved: m.reserved.as_ref().map(Into::into),
        }
    }
}

/// An agent's published advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisementDto {
    /// Advertised cluster id; must match the caller's bound identity.
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    /// Human-readable cluster name.
    pub cluster_name: String,
    /// Agent-side collection timestamp.
    pub timestamp: DateTime<Utc>,
    /// The resource snapshot.
    pub resources: ResourceMetricsDto,
}

impl AdvertisementDto {
    /// Converts the payload into a stored advertisement record.
    ///
    /// The record is marked active; the broker-side intake decides what
    /// happens to any reserved component the payload carries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on an empty cluster id and quantity
    /// errors from the snapshot.
    pub fn to_record(&self) -> Result<ClusterAdvertisement> {
        if self.cluster_id.is_empty() {
            return Err(Error::InvalidInput("clusterID is required".to_string()));
        }
        Ok(ClusterAdvertisement {
            cluster_id: self.cluster_id.clone(),
            cluster_name: self.cluster_name.clone(),
            timestamp: self.timestamp,
            resources: self.resources.parse()?,
            active: true,
        })
    }
}

impl From<&ClusterAdvertisement> for AdvertisementDto {
    fn from(adv: &ClusterAdvertisement) -> Self {
        Self {
            cluster_id: adv.cluster_id.clone(),
            cluster_name: adv.cluster_name.clone(),
            timestamp: adv.timestamp,
            resources: (&adv.resources).into(),
        }
    }
}

/// Intake response: the stored advertisement plus piggybacked provider
/// instructions addressed to the publishing cluster.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisementResponseDto {
    /// The advertisement as stored (reserved component included).
    pub advertisement: AdvertisementDto,
    /// Reserved-phase reservations targeting the caller.
    #[serde(default)]
    pub provider_instructions: Vec<ReservationDto>,
}

/// A reservation request from a requester agent. The requester identity is
/// bound from the transport, never from the body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequestDto {
    /// Quantities to reserve; CPU and memory required.
    pub requested_resources: ResourceQuantitiesDto,
    /// Placement priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Reservation lifetime as a human-readable span, e.g. `1h`, `30m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// Reservation status on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReservationStatusDto {
    /// `Pending`, `Reserved`, `Active`, `Released` or `Failed`.
    pub phase: String,
    /// Explanation of the latest transition.
    pub message: String,
    /// When the provider lock landed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_at: Option<DateTime<Utc>>,
    /// When the reservation lapses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A reservation record on the wire; doubles as the instruction delivered
/// to requester and provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReservationDto {
    /// Reservation id.
    pub id: String,
    /// The requesting cluster.
    #[serde(rename = "requesterID")]
    pub requester_id: String,
    /// The chosen provider cluster (empty when placement failed).
    #[serde(rename = "targetClusterID")]
    pub target_cluster_id: String,
    /// Quantities reserved.
    pub requested_resources: ResourceQuantitiesDto,
    /// Current status.
    pub status: ReservationStatusDto,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

impl From<&Reservation> for ReservationDto {
    fn from(rsv: &Reservation) -> Self {
        Self {
            id: rsv.id.to_string(),
            requester_id: rsv.requester_id.clone(),
            target_cluster_id: rsv.target_cluster_id.clone(),
            requested_resources: (&rsv.requested).into(),
            status: ReservationStatusDto {
                phase: rsv.status.phase.to_string(),
                message: rsv.status.message.clone(),
                reserved_at: rsv.status.reserved_at,
                expires_at: rsv.status.expires_at,
            },
            created_at: rsv.created_at,
        }
    }
}

impl ReservationDto {
    /// Returns true when this instruction's reservation still holds
    /// provider capacity (phase `Reserved`).
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.status.phase == ReservationPhase::Reserved.to_string()
    }
}

/// Parses a human-readable duration span (`1h`, `30m`, `90s`).
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on malformed spans.
pub fn parse_duration_span(s: &str) -> Result<std::time::Duration> {
    humantime::parse_duration(s)
        .map_err(|e| Error::InvalidInput(format!("invalid duration '{s}': {e}")))
}
