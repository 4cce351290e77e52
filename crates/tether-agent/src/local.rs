//! Cluster-local records.
//!
//! The agent materialises broker state into local records: resource
//! requests created by users, the requester-side reservation instruction
//! answering each request, and provider-side instructions describing
//! capacity this cluster must hold for others.
//!
//! Instructions are keyed by reservation id with insert-if-absent
//! semantics, which is what makes the piggyback and poll delivery paths
//! safe to run together: the second delivery of the same reservation is
//! discarded.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tether_core::{Error, ReservationDto, ResourceQuantities, Result};

/// Phase of a local resource request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestPhase {
    /// Sent (or about to be sent) to the broker.
    Pending,
    /// The broker reserved capacity; see the reservation instruction.
    Reserved,
    /// The broker could not place the request. Operators create a new
    /// request rather than resubmitting this one.
    Failed,
}

/// What a user asked this cluster to obtain from the federation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Local record name.
    pub name: String,
    /// Quantities to obtain.
    pub requested: ResourceQuantities,
    /// Placement priority.
    pub priority: i32,
    /// Requested reservation lifetime, human-readable (`1h`, `30m`).
    pub duration: Option<String>,
    /// Current phase.
    pub phase: RequestPhase,
    /// Provider chosen by the broker, once reserved.
    pub target_cluster_id: Option<String>,
    /// Broker-side reservation id, once reserved.
    pub reservation_id: Option<String>,
    /// Explanation of the latest transition.
    pub message: String,
    /// Last status change.
    pub last_update: DateTime<Utc>,
}

impl ResourceRequest {
    /// Creates a pending request.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        requested: ResourceQuantities,
        priority: i32,
        duration: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            requested,
            priority,
            duration,
            phase: RequestPhase::Pending,
            target_cluster_id: None,
            reservation_id: None,
            message: "awaiting reservation".to_string(),
            last_update: Utc::now(),
        }
    }
}

/// Requester-side instruction: where this cluster's request was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationInstruction {
    /// Broker-side reservation id.
    pub reservation_id: String,
    /// The provider to peer with.
    pub target_cluster_id: String,
    /// Quantities reserved there.
    pub requested: ResourceQuantities,
    /// Operator-facing summary.
    pub message: String,
    /// When the reservation lapses.
    pub expires_at: Option<DateTime<Utc>>,
}

impl ReservationInstruction {
    /// Builds the instruction from a reservation answer.
    ///
    /// # Errors
    ///
    /// Propagates quantity parse failures.
    pub fn from_reservation(dto: &ReservationDto) -> Result<Self> {
        let requested = dto.requested_resources.parse()?;
        Ok(Self {
            reservation_id: dto.id.clone(),
            target_cluster_id: dto.target_cluster_id.clone(),
            message: format!(
                "use {} for {} CPU / {} memory",
                dto.target_cluster_id, requested.cpu, requested.memory
            ),
            expires_at: dto.status.expires_at,
            requested,
        })
    }
}

/// Provider-side instruction: capacity this cluster holds for a requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInstruction {
    /// Broker-side reservation id.
    pub reservation_id: String,
    /// The cluster the capacity is held for.
    pub requester_id: String,
    /// Quantities held.
    pub requested: ResourceQuantities,
    /// Operator-facing summary.
    pub message: String,
    /// When the hold lapses.
    pub expires_at: Option<DateTime<Utc>>,
}

impl ProviderInstruction {
    /// Builds the instruction from a delivered reservation.
    ///
    /// # Errors
    ///
    /// Propagates quantity parse failures.
    pub fn from_reservation(dto: &ReservationDto) -> Result<Self> {
        let requested = dto.requested_resources.parse()?;
        Ok(Self {
            reservation_id: dto.id.clone(),
            requester_id: dto.requester_id.clone(),
            message: format!(
                "hold {} CPU / {} memory for requester {}",
                requested.cpu, requested.memory, dto.requester_id
            ),
            expires_at: dto.status.expires_at,
            requested,
        })
    }
}

/// Thread-safe store of the agent's local records.
#[derive(Debug, Default)]
pub struct LocalRecords {
    requests: RwLock<HashMap<String, ResourceRequest>>,
    reservation_instructions: RwLock<HashMap<String, ReservationInstruction>>,
    provider_instructions: RwLock<HashMap<String, ProviderInstruction>>,
}

impl LocalRecords {
    /// Creates an empty record set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a resource request.
    pub fn upsert_request(&self, request: ResourceRequest) {
        self.write_requests().insert(request.name.clone(), request);
    }

    /// Returns a resource request by name.
    #[must_use]
    pub fn request(&self, name: &str) -> Option<ResourceRequest> {
        read(&self.requests).get(name).cloned()
    }

    /// Applies `update` to the named request, stamping the update time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no such request exists.
    pub fn update_request(
        &self,
        name: &str,
        update: impl FnOnce(&mut ResourceRequest),
    ) -> Result<ResourceRequest> {
        let mut requests = self.write_requests();
        let request = requests
            .get_mut(name)
            .ok_or_else(|| Error::not_found("resource request", name))?;
        update(request);
        request.last_update = Utc::now();
        Ok(request.clone())
    }

    /// Inserts a requester-side instruction unless one already exists for
    /// the reservation. Returns false on a duplicate delivery.
    pub fn insert_reservation_instruction(&self, instruction: ReservationInstruction) -> bool {
        let mut map = write(&self.reservation_instructions);
        match map.entry(instruction.reservation_id.clone()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(instruction);
                true
            }
        }
    }

    /// Inserts a provider-side instruction unless one already exists for
    /// the reservation. Returns false on a duplicate delivery.
    pub fn insert_provider_instruction(&self, instruction: ProviderInstruction) -> bool {
        let mut map = write(&self.provider_instructions);
        match map.entry(instruction.reservation_id.clone()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(instruction);
                true
            }
        }
    }

    /// Returns all provider-side instructions.
    #[must_use]
    pub fn provider_instructions(&self) -> Vec<ProviderInstruction> {
        read(&self.provider_instructions).values().cloned().collect()
    }

    /// Returns all requester-side instructions.
    #[must_use]
    pub fn reservation_instructions(&self) -> Vec<ReservationInstruction> {
        read(&self.reservation_instructions).values().cloned().collect()
    }

    fn write_requests(&self) -> RwLockWriteGuard<'_, HashMap<String, ResourceRequest>> {
        write(&self.requests)
    }
}

// A poisoned lock only means another thread panicked mid-write of a
// record clone; the maps themselves stay coherent, so keep serving.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{ReservationStatusDto, ResourceQuantitiesDto};

    fn delivered(id: &str) -> ReservationDto {
        ReservationDto {
            id: id.to_string(),
            requester_id: "c0".to_string(),
            target_cluster_id: "c2".to_string(),
            requested_resources: ResourceQuantitiesDto {
                cpu: "500m".to_string(),
                memory: "1Gi".to_string(),
                gpu: None,
                storage: None,
            },
            status: ReservationStatusDto {
                phase: "Reserved".to_string(),
                message: "locked".to_string(),
                reserved_at: Some(Utc::now()),
                expires_at: None,
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_provider_delivery_is_discarded() {
        let records = LocalRecords::new();
        let instruction = ProviderInstruction::from_reservation(&delivered("rsv-1")).unwrap();

        assert!(records.insert_provider_instruction(instruction.clone()));
        assert!(!records.insert_provider_instruction(instruction));
        assert_eq!(records.provider_instructions().len(), 1);
    }

    #[test]
    fn duplicate_reservation_delivery_is_discarded() {
        let records = LocalRecords::new();
        let instruction = ReservationInstruction::from_reservation(&delivered("rsv-1")).unwrap();

        assert!(records.insert_reservation_instruction(instruction.clone()));
        assert!(!records.insert_reservation_instruction(instruction));
    }

    #[test]
    fn instructions_carry_counterparty_and_quantities() {
        let provider = ProviderInstruction::from_reservation(&delivered("rsv-1")).unwrap();
        assert_eq!(provider.requester_id, "c0");
        assert!(provider.message.contains("500m"));
        assert!(provider.message.contains("c0"));

        let requester = ReservationInstruction::from_reservation(&delivered("rsv-1")).unwrap();
        assert_eq!(requester.target_cluster_id, "c2");
        assert!(requester.message.contains("c2"));
    }

    #[test]
    fn update_request_stamps_and_returns() {
        let records = LocalRecords::new();
        records.upsert_request(ResourceRequest::new(
            "req-1",
            ResourceQuantities::default(),
            0,
            None,
        ));

        let updated = records
            .update_request("req-1", |request| {
                request.phase = RequestPhase::Failed;
                request.message = "broker unreachable".to_string();
            })
            .unwrap();
        assert_eq!(updated.phase, RequestPhase::Failed);

        assert!(records.update_request("ghost", |_| {}).is_err());
    }
}
