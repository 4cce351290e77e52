//! Synchronous resource request flow.
//!
//! A user-created request triggers exactly one reservation call: mark
//! the request `Pending`, ask the broker, and either materialise the
//! requester-side instruction and mark `Reserved`, or mark `Failed`.
//! Failed requests are not resubmitted automatically — the broker call
//! is not idempotent, so operators create a new request instead.

use std::sync::Arc;

use tether_core::{ReservationRequestDto, Result};

use crate::client::BrokerTransport;
use crate::local::{LocalRecords, RequestPhase, ReservationInstruction, ResourceRequest};

/// Drives resource requests through the broker.
pub struct RequestProcessor {
    transport: Arc<dyn BrokerTransport>,
    records: Arc<LocalRecords>,
}

impl RequestProcessor {
    /// Creates a processor.
    #[must_use]
    pub fn new(transport: Arc<dyn BrokerTransport>, records: Arc<LocalRecords>) -> Self {
        Self { transport, records }
    }

    /// Registers a new request and processes it immediately.
    ///
    /// # Errors
    ///
    /// Propagates local record failures; broker outcomes land on the
    /// request's status rather than in the return value.
    pub async fn submit(&self, request: ResourceRequest) -> Result<ResourceRequest> {
        let name = request.name.clone();
        self.records.upsert_request(request);
        self.process(&name).await
    }

    /// Processes the named request once; terminal requests are returned
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`tether_core::Error::NotFound`] for an unknown name.
    pub async fn process(&self, name: &str) -> Result<ResourceRequest> {
        let request = self
            .records
            .request(name)
            .ok_or_else(|| tether_core::Error::not_found("resource request", name))?;

        if matches!(request.phase, RequestPhase::Reserved | RequestPhase::Failed) {
            return Ok(request);
        }

        self.records.update_request(name, |r| {
            r.phase = RequestPhase::Pending;
            r.message = "sending reservation request to broker".to_string();
        })?;

        let dto = ReservationRequestDto {
            requested_resources: (&request.requested).into(),
            priority: (request.priority != 0).then_some(request.priority),
            duration: request.duration.clone(),
        };

        match self.transport.request_reservation(&dto).await {
            Ok(reservation) => {
                let instruction = ReservationInstruction::from_reservation(&reservation)?;
                if !self.records.insert_reservation_instruction(instruction) {
                    tracing::debug!(
                        reservation = %reservation.id,
                        "reservation instruction already materialised"
                    );
                }
                self.records.update_request(name, |r| {
                    r.phase = RequestPhase::Reserved;
                    r.target_cluster_id = Some(reservation.target_cluster_id.clone());
                    r.reservation_id = Some(reservation.id.clone());
                    r.message =
                        format!("resources reserved in cluster {}", reservation.target_cluster_id);
                })
            }
            Err(e) => {
                tracing::warn!(request = %name, error = %e, "reservation request failed");
                self.records.update_request(name, |r| {
                    r.phase = RequestPhase::Failed;
                    r.message = format!("reservation request failed: {e}");
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tether_core::{
        AdvertisementDto, Error, ReservationDto, ReservationStatusDto, ResourceQuantities,
        ResourceQuantitiesDto,
    };

    struct ScriptedTransport {
        outcomes: Mutex<Vec<Result<ReservationDto>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<Result<ReservationDto>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl BrokerTransport for ScriptedTransport {
        async fn publish_advertisement(
            &self,
            _advertisement: &AdvertisementDto,
        ) -> Result<Vec<ReservationDto>> {
            Ok(Vec::new())
        }

        async fn request_reservation(
            &self,
            _request: &ReservationRequestDto,
        ) -> Result<ReservationDto> {
            *self.calls.lock().unwrap() += 1;
            self.outcomes.lock().unwrap().remove(0)
        }

        async fn fetch_instructions(&self) -> Result<Vec<ReservationDto>> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    fn reserved_answer(id: &str) -> ReservationDto {
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
                reserved_at: Some(chrono::Utc::now()),
                expires_at: None,
            },
            created_at: chrono::Utc::now(),
        }
    }

    fn request(name: &str) -> ResourceRequest {
        ResourceRequest::new(
            name,
            ResourceQuantities::new("500m".parse().unwrap(), "1Gi".parse().unwrap()),
            0,
            None,
        )
    }

    #[tokio::test]
    async fn successful_request_materialises_instruction() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(reserved_answer("rsv-1"))]));
        let records = Arc::new(LocalRecords::new());
        let processor = RequestProcessor::new(Arc::clone(&transport) as _, Arc::clone(&records));

        let result = processor.submit(request("req-1")).await.unwrap();

        assert_eq!(result.phase, RequestPhase::Reserved);
        assert_eq!(result.target_cluster_id.as_deref(), Some("c2"));
        assert_eq!(result.reservation_id.as_deref(), Some("rsv-1"));
        assert_eq!(records.reservation_instructions().len(), 1);
    }

    #[tokio::test]
    async fn failed_request_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(Error::Conflict {
            message: "no fit".to_string(),
        })]));
        let records = Arc::new(LocalRecords::new());
        let processor = RequestProcessor::new(Arc::clone(&transport) as _, Arc::clone(&records));

        let result = processor.submit(request("req-1")).await.unwrap();
        assert_eq!(result.phase, RequestPhase::Failed);
        assert!(result.message.contains("no fit"));

        // Reprocessing a terminal request never calls the broker again.
        let again = processor.process("req-1").await.unwrap();
        assert_eq!(again.phase, RequestPhase::Failed);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let processor = RequestProcessor::new(transport as _, Arc::new(LocalRecords::new()));
        assert!(processor.process("ghost").await.is_err());
    }
}
