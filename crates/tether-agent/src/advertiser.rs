//! Periodic advertisement publishing.
//!
//! One logical loop: collect a snapshot, publish it, materialise any
//! piggybacked provider instructions. The cadence carries up to 10%
//! jitter so a fleet of agents does not publish in lockstep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use tether_core::{AdvertisementDto, ReservationDto, Result};

use crate::client::BrokerTransport;
use crate::local::{LocalRecords, ProviderInstruction};
use crate::snapshot::ClusterResourceSource;

/// Publishes this cluster's advertisement on a cadence.
pub struct Advertiser {
    transport: Arc<dyn BrokerTransport>,
    source: Arc<dyn ClusterResourceSource>,
    records: Arc<LocalRecords>,
    cluster_id: String,
    cluster_name: String,
}

impl Advertiser {
    /// Creates an advertiser for `cluster_id`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        source: Arc<dyn ClusterResourceSource>,
        records: Arc<LocalRecords>,
        cluster_id: impl Into<String>,
        cluster_name: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            source,
            records,
            cluster_id: cluster_id.into(),
            cluster_name: cluster_name.into(),
        }
    }

    /// Runs the publish loop until `shutdown` resolves. Publish failures
    /// are logged and retried on the next tick.
    pub async fn run(self, interval: Duration, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        tracing::info!(
            cluster = %self.cluster_id,
            interval = ?interval,
            "starting advertiser"
        );
        loop {
            if let Err(e) = self.publish_once().await {
                tracing::warn!(error = %e, "advertisement publish failed; will retry");
            }

            tokio::select! {
                () = tokio::time::sleep(jittered(interval)) => {}
                _ = &mut shutdown => {
                    tracing::info!("advertiser stopped");
                    return;
                }
            }
        }
    }

    /// Collects a snapshot, publishes it, and processes the piggybacked
    /// instructions.
    ///
    /// # Errors
    ///
    /// Propagates snapshot and transport failures.
    pub async fn publish_once(&self) -> Result<()> {
        let resources = self.source.snapshot().await?;
        let advertisement = AdvertisementDto {
            cluster_id: self.cluster_id.clone(),
            cluster_name: self.cluster_name.clone(),
            timestamp: Utc::now(),
            resources: (&resources).into(),
        };

        let instructions = self.transport.publish_advertisement(&advertisement).await?;
        self.materialise(&instructions);
        Ok(())
    }

    fn materialise(&self, instructions: &[ReservationDto]) {
        for dto in instructions {
            if !dto.is_reserved() {
                continue;
            }
            match ProviderInstruction::from_reservation(dto) {
                Ok(instruction) => {
                    if self.records.insert_provider_instruction(instruction) {
                        tracing::info!(
                            reservation = %dto.id,
                            requester = %dto.requester_id,
                            "materialised provider instruction from advertisement response"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(reservation = %dto.id, error = %e, "bad piggybacked instruction");
                }
            }
        }
    }
}

/// Adds up to 10% random jitter to the base interval.
fn jittered(interval: Duration) -> Duration {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let window = interval.as_millis().max(10) / 10;
    let jitter = u64::try_from(u128::from(nanos) % window).unwrap_or(0);
    interval + Duration::from_millis(jitter)
}
