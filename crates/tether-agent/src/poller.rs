//! Provider instruction polling.
//!
//! The pull half of instruction delivery: a short-cadence loop keeping
//! worst-case delivery bounded even when this cluster's advertisements
//! stop flowing. Errors are logged and retried on the next tick; the
//! cadence itself bounds the retry rate, so there is no backoff
//! escalation.

use std::sync::Arc;
use std::time::Duration;

use tether_core::Result;

use crate::client::BrokerTransport;
use crate::local::{LocalRecords, ProviderInstruction};

/// Polls the broker for provider instructions addressed to this cluster.
pub struct InstructionPoller {
    transport: Arc<dyn BrokerTransport>,
    records: Arc<LocalRecords>,
}

impl InstructionPoller {
    /// Creates a poller.
    #[must_use]
    pub fn new(transport: Arc<dyn BrokerTransport>, records: Arc<LocalRecords>) -> Self {
        Self { transport, records }
    }

    /// Runs the poll loop until `shutdown` resolves.
    pub async fn run(self, interval: Duration, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        tracing::info!(interval = ?interval, "starting instruction poller");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::debug!(error = %e, "instruction poll failed; next tick retries");
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("instruction poller stopped");
                    return;
                }
            }
        }
    }

    /// Fetches pending instructions and materialises new ones.
    ///
    /// # Errors
    ///
    /// Propagates transport failures; individual bad instructions are
    /// logged and skipped.
    pub async fn poll_once(&self) -> Result<usize> {
        let instructions = self.transport.fetch_instructions().await?;
        let mut created = 0;

        for dto in &instructions {
            if !dto.is_reserved() {
                continue;
            }
            match ProviderInstruction::from_reservation(dto) {
                Ok(instruction) => {
                    if self.records.insert_provider_instruction(instruction) {
                        created += 1;
                        tracing::info!(
                            reservation = %dto.id,
                            requester = %dto.requester_id,
                            "materialised provider instruction from poll"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(reservation = %dto.id, error = %e, "bad polled instruction");
                }
            }
        }

        Ok(created)
    }
}
