//! Reserved-field locking on provider advertisements.
//!
//! Locking a provider is a bounded compare-and-swap loop: read the
//! advertisement, re-verify the fit, apply the reservation to the
//! broker-owned reserved component, and write back under the version the
//! read returned. A conflicting writer (another reservation, or the
//! agent's own publish) costs one retry; losing the fit on a refetch
//! aborts with [`Error::InsufficientResources`]; exhausting the retry
//! budget aborts with [`Error::LockContended`]. The bounded budget also
//! caps the latency of the synchronous reservation handler.

use std::time::Duration;

use tether_core::{
    ClusterAdvertisement, Error, ResourceQuantities, Result, Versioned,
    store::AdvertisementStore,
};

use crate::metrics;

/// Base backoff between CAS attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Maximum backoff between CAS attempts.
const BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Applies and releases reservation locks on provider advertisements.
#[derive(Debug, Clone)]
pub struct ReservationLock {
    advertisements: AdvertisementStore,
    max_attempts: u32,
}

impl ReservationLock {
    /// Creates a lock helper with the given retry budget.
    #[must_use]
    pub fn new(advertisements: AdvertisementStore, max_attempts: u32) -> Self {
        Self {
            advertisements,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Adds `requested` to `cluster_id`'s reserved component.
    ///
    /// Allocatable, allocated and capacity are untouched; available is
    /// recomputed. Returns the updated advertisement snapshot.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] — the target advertisement vanished.
    /// - [`Error::InsufficientResources`] — the fit no longer holds.
    /// - [`Error::LockContended`] — the retry budget ran out.
    pub async fn acquire(
        &self,
        cluster_id: &str,
        requested: &ResourceQuantities,
    ) -> Result<Versioned<ClusterAdvertisement>> {
        self.mutate(cluster_id, |resources| {
            if !resources.can_reserve(requested) {
                return Err(Error::InsufficientResources {
                    cluster_id: cluster_id.to_string(),
                });
            }
            resources
                .add_reservation(requested)
                .map_err(|_| Error::InsufficientResources {
                    cluster_id: cluster_id.to_string(),
                })
        })
        .await
    }

    /// Removes `requested` from `cluster_id`'s reserved component.
    ///
    /// Releasing more than is reserved is an error; releasing against an
    /// advertisement with no reserved component at all is treated as
    /// already-released (the agent may have been re-registered from
    /// scratch).
    ///
    /// # Errors
    ///
    /// Same disposition as [`ReservationLock::acquire`], minus the fit
    /// check.
    pub async fn release(
        &self,
        cluster_id: &str,
        requested: &ResourceQuantities,
    ) -> Result<Versioned<ClusterAdvertisement>> {
        self.mutate(cluster_id, |resources| {
            if resources.reserved.is_none() {
                tracing::warn!(
                    cluster = %cluster_id,
                    "release against advertisement with no reserved component"
                );
                resources.recompute_available();
                return Ok(());
            }
            resources.remove_reservation(requested)
        })
        .await
    }

    async fn mutate<F>(
        &self,
        cluster_id: &str,
        mut apply: F,
    ) -> Result<Versioned<ClusterAdvertisement>>
    where
        F: FnMut(&mut tether_core::ResourceMetrics) -> Result<()>,
    {
        let key = ClusterAdvertisement::store_key(cluster_id);
        let mut backoff = BACKOFF_BASE;

        for attempt in 1..=self.max_attempts {
            let mut current = self.advertisements.fetch(&key).await?;
            apply(&mut current.record.resources)?;

            match self
                .advertisements
                .update(&key, &current.record, &current.version)
                .await
            {
                Ok(version) => {
                    return Ok(Versioned {
                        record: current.record,
                        version,
                    });
                }
                Err(Error::Conflict { message }) => {
                    metrics::lock_conflict();
                    tracing::debug!(
                        cluster = %cluster_id,
                        attempt,
                        %message,
                        "reservation lock conflict, retrying"
                    );
                    if attempt == self.max_attempts {
                        break;
                    }
                    tokio::time::sleep(backoff.min(BACKOFF_MAX) + jitter()).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::LockContended {
            cluster_id: cluster_id.to_string(),
            attempts: self.max_attempts,
        })
    }
}

fn jitter() -> Duration {
    // Simple nanosecond-seeded jitter; not worth a rand dependency.
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    Duration::from_millis(u64::from(nanos % 25))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tether_core::{MemoryStore, Quantity, ResourceMetrics, store};

    fn q(s: &str) -> Quantity {
        s.parse().expect(s)
    }

    fn rq(cpu: &str, memory: &str) -> ResourceQuantities {
        ResourceQuantities::new(q(cpu), q(memory))
    }

    fn advertisement(cluster_id: &str) -> ClusterAdvertisement {
        let mut resources = ResourceMetrics {
            capacity: rq("8", "16Gi"),
            allocatable: rq("4", "8Gi"),
            allocated: rq("1", "2Gi"),
            available: ResourceQuantities::zero(),
            reserved: None,
        };
        resources.recompute_available();
        ClusterAdvertisement {
            cluster_id: cluster_id.to_string(),
            cluster_name: cluster_id.to_string(),
            timestamp: chrono::Utc::now(),
            resources,
            active: true,
        }
    }

    async fn seeded_store() -> AdvertisementStore {
        let store = store::advertisements(Arc::new(MemoryStore::new()), "test");
        let adv = advertisement("c2");
        store.create(&adv.key(), &adv).await.unwrap();
        store
    }

    #[tokio::test]
    async fn acquire_moves_requested_into_reserved() {
        let store = seeded_store().await;
        let lock = ReservationLock::new(store.clone(), 5);

        let updated = lock.acquire("c2", &rq("500m", "1Gi")).await.unwrap();
        assert_eq!(updated.record.resources.reserved, Some(rq("500m", "1Gi")));
        assert_eq!(updated.record.resources.available, rq("2500m", "5Gi"));
        // Agent-owned fields untouched.
        assert_eq!(updated.record.resources.allocatable, rq("4", "8Gi"));
        assert_eq!(updated.record.resources.allocated, rq("1", "2Gi"));

        let persisted = store.fetch("c2-adv").await.unwrap();
        assert_eq!(persisted.record, updated.record);
    }

    #[tokio::test]
    async fn acquire_rejects_lost_fit() {
        let store = seeded_store().await;
        let lock = ReservationLock::new(store.clone(), 5);

        lock.acquire("c2", &rq("3", "6Gi")).await.unwrap();
        let err = lock.acquire("c2", &rq("500m", "1Gi")).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientResources { .. }));
    }

    #[tokio::test]
    async fn acquire_on_missing_cluster_is_not_found() {
        let store = store::advertisements(Arc::new(MemoryStore::new()), "test");
        let lock = ReservationLock::new(store, 5);

        let err = lock.acquire("ghost", &rq("500m", "1Gi")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn release_returns_capacity() {
        let store = seeded_store().await;
        let lock = ReservationLock::new(store, 5);

        lock.acquire("c2", &rq("1", "2Gi")).await.unwrap();
        let updated = lock.release("c2", &rq("1", "2Gi")).await.unwrap();
        assert_eq!(
            updated.record.resources.reserved,
            Some(ResourceQuantities::zero())
        );
        assert_eq!(updated.record.resources.available, rq("3", "6Gi"));
    }

    #[tokio::test]
    async fn release_without_reserved_component_is_benign() {
        let store = seeded_store().await;
        let lock = ReservationLock::new(store, 5);
        let updated = lock.release("c2", &rq("1", "2Gi")).await.unwrap();
        assert!(updated.record.resources.reserved.is_none());
    }

    #[tokio::test]
    async fn conflicting_writer_costs_a_retry_then_succeeds() {
        let backend = Arc::new(tether_test_utils::RecordingStore::new());
        backend.fail_next_cas(2);
        let store = store::advertisements(backend, "test");
        let adv = advertisement("c2");
        store.create(&adv.key(), &adv).await.unwrap();

        let lock = ReservationLock::new(store, 5);
        let updated = lock.acquire("c2", &rq("500m", "1Gi")).await.unwrap();
        assert_eq!(updated.record.resources.reserved, Some(rq("500m", "1Gi")));
    }

    #[tokio::test]
    async fn exhausted_retries_report_contention() {
        let backend = Arc::new(tether_test_utils::RecordingStore::new());
        backend.fail_next_cas(10);
        let store = store::advertisements(backend, "test");
        let adv = advertisement("c2");
        store.create(&adv.key(), &adv).await.unwrap();

        let lock = ReservationLock::new(store, 3);
        let err = lock.acquire("c2", &rq("500m", "1Gi")).await.unwrap_err();
        assert!(matches!(err, Error::LockContended { attempts: 3, .. }));
    }
}
