//! Reservation lifecycle observer.
//!
//! A periodic pass over the reservation and advertisement records that:
//!
//! 1. releases reservations whose duration has lapsed (lock returned,
//!    phase `Released`);
//! 2. fails `Pending` records older than a grace window — the dispatcher
//!    was interrupted between create and lock confirmation;
//! 3. reconciles each advertisement's reserved component against the sum
//!    of live reservations targeting it, treating the reservation records
//!    as the source of truth;
//! 4. marks advertisements inactive once their agent stops refreshing
//!    them.
//!
//! The observer is also where the out-of-band peering flow reports
//! readiness ([`LifecycleObserver::activate`]) and where operators release
//! capacity explicitly ([`LifecycleObserver::release`]). Records are only
//! ever deleted through [`LifecycleObserver::remove_terminal`], which
//! refuses while the release pin is set.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};

use tether_core::{
    Error, Reservation, ReservationPhase, ResourceQuantities, Result,
    store::{AdvertisementStore, ReservationStore},
};

use crate::locking::ReservationLock;
use crate::metrics;

/// Outcome counts of one observer pass, for logs and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Reservations released on expiry.
    pub expired: usize,
    /// Stuck `Pending` records marked failed.
    pub failed_pending: usize,
    /// Advertisements whose reserved component was rewritten.
    pub reconciled: usize,
    /// Advertisements flagged inactive for staleness.
    pub stale_marked: usize,
}

/// Advances reservation phases and repairs accounting drift.
pub struct LifecycleObserver {
    advertisements: AdvertisementStore,
    reservations: ReservationStore,
    lock: ReservationLock,
    stale_after: chrono::Duration,
    pending_grace: chrono::Duration,
}

impl LifecycleObserver {
    /// Creates an observer.
    ///
    /// `stale_after` bounds how long an unrefreshed advertisement stays a
    /// placement candidate; `pending_grace` is how long a `Pending`
    /// record may sit before it is considered interrupted.
    #[must_use]
    pub fn new(
        advertisements: AdvertisementStore,
        reservations: ReservationStore,
        lock: ReservationLock,
        stale_after: Duration,
        pending_grace: Duration,
    ) -> Self {
        Self {
            advertisements,
            reservations,
            lock,
            stale_after: chrono::Duration::from_std(stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            pending_grace: chrono::Duration::from_std(pending_grace)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        }
    }

    /// Runs passes on `interval` until `shutdown` resolves.
    pub async fn run(self, interval: Duration, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.pass().await {
                        Ok(report) => {
                            if report != PassReport::default() {
                                tracing::info!(
                                    expired = report.expired,
                                    failed_pending = report.failed_pending,
                                    reconciled = report.reconciled,
                                    stale = report.stale_marked,
                                    "lifecycle pass applied changes"
                                );
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "lifecycle pass failed"),
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("lifecycle observer stopped");
                    return;
                }
            }
        }
    }

    /// Runs one observer pass at the current instant.
    ///
    /// # Errors
    ///
    /// Returns the first listing failure; per-record write conflicts are
    /// skipped and picked up by the next pass.
    pub async fn pass(&self) -> Result<PassReport> {
        self.pass_at(Utc::now()).await
    }

    /// Runs one observer pass as of `now`.
    ///
    /// # Errors
    ///
    /// See [`LifecycleObserver::pass`].
    pub async fn pass_at(&self, now: DateTime<Utc>) -> Result<PassReport> {
        let mut report = PassReport::default();

        self.expire_lapsed(now, &mut report).await?;
        let indeterminate = self.fail_stuck_pending(now, &mut report).await?;
        self.reconcile_reserved(&indeterminate, &mut report).await?;
        self.mark_stale(now, &mut report).await?;

        Ok(report)
    }

    /// Signals that the external peering for `id` is ready.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] when the reservation is not in phase
    /// `Reserved`, plus the usual store errors.
    pub async fn activate(&self, id: &str) -> Result<()> {
        let mut rsv = self.reservations.fetch(id).await?;
        if rsv.record.status.phase != ReservationPhase::Reserved {
            return Err(Error::conflict(format!(
                "reservation {id} is {}, not Reserved",
                rsv.record.status.phase
            )));
        }
        rsv.record.mark_active("peering established");
        self.reservations
            .update(id, &rsv.record, &rsv.version)
            .await?;
        Ok(())
    }

    /// Releases `id` explicitly: returns the provider's capacity and
    /// marks the record `Released`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] on a record that holds no capacity.
    pub async fn release(&self, id: &str) -> Result<()> {
        let mut rsv = self.reservations.fetch(id).await?;
        if !rsv.record.status.phase.holds_capacity() {
            return Err(Error::conflict(format!(
                "reservation {id} is {}, nothing to release",
                rsv.record.status.phase
            )));
        }
        self.release_capacity(&rsv.record).await?;
        rsv.record.mark_released("released by operator");
        self.reservations
            .update(id, &rsv.record, &rsv.version)
            .await?;
        Ok(())
    }

    /// Deletes a terminal reservation record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] while the record is non-terminal or
    /// still pinned (capacity possibly locked).
    pub async fn remove_terminal(&self, id: &str) -> Result<()> {
        let rsv = self.reservations.fetch(id).await?;
        if !rsv.record.status.phase.is_terminal() || rsv.record.pinned {
            return Err(Error::conflict(format!(
                "reservation {id} still pins provider capacity"
            )));
        }
        self.reservations.delete(id).await
    }

    async fn expire_lapsed(&self, now: DateTime<Utc>, report: &mut PassReport) -> Result<()> {
        for mut rsv in self.reservations.list().await? {
            if !(rsv.record.status.phase.holds_capacity() && rsv.record.is_expired(now)) {
                continue;
            }
            if let Err(e) = self.release_capacity(&rsv.record).await {
                tracing::warn!(
                    reservation = %rsv.record.id,
                    error = %e,
                    "could not return expired capacity; will retry next pass"
                );
                continue;
            }
            rsv.record.mark_released("reservation duration expired");
            let id = rsv.record.id.to_string();
            match self.reservations.update(&id, &rsv.record, &rsv.version).await {
                Ok(_) => {
                    metrics::reservation_expired();
                    report.expired += 1;
                    tracing::info!(reservation = %id, "released expired reservation");
                }
                Err(Error::Conflict { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Marks over-aged `Pending` records failed and returns the provider
    /// clusters named by records still inside the grace window; their
    /// accounting is indeterminate until the dispatcher finishes, so the
    /// reconcile step leaves them alone this pass.
    async fn fail_stuck_pending(
        &self,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<HashSet<String>> {
        let mut indeterminate = HashSet::new();
        for mut rsv in self.reservations.list().await? {
            if rsv.record.status.phase != ReservationPhase::Pending {
                continue;
            }
            if now - rsv.record.created_at <= self.pending_grace {
                indeterminate.insert(rsv.record.target_cluster_id.clone());
                continue;
            }
            rsv.record
                .mark_failed("dispatch interrupted before lock confirmation");
            let id = rsv.record.id.to_string();
            match self.reservations.update(&id, &rsv.record, &rsv.version).await {
                Ok(_) => {
                    report.failed_pending += 1;
                    tracing::warn!(reservation = %id, "failed stuck pending reservation");
                }
                Err(Error::Conflict { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(indeterminate)
    }

    async fn reconcile_reserved(
        &self,
        indeterminate: &HashSet<String>,
        report: &mut PassReport,
    ) -> Result<()> {
        let mut expected: HashMap<String, ResourceQuantities> = HashMap::new();
        for rsv in self.reservations.list().await? {
            if !rsv.record.status.phase.holds_capacity() {
                continue;
            }
            let entry = expected
                .entry(rsv.record.target_cluster_id.clone())
                .or_default();
            *entry = entry.checked_add(&rsv.record.requested)?;
        }

        for mut adv in self.advertisements.list().await? {
            let cluster_id = adv.record.cluster_id.clone();
            if indeterminate.contains(&cluster_id) {
                continue;
            }
            let wanted = expected.remove(&cluster_id).unwrap_or_default();
            let current = adv.record.resources.reserved.clone().unwrap_or_default();
            if current == wanted {
                continue;
            }

            tracing::warn!(
                cluster = %cluster_id,
                reserved_cpu = %current.cpu,
                expected_cpu = %wanted.cpu,
                "reconciling drifted reserved component"
            );
            adv.record.resources.reserved =
                if wanted.is_zero() && adv.record.resources.reserved.is_none() {
                    None
                } else {
                    Some(wanted)
                };
            adv.record.resources.recompute_available();

            let key = adv.record.key();
            match self
                .advertisements
                .update(&key, &adv.record, &adv.version)
                .await
            {
                Ok(_) => report.reconciled += 1,
                Err(Error::Conflict { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        // Reservations targeting clusters that no longer advertise: the
        // locked capacity vanished with the advertisement, so release the
        // record side.
        for (cluster_id, _) in expected {
            self.release_orphans(&cluster_id).await?;
        }

        Ok(())
    }

    async fn release_orphans(&self, cluster_id: &str) -> Result<()> {
        for mut rsv in self.reservations.list().await? {
            if rsv.record.target_cluster_id != cluster_id
                || !rsv.record.status.phase.holds_capacity()
            {
                continue;
            }
            rsv.record
                .mark_released("target advertisement no longer exists");
            let id = rsv.record.id.to_string();
            match self.reservations.update(&id, &rsv.record, &rsv.version).await {
                Ok(_) => {
                    tracing::warn!(reservation = %id, cluster = %cluster_id, "released orphaned reservation");
                }
                Err(Error::Conflict { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn mark_stale(&self, now: DateTime<Utc>, report: &mut PassReport) -> Result<()> {
        for mut adv in self.advertisements.list().await? {
            if !adv.record.active || now - adv.record.timestamp <= self.stale_after {
                continue;
            }
            adv.record.active = false;
            let key = adv.record.key();
            match self
                .advertisements
                .update(&key, &adv.record, &adv.version)
                .await
            {
                Ok(_) => {
                    report.stale_marked += 1;
                    tracing::info!(cluster = %adv.record.cluster_id, "marked stale advertisement inactive");
                }
                Err(Error::Conflict { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn release_capacity(&self, reservation: &Reservation) -> Result<()> {
        match self
            .lock
            .release(&reservation.target_cluster_id, &reservation.requested)
            .await
        {
            Ok(_) => Ok(()),
            // The provider's advertisement is gone; nothing left to return.
            Err(Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tether_core::{
        ClusterAdvertisement, MemoryStore, Quantity, ReservationId, ResourceMetrics, store,
    };

    fn q(s: &str) -> Quantity {
        s.parse().expect(s)
    }

    fn rq(cpu: &str, memory: &str) -> ResourceQuantities {
        ResourceQuantities::new(q(cpu), q(memory))
    }

    struct Fixture {
        advertisements: AdvertisementStore,
        reservations: ReservationStore,
        observer: LifecycleObserver,
    }

    fn fixture() -> Fixture {
        let backend: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let advertisements = store::advertisements(Arc::clone(&backend) as _, "test");
        let reservations = store::reservations(backend as _, "test");
        let observer = LifecycleObserver::new(
            advertisements.clone(),
            reservations.clone(),
            ReservationLock::new(advertisements.clone(), 5),
            Duration::from_secs(300),
            Duration::from_secs(60),
        );
        Fixture {
            advertisements,
            reservations,
            observer,
        }
    }

    async fn seed_advertisement(fixture: &Fixture, cluster_id: &str) {
        let mut resources = ResourceMetrics {
            capacity: rq("8", "16Gi"),
            allocatable: rq("4", "8Gi"),
            allocated: rq("1", "2Gi"),
            available: ResourceQuantities::zero(),
            reserved: None,
        };
        resources.recompute_available();
        let adv = ClusterAdvertisement {
            cluster_id: cluster_id.to_string(),
            cluster_name: cluster_id.to_string(),
            timestamp: Utc::now(),
            resources,
            active: true,
        };
        fixture.advertisements.create(&adv.key(), &adv).await.unwrap();
    }

    async fn seed_reserved(fixture: &Fixture, target: &str, cpu: &str, memory: &str) -> String {
        let mut rsv = Reservation::new(
            ReservationId::generate("c0"),
            "c0",
            target,
            rq(cpu, memory),
            0,
            None,
        );
        rsv.mark_reserved("locked");
        let id = rsv.id.to_string();
        fixture.reservations.create(&id, &rsv).await.unwrap();

        let key = ClusterAdvertisement::store_key(target);
        if let Some(mut adv) = fixture.advertisements.try_fetch(&key).await.unwrap() {
            adv.record.resources.add_reservation(&rsv.requested).unwrap();
            fixture
                .advertisements
                .update(&key, &adv.record, &adv.version)
                .await
                .unwrap();
        }
        id
    }

    #[tokio::test]
    async fn expired_reservation_is_released_and_capacity_returned() {
        let f = fixture();
        seed_advertisement(&f, "c2").await;
        let id = seed_reserved(&f, "c2", "1", "2Gi").await;

        let mut rsv = f.reservations.fetch(&id).await.unwrap();
        rsv.record.status.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        f.reservations
            .update(&id, &rsv.record, &rsv.version)
            .await
            .unwrap();

        let report = f.observer.pass().await.unwrap();
        assert_eq!(report.expired, 1);

        let rsv = f.reservations.fetch(&id).await.unwrap();
        assert_eq!(rsv.record.status.phase, ReservationPhase::Released);
        assert!(!rsv.record.pinned);

        let adv = f.advertisements.fetch("c2-adv").await.unwrap();
        assert_eq!(
            adv.record.resources.reserved,
            Some(ResourceQuantities::zero())
        );
        assert_eq!(adv.record.resources.available, rq("3", "6Gi"));
    }

    #[tokio::test]
    async fn orphaned_reserve_is_reconciled_away() {
        let f = fixture();
        seed_advertisement(&f, "c2").await;

        // Reserve on the advertisement with no backing reservation record.
        let mut adv = f.advertisements.fetch("c2-adv").await.unwrap();
        adv.record.resources.add_reservation(&rq("1", "2Gi")).unwrap();
        f.advertisements
            .update("c2-adv", &adv.record, &adv.version)
            .await
            .unwrap();

        let report = f.observer.pass().await.unwrap();
        assert_eq!(report.reconciled, 1);

        let adv = f.advertisements.fetch("c2-adv").await.unwrap();
        assert_eq!(
            adv.record.resources.reserved,
            Some(ResourceQuantities::zero())
        );
        assert_eq!(adv.record.resources.available, rq("3", "6Gi"));
    }

    #[tokio::test]
    async fn missing_reserve_is_restored_from_records() {
        let f = fixture();
        seed_advertisement(&f, "c2").await;
        seed_reserved(&f, "c2", "500m", "1Gi").await;

        // Simulate a lost lock: wipe the advertisement's reserve.
        let mut adv = f.advertisements.fetch("c2-adv").await.unwrap();
        adv.record.resources.reserved = None;
        adv.record.resources.recompute_available();
        f.advertisements
            .update("c2-adv", &adv.record, &adv.version)
            .await
            .unwrap();

        let report = f.observer.pass().await.unwrap();
        assert_eq!(report.reconciled, 1);

        let adv = f.advertisements.fetch("c2-adv").await.unwrap();
        assert_eq!(adv.record.resources.reserved, Some(rq("500m", "1Gi")));
        assert_eq!(adv.record.resources.available, rq("2500m", "5Gi"));
    }

    #[tokio::test]
    async fn stuck_pending_fails_after_grace() {
        let f = fixture();
        seed_advertisement(&f, "c2").await;

        let mut rsv = Reservation::new(
            ReservationId::generate("c0"),
            "c0",
            "c2",
            rq("500m", "1Gi"),
            0,
            None,
        );
        rsv.created_at = Utc::now() - chrono::Duration::minutes(10);
        let id = rsv.id.to_string();
        f.reservations.create(&id, &rsv).await.unwrap();

        let report = f.observer.pass().await.unwrap();
        assert_eq!(report.failed_pending, 1);
        let rsv = f.reservations.fetch(&id).await.unwrap();
        assert_eq!(rsv.record.status.phase, ReservationPhase::Failed);
    }

    #[tokio::test]
    async fn young_pending_defers_reconciliation() {
        let f = fixture();
        seed_advertisement(&f, "c2").await;

        let rsv = Reservation::new(
            ReservationId::generate("c0"),
            "c0",
            "c2",
            rq("500m", "1Gi"),
            0,
            None,
        );
        f.reservations.create(&rsv.id.to_string(), &rsv).await.unwrap();

        // The dispatcher may or may not have locked yet; leave c2 alone.
        let report = f.observer.pass().await.unwrap();
        assert_eq!(report.failed_pending, 0);
        assert_eq!(report.reconciled, 0);
    }

    #[tokio::test]
    async fn unrefreshed_advertisement_goes_inactive() {
        let f = fixture();
        seed_advertisement(&f, "c2").await;

        let mut adv = f.advertisements.fetch("c2-adv").await.unwrap();
        adv.record.timestamp = Utc::now() - chrono::Duration::minutes(30);
        f.advertisements
            .update("c2-adv", &adv.record, &adv.version)
            .await
            .unwrap();

        let report = f.observer.pass().await.unwrap();
        assert_eq!(report.stale_marked, 1);
        assert!(!f.advertisements.fetch("c2-adv").await.unwrap().record.active);
    }

    #[tokio::test]
    async fn activate_requires_reserved_phase() {
        let f = fixture();
        seed_advertisement(&f, "c2").await;
        let id = seed_reserved(&f, "c2", "500m", "1Gi").await;

        f.observer.activate(&id).await.unwrap();
        let rsv = f.reservations.fetch(&id).await.unwrap();
        assert_eq!(rsv.record.status.phase, ReservationPhase::Active);

        let err = f.observer.activate(&id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn release_returns_capacity_and_unpins() {
        let f = fixture();
        seed_advertisement(&f, "c2").await;
        let id = seed_reserved(&f, "c2", "1", "2Gi").await;

        f.observer.release(&id).await.unwrap();

        let rsv = f.reservations.fetch(&id).await.unwrap();
        assert_eq!(rsv.record.status.phase, ReservationPhase::Released);
        let adv = f.advertisements.fetch("c2-adv").await.unwrap();
        assert_eq!(adv.record.resources.available, rq("3", "6Gi"));
    }

    #[tokio::test]
    async fn remove_terminal_refuses_pinned_records() {
        let f = fixture();
        seed_advertisement(&f, "c2").await;
        let id = seed_reserved(&f, "c2", "500m", "1Gi").await;

        let err = f.observer.remove_terminal(&id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        f.observer.release(&id).await.unwrap();
        f.observer.remove_terminal(&id).await.unwrap();
        assert!(f.reservations.try_fetch(&id).await.unwrap().is_none());
    }
}
