//! Provider selection over a snapshot of advertisements.
//!
//! The engine is pure with respect to its inputs: it lists the
//! advertisements once, filters, scores, and returns the best candidate
//! together with the version token it was read at. Races against
//! concurrent reservations are the locking step's problem, not the
//! engine's.

use tether_core::{
    ClusterAdvertisement, Error, ResourceQuantities, Result, Versioned,
    store::AdvertisementStore,
};

/// Relative weight of each axis in the headroom score.
const HEADROOM_WEIGHT: f64 = 0.5;

/// Scores closer than this are a tie, broken lexicographically.
const SCORE_EPSILON: f64 = 1e-9;

/// Chooses provider clusters for reservation requests.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    advertisements: AdvertisementStore,
}

impl DecisionEngine {
    /// Creates an engine reading from the given advertisement store.
    #[must_use]
    pub fn new(advertisements: AdvertisementStore) -> Self {
        Self { advertisements }
    }

    /// Selects the best provider for `requested`, never the requester
    /// itself.
    ///
    /// Candidates are discarded when inactive, when any requested
    /// component exceeds their available headroom, or when they report no
    /// allocatable CPU or memory. Survivors are ranked by post-reservation
    /// headroom; ties within 1e-9 go to the lexicographically smaller
    /// cluster id so placement is deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuitableCluster`] when no candidate survives the
    /// filter, and propagates store failures.
    pub async fn select_best_cluster(
        &self,
        requester_id: &str,
        requested: &ResourceQuantities,
        priority: i32,
    ) -> Result<Versioned<ClusterAdvertisement>> {
        let advertisements = self.advertisements.list().await?;
        let total = advertisements.len();

        let mut best: Option<(Versioned<ClusterAdvertisement>, f64)> = None;
        for candidate in advertisements {
            if !is_candidate(&candidate.record, requester_id, requested) {
                continue;
            }
            let score = headroom_score(&candidate.record, requested);
            tracing::debug!(
                cluster = %candidate.record.cluster_id,
                score,
                priority,
                "scored placement candidate"
            );

            best = match best {
                None => Some((candidate, score)),
                Some((current, current_score)) => {
                    if beats(score, &candidate.record, current_score, &current.record) {
                        Some((candidate, score))
                    } else {
                        Some((current, current_score))
                    }
                }
            };
        }

        match best {
            Some((winner, score)) => {
                tracing::info!(
                    requester = %requester_id,
                    target = %winner.record.cluster_id,
                    score,
                    "selected provider cluster"
                );
                Ok(winner)
            }
            None => Err(Error::NoSuitableCluster(format!(
                "none of {total} advertised clusters can fit {} CPU / {} memory for {requester_id}",
                requested.cpu, requested.memory
            ))),
        }
    }
}

fn is_candidate(
    adv: &ClusterAdvertisement,
    requester_id: &str,
    requested: &ResourceQuantities,
) -> bool {
    adv.cluster_id != requester_id
        && adv.active
        && adv.resources.allocatable.cpu.is_positive()
        && adv.resources.allocatable.memory.is_positive()
        && requested.fits_within(&adv.resources.available)
}

fn beats(
    score: f64,
    candidate: &ClusterAdvertisement,
    current_score: f64,
    current: &ClusterAdvertisement,
) -> bool {
    if (score - current_score).abs() < SCORE_EPSILON {
        candidate.cluster_id < current.cluster_id
    } else {
        score > current_score
    }
}

/// Post-reservation headroom score; higher is better.
///
/// For each axis, `utilisation_after = 1 − (available − requested) /
/// allocatable`; the axis contributes `1 − 0.5 × utilisation_after`. The
/// halved weight keeps headroom on one axis relevant even when the other
/// axis is nearly full.
fn headroom_score(adv: &ClusterAdvertisement, requested: &ResourceQuantities) -> f64 {
    let cpu = utilisation_after(
        &adv.resources.available.cpu,
        &requested.cpu,
        &adv.resources.allocatable.cpu,
    );
    let memory = utilisation_after(
        &adv.resources.available.memory,
        &requested.memory,
        &adv.resources.allocatable.memory,
    );
    (1.0 - HEADROOM_WEIGHT * cpu) + (1.0 - HEADROOM_WEIGHT * memory)
}

fn utilisation_after(
    available: &tether_core::Quantity,
    requested: &tether_core::Quantity,
    allocatable: &tether_core::Quantity,
) -> f64 {
    let remaining = available.as_units_f64() - requested.as_units_f64();
    1.0 - remaining / allocatable.as_units_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tether_core::{MemoryStore, Quantity, ResourceMetrics, store};

    fn q(s: &str) -> Quantity {
        s.parse().expect(s)
    }

    fn advertisement(
        cluster_id: &str,
        allocatable: (&str, &str),
        available: (&str, &str),
        active: bool,
    ) -> ClusterAdvertisement {
        let allocatable = ResourceQuantities::new(q(allocatable.0), q(allocatable.1));
        let available = ResourceQuantities::new(q(available.0), q(available.1));
        ClusterAdvertisement {
            cluster_id: cluster_id.to_string(),
            cluster_name: format!("cluster {cluster_id}"),
            timestamp: chrono::Utc::now(),
            resources: ResourceMetrics {
                capacity: allocatable.clone(),
                allocatable,
                allocated: ResourceQuantities::zero(),
                available,
                reserved: None,
            },
            active,
        }
    }

    async fn engine_with(advs: Vec<ClusterAdvertisement>) -> DecisionEngine {
        let store = store::advertisements(Arc::new(MemoryStore::new()), "test");
        for adv in advs {
            store.create(&adv.key(), &adv).await.unwrap();
        }
        DecisionEngine::new(store)
    }

    fn request(cpu: &str, memory: &str) -> ResourceQuantities {
        ResourceQuantities::new(q(cpu), q(memory))
    }

    #[tokio::test]
    async fn picks_cluster_with_more_headroom() {
        let engine = engine_with(vec![
            advertisement("c1", ("2", "4Gi"), ("1", "2Gi"), true),
            advertisement("c2", ("8", "16Gi"), ("4", "8Gi"), true),
        ])
        .await;

        let winner = engine
            .select_best_cluster("c0", &request("500m", "1Gi"), 0)
            .await
            .unwrap();
        assert_eq!(winner.record.cluster_id, "c2");
    }

    #[tokio::test]
    async fn equal_availability_prefers_higher_ratio() {
        // Same available, smaller allocatable: c1 retains a larger share
        // of itself after placement and must win.
        let engine = engine_with(vec![
            advertisement("c1", ("4", "8Gi"), ("2", "4Gi"), true),
            advertisement("c2", ("8", "16Gi"), ("2", "4Gi"), true),
        ])
        .await;

        let winner = engine
            .select_best_cluster("c0", &request("500m", "1Gi"), 0)
            .await
            .unwrap();
        assert_eq!(winner.record.cluster_id, "c1");
    }

    #[tokio::test]
    async fn never_picks_the_requester() {
        let engine = engine_with(vec![
            advertisement("c1", ("8", "16Gi"), ("6", "12Gi"), true),
            advertisement("c2", ("4", "8Gi"), ("2", "4Gi"), true),
        ])
        .await;

        let winner = engine
            .select_best_cluster("c1", &request("500m", "1Gi"), 0)
            .await
            .unwrap();
        assert_eq!(winner.record.cluster_id, "c2");
    }

    #[tokio::test]
    async fn skips_inactive_clusters() {
        let engine = engine_with(vec![
            advertisement("c1", ("8", "16Gi"), ("6", "12Gi"), false),
            advertisement("c2", ("4", "8Gi"), ("2", "4Gi"), true),
        ])
        .await;

        let winner = engine
            .select_best_cluster("c0", &request("500m", "1Gi"), 0)
            .await
            .unwrap();
        assert_eq!(winner.record.cluster_id, "c2");
    }

    #[tokio::test]
    async fn exact_fit_is_accepted() {
        let engine = engine_with(vec![advertisement("c1", ("4", "8Gi"), ("2", "4Gi"), true)])
            .await;

        let winner = engine
            .select_best_cluster("c0", &request("2", "4Gi"), 0)
            .await
            .unwrap();
        assert_eq!(winner.record.cluster_id, "c1");
    }

    #[tokio::test]
    async fn oversized_request_finds_no_cluster() {
        let engine = engine_with(vec![
            advertisement("c1", ("2", "4Gi"), ("1", "2Gi"), true),
            advertisement("c2", ("4", "8Gi"), ("2", "4Gi"), true),
        ])
        .await;

        let err = engine
            .select_best_cluster("c0", &request("10", "1Gi"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuitableCluster(_)));
    }

    #[tokio::test]
    async fn empty_federation_finds_no_cluster() {
        let engine = engine_with(vec![]).await;
        let err = engine
            .select_best_cluster("c0", &request("500m", "1Gi"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuitableCluster(_)));
    }

    #[tokio::test]
    async fn zero_allocatable_disqualifies() {
        let engine = engine_with(vec![
            advertisement("c1", ("0", "0"), ("0", "0"), true),
            advertisement("c2", ("4", "8Gi"), ("2", "4Gi"), true),
        ])
        .await;

        let winner = engine
            .select_best_cluster("c0", &request("500m", "1Gi"), 0)
            .await
            .unwrap();
        assert_eq!(winner.record.cluster_id, "c2");
    }

    #[tokio::test]
    async fn identical_clusters_tie_break_lexicographically() {
        let engine = engine_with(vec![
            advertisement("c9", ("4", "8Gi"), ("2", "4Gi"), true),
            advertisement("c2", ("4", "8Gi"), ("2", "4Gi"), true),
            advertisement("c5", ("4", "8Gi"), ("2", "4Gi"), true),
        ])
        .await;

        let winner = engine
            .select_best_cluster("c0", &request("500m", "1Gi"), 0)
            .await
            .unwrap();
        assert_eq!(winner.record.cluster_id, "c2");
    }

    #[test]
    fn more_headroom_scores_higher() {
        let half = advertisement("a", ("4", "8Gi"), ("2", "4Gi"), true);
        let three_quarters = advertisement("b", ("4", "8Gi"), ("3", "6Gi"), true);
        let req = request("500m", "1Gi");
        assert!(headroom_score(&three_quarters, &req) > headroom_score(&half, &req));
    }
}
