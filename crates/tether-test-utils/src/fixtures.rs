//! Pre-built fixtures for broker and agent tests.

use chrono::Utc;

use tether_core::{
    ClusterAdvertisement, Quantity, ResourceMetrics, ResourceQuantities,
};

/// Parses a quantity literal, panicking on bad test data.
#[must_use]
pub fn quantity(s: &str) -> Quantity {
    s.parse().expect(s)
}

/// Builds a CPU/memory pair from literals.
#[must_use]
pub fn quantities(cpu: &str, memory: &str) -> ResourceQuantities {
    ResourceQuantities::new(quantity(cpu), quantity(memory))
}

/// Builds a consistent snapshot from allocatable and allocated literals;
/// capacity mirrors allocatable and availability is derived.
#[must_use]
pub fn snapshot(allocatable: (&str, &str), allocated: (&str, &str)) -> ResourceMetrics {
    let mut metrics = ResourceMetrics {
        capacity: quantities(allocatable.0, allocatable.1),
        allocatable: quantities(allocatable.0, allocatable.1),
        allocated: quantities(allocated.0, allocated.1),
        available: ResourceQuantities::zero(),
        reserved: None,
    };
    metrics.recompute_available();
    metrics
}

/// Builds an active advertisement for `cluster_id` with the given
/// allocatable/allocated literals.
#[must_use]
pub fn advertisement(
    cluster_id: &str,
    allocatable: (&str, &str),
    allocated: (&str, &str),
) -> ClusterAdvertisement {
    ClusterAdvertisement {
        cluster_id: cluster_id.to_string(),
        cluster_name: format!("cluster {cluster_id}"),
        timestamp: Utc::now(),
        resources: snapshot(allocatable, allocated),
        active: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_derives_availability() {
        let metrics = snapshot(("4", "8Gi"), ("1", "2Gi"));
        assert_eq!(metrics.available, quantities("3", "6Gi"));
    }

    #[test]
    fn advertisement_is_active_by_default() {
        let adv = advertisement("c1", ("4", "8Gi"), ("1", "2Gi"));
        assert!(adv.active);
        assert_eq!(adv.key(), "c1-adv");
    }
}
