//! Cluster resource snapshot sources.
//!
//! Collecting node and pod metrics is outside the agent core; this is
//! the contract it consumes. A snapshot source yields the current
//! capacity/allocatable/allocated numbers, and the advertiser derives
//! availability before publishing.

use async_trait::async_trait;

use tether_core::{ResourceMetrics, ResourceQuantities, Result};

/// Yields the cluster's current resource numbers.
#[async_trait]
pub trait ClusterResourceSource: Send + Sync {
    /// Returns a fresh snapshot. Implementations report agent-owned
    /// fields only; the reserved component is broker business.
    async fn snapshot(&self) -> Result<ResourceMetrics>;
}

/// A source that always reports the same configured numbers.
///
/// Stands in for a real metrics collector in development and tests.
#[derive(Debug, Clone)]
pub struct FixedResourceSource {
    allocatable: ResourceQuantities,
    allocated: ResourceQuantities,
}

impl FixedResourceSource {
    /// Creates a source reporting the given allocatable/allocated split.
    #[must_use]
    pub fn new(allocatable: ResourceQuantities, allocated: ResourceQuantities) -> Self {
        Self {
            allocatable,
            allocated,
        }
    }
}

#[async_trait]
impl ClusterResourceSource for FixedResourceSource {
    async fn snapshot(&self) -> Result<ResourceMetrics> {
        let mut metrics = ResourceMetrics {
            capacity: self.allocatable.clone(),
            allocatable: self.allocatable.clone(),
            allocated: self.allocated.clone(),
            available: ResourceQuantities::zero(),
            reserved: None,
        };
        metrics.recompute_available();
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_source_derives_availability() {
        let source = FixedResourceSource::new(
            ResourceQuantities::new("4".parse().unwrap(), "8Gi".parse().unwrap()),
            ResourceQuantities::new("1".parse().unwrap(), "2Gi".parse().unwrap()),
        );
        let snapshot = source.snapshot().await.unwrap();
        assert_eq!(snapshot.available.cpu, "3".parse().unwrap());
        assert!(snapshot.reserved.is_none());
    }
}
