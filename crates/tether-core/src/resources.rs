//! Per-cluster resource bookkeeping.
//!
//! [`ResourceQuantities`] groups the four component quantities a cluster
//! deals in (CPU and memory always, GPU and storage when the cluster has
//! them). [`ResourceMetrics`] is the per-cluster snapshot the broker stores:
//! capacity, allocatable, allocated, the derived available, and the
//! broker-owned reserved component.
//!
//! The availability identity holds for every component present in
//! allocatable:
//!
//! ```text
//! available = allocatable − allocated − reserved (or 0)
//! ```
//!
//! For fit checks, a component missing on one side is treated as zero:
//! requesting GPU from a cluster that advertises none fails the fit, while
//! a GPU-less request fits a GPU-bearing cluster.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{Error, Result};
use crate::quantity::Quantity;

/// The component quantities of a request or a cluster axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuantities {
    /// CPU, in cores (milli-precision).
    #[schema(value_type = String, example = "500m")]
    pub cpu: Quantity,
    /// Memory, in bytes.
    #[schema(value_type = String, example = "1Gi")]
    pub memory: Quantity,
    /// GPU count, if the cluster has any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub gpu: Option<Quantity>,
    /// Ephemeral storage, in bytes, if advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub storage: Option<Quantity>,
}

impl ResourceQuantities {
    /// Creates a CPU + memory pair with no optional components.
    #[must_use]
    pub fn new(cpu: Quantity, memory: Quantity) -> Self {
        Self {
            cpu,
            memory,
            gpu: None,
            storage: None,
        }
    }

    /// Returns the all-zero quantities.
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Returns true when every present component is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.cpu.is_zero()
            && self.memory.is_zero()
            && self.gpu.as_ref().is_none_or(Quantity::is_zero)
            && self.storage.as_ref().is_none_or(Quantity::is_zero)
    }

    /// Returns true when every component of `self` fits within `available`.
    ///
    /// A component absent on the available side counts as zero, so any
    /// positive request for it fails the fit.
    #[must_use]
    pub fn fits_within(&self, available: &Self) -> bool {
        fn component_fits(requested: Option<&Quantity>, available: Option<&Quantity>) -> bool {
            match requested {
                None => true,
                Some(r) if r.is_zero() => true,
                Some(r) => available.is_some_and(|a| r <= a),
            }
        }

        self.cpu <= available.cpu
            && self.memory <= available.memory
            && component_fits(self.gpu.as_ref(), available.gpu.as_ref())
            && component_fits(self.storage.as_ref(), available.storage.as_ref())
    }

    /// Adds `other` componentwise. Adding a component that is missing on
    /// one side keeps the present side's value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuantity`] on overflow.
    pub fn checked_add(&self, other: &Self) -> Result<Self> {
        Ok(Self {
            cpu: self.cpu.checked_add(&other.cpu)?,
            memory: self.memory.checked_add(&other.memory)?,
            gpu: add_optional(self.gpu.as_ref(), other.gpu.as_ref())?,
            storage: add_optional(self.storage.as_ref(), other.storage.as_ref())?,
        })
    }

    /// Subtracts `other` componentwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuantity`] if any component would go
    /// negative, including subtracting a positive optional component from
    /// a side that lacks it.
    pub fn checked_sub(&self, other: &Self) -> Result<Self> {
        Ok(Self {
            cpu: self.cpu.checked_sub(&other.cpu)?,
            memory: self.memory.checked_sub(&other.memory)?,
            gpu: sub_optional(self.gpu.as_ref(), other.gpu.as_ref())?,
            storage: sub_optional(self.storage.as_ref(), other.storage.as_ref())?,
        })
    }

    /// Subtracts `other` componentwise, clamping each component at zero.
    /// Components absent on `self` stay absent.
    #[must_use]
    pub fn saturating_sub(&self, other: &Self) -> Self {
        let clamp = |a: Option<&Quantity>, b: Option<&Quantity>| {
            a.map(|a| b.map_or(*a, |b| a.saturating_sub(b)))
        };
        Self {
            cpu: self.cpu.saturating_sub(&other.cpu),
            memory: self.memory.saturating_sub(&other.memory),
            gpu: clamp(self.gpu.as_ref(), other.gpu.as_ref()),
            storage: clamp(self.storage.as_ref(), other.storage.as_ref()),
        }
    }
}

fn add_optional(a: Option<&Quantity>, b: Option<&Quantity>) -> Result<Option<Quantity>> {
    match (a, b) {
        (Some(a), Some(b)) => Ok(Some(a.checked_add(b)?)),
        (Some(v), None) | (None, Some(v)) => Ok(Some(*v)),
        (None, None) => Ok(None),
    }
}

fn sub_optional(a: Option<&Quantity>, b: Option<&Quantity>) -> Result<Option<Quantity>> {
    match (a, b) {
        (Some(a), Some(b)) => Ok(Some(a.checked_sub(b)?)),
        (Some(v), None) => Ok(Some(*v)),
        (None, Some(b)) if b.is_zero() => Ok(None),
        (None, Some(b)) => Err(Error::InvalidQuantity(format!(
            "cannot subtract {b} from a missing component"
        ))),
        (None, None) => Ok(None),
    }
}

/// A cluster's resource snapshot as stored on its advertisement.
///
/// Capacity, allocatable, allocated and the timestamp are owned by the
/// agent and replaced wholesale on each publish. `reserved` is owned by the
/// broker's decision path and survives publishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetrics {
    /// Total physical capacity.
    pub capacity: ResourceQuantities,
    /// Capacity minus system overhead; the schedulable ceiling.
    pub allocatable: ResourceQuantities,
    /// Currently consumed by local workloads.
    pub allocated: ResourceQuantities,
    /// Derived headroom: `allocatable − allocated − reserved`.
    pub available: ResourceQuantities,
    /// Capacity promised to remote requesters but not yet consumed.
    /// Broker-owned; `None` until the first reservation lands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved: Option<ResourceQuantities>,
}

impl ResourceMetrics {
    /// Recomputes `available` from the identity
    /// `allocatable − allocated − reserved(or 0)`, clamped at zero.
    pub fn recompute_available(&mut self) {
        let mut available = self.allocatable.saturating_sub(&self.allocated);
        if let Some(reserved) = &self.reserved {
            available = available.saturating_sub(reserved);
        }
        self.available = available;
    }

    /// Returns true when `requested` fits within the current headroom.
    #[must_use]
    pub fn can_reserve(&self, requested: &ResourceQuantities) -> bool {
        requested.fits_within(&self.available)
    }

    /// Adds `requested` to the reserved component and recomputes
    /// availability.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuantity`] if the resulting reservation
    /// would exceed `allocatable − allocated` on any component.
    pub fn add_reservation(&mut self, requested: &ResourceQuantities) -> Result<()> {
        let reserved = match &self.reserved {
            Some(current) => current.checked_add(requested)?,
            None => requested.clone(),
        };

        let ceiling = self.allocatable.saturating_sub(&self.allocated);
        if !reserved.fits_within(&ceiling) {
            return Err(Error::InvalidQuantity(format!(
                "reservation of {} CPU / {} memory exceeds unallocated capacity",
                requested.cpu, requested.memory
            )));
        }

        self.reserved = Some(reserved);
        self.recompute_available();
        Ok(())
    }

    /// Removes `requested` from the reserved component and recomputes
    /// availability.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuantity`] if nothing is reserved or the
    /// removal would drive any component negative.
    pub fn remove_reservation(&mut self, requested: &ResourceQuantities) -> Result<()> {
        let Some(current) = &self.reserved else {
            return Err(Error::InvalidQuantity(
                "no reserved resources to release".to_string(),
            ));
        };
        self.reserved = Some(current.checked_sub(requested)?);
        self.recompute_available();
        Ok(())
    }
}
