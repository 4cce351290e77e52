//! # tether-core
//!
//! Core abstractions for the Tether federated resource broker.
//!
//! This crate provides the foundational types shared by the broker and the
//! cluster agent:
//!
//! - **Quantities**: fixed-point resource arithmetic with unit-suffixed parsing
//! - **Resource metrics**: the per-cluster availability identity
//! - **Records**: cluster advertisements and reservations with their phase machine
//! - **State store**: compare-and-swap storage traits and typed record stores
//! - **DTOs**: the wire contracts between agents and the broker
//! - **Errors**: the shared error taxonomy
//!
//! ## Crate boundary
//!
//! `tether-core` is the only crate allowed to define shared primitives.
//! All cross-component contracts (wire shapes, store traits, errors) live
//! here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod dto;
pub mod error;
pub mod id;
pub mod observability;
pub mod quantity;
pub mod records;
pub mod resources;
pub mod storage;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::dto::{
        AdvertisementDto, AdvertisementResponseDto, ReservationDto, ReservationRequestDto,
        ReservationStatusDto, ResourceMetricsDto, ResourceQuantitiesDto,
    };
    pub use crate::error::{Error, Result};
    pub use crate::id::ReservationId;
    pub use crate::quantity::Quantity;
    pub use crate::records::{
        ClusterAdvertisement, Reservation, ReservationPhase, ReservationStatus,
    };
    pub use crate::resources::{ResourceMetrics, ResourceQuantities};
    pub use crate::storage::{MemoryStore, StateStore, WritePrecondition, WriteResult};
    pub use crate::store::{AdvertisementStore, RecordStore, ReservationStore, Versioned};
}

pub use dto::{
    AdvertisementDto, AdvertisementResponseDto, ReservationDto, ReservationRequestDto,
    ReservationStatusDto, ResourceMetricsDto, ResourceQuantitiesDto,
};
pub use error::{Error, Result};
pub use id::ReservationId;
pub use observability::{LogFormat, init_logging};
pub use quantity::Quantity;
pub use records::{ClusterAdvertisement, Reservation, ReservationPhase, ReservationStatus};
pub use resources::{ResourceMetrics, ResourceQuantities};
pub use storage::{MemoryStore, StateStore, StoredRecord, WritePrecondition, WriteResult};
pub use store::{AdvertisementStore, RecordStore, ReservationStore, Versioned};
