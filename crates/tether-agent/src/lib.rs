//! # tether-agent
//!
//! The per-cluster agent of a Tether federation.
//!
//! The agent runs three independent loops against the broker:
//!
//! - **Advertiser** — publishes this cluster's resource snapshot on a
//!   jittered cadence and materialises piggybacked provider instructions.
//! - **Instruction poller** — short-cadence pull keeping provider
//!   instruction delivery bounded even when publishing stalls.
//! - **Request flow** — a user-created resource request becomes exactly
//!   one synchronous reservation call; the answer is materialised as a
//!   requester-side instruction.
//!
//! Both delivery paths key local records by reservation id, so duplicate
//! deliveries collapse into one record.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod advertiser;
pub mod client;
pub mod config;
pub mod local;
pub mod poller;
pub mod requests;
pub mod snapshot;

pub use advertiser::Advertiser;
pub use client::{BrokerClient, BrokerTransport};
pub use config::AgentConfig;
pub use local::{
    LocalRecords, ProviderInstruction, RequestPhase, ReservationInstruction, ResourceRequest,
};
pub use poller::InstructionPoller;
pub use requests::RequestProcessor;
pub use snapshot::{ClusterResourceSource, FixedResourceSource};
