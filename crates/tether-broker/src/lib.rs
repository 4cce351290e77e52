//! # tether-broker
//!
//! The central broker of a Tether federation.
//!
//! Agents publish per-cluster advertisements here; requester agents place
//! synchronous reservation calls; the broker picks the best-fitting
//! provider, locks its capacity under optimistic concurrency, and hands
//! both sides the instructions they need to peer out-of-band.
//!
//! ## Endpoints
//!
//! ```text
//! GET  /healthz                          - Liveness (unauthenticated)
//! GET  /openapi.json                     - API document
//! POST /api/v1/advertisements            - Advertisement intake (+ piggybacked instructions)
//! GET  /api/v1/advertisements/{cluster}  - Advertisement lookup
//! POST /api/v1/reservations              - Synchronous reservation
//! GET  /api/v1/instructions              - Provider instruction pull
//! ```
//!
//! This crate is a thin composition layer over `tether-core`: the record
//! types, store traits and wire contracts all live there.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod lifecycle;
pub mod locking;
pub mod metrics;
pub mod openapi;
pub mod routes;
pub mod server;

pub use config::Config;
pub use decision::DecisionEngine;
pub use lifecycle::{LifecycleObserver, PassReport};
pub use locking::ReservationLock;
pub use server::{AppState, Server};
