//! Shared test utilities for Tether integration tests.
//!
//! This crate provides:
//! - [`RecordingStore`]: in-memory state store with operation recording
//!   and injectable CAS conflicts
//! - Fixture builders for advertisements and resource snapshots
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_test_utils::{RecordingStore, advertisement};
//!
//! let store = RecordingStore::new();
//! store.fail_next_cas(2); // force two lock retries
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// Test utilities use expect/unwrap for cleaner test code.
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod storage;

pub use fixtures::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
