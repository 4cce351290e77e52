//! Error types and result aliases for Tether.
//!
//! This module defines the shared error types used across all Tether
//! components. Errors are structured for programmatic handling: the broker's
//! HTTP layer maps each variant to a status code, and callers can tell a
//! version conflict apart from a missing record or a plain storage failure.

use std::fmt;

/// The result type used throughout Tether.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Tether operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A resource quantity string could not be parsed or is out of range.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Invalid input was provided (missing fields, malformed durations, bad config).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No authenticated caller identity was available.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The caller's bound identity does not match the identity it claimed.
    #[error("identity mismatch: advertised {advertised}, authenticated {authenticated}")]
    IdentityMismatch {
        /// The cluster id carried in the request body.
        advertised: String,
        /// The cluster id bound from the transport credentials.
        authenticated: String,
    },

    /// The requested record was not found.
    #[error("not found: {resource_type} with id {id}")]
    NotFound {
        /// The type of record that was not found.
        resource_type: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// No advertised cluster satisfies the requested quantities.
    #[error("no suitable cluster: {0}")]
    NoSuitableCluster(String),

    /// The chosen provider no longer fits the request (lost a race).
    #[error("insufficient resources in cluster {cluster_id}")]
    InsufficientResources {
        /// The provider cluster that could not absorb the request.
        cluster_id: String,
    },

    /// The reservation lock could not be taken within the retry budget.
    #[error("lock contended on cluster {cluster_id} after {attempts} attempts")]
    LockContended {
        /// The provider cluster whose advertisement kept moving.
        cluster_id: String,
        /// Number of compare-and-swap attempts made.
        attempts: u32,
    },

    /// A conditional write lost against a concurrent writer.
    #[error("version conflict: {message}")]
    Conflict {
        /// Description of the conflicting write.
        message: String,
    },

    /// A state-store operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new not-found error.
    #[must_use]
    pub fn not_found(resource_type: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a new version-conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true for outcomes the caller may retry verbatim
    /// (contention and transient storage trouble, not validation failures).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::LockContended { .. } | Self::Storage { .. }
        )
    }
}
