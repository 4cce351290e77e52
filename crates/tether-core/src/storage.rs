//! State-store abstraction with compare-and-swap writes.
//!
//! The broker assumes an external store supporting conditional writes
//! keyed by a per-record version token. The token is an opaque `String` so
//! different backends can supply their own notion of it (etcd mod-revision,
//! object-store generation, SQL row version); nothing above this layer may
//! interpret it beyond equality.
//!
//! All cross-process concurrency control lives in these version tokens.
//! Layering in-process mutexes on top would neither coordinate with other
//! broker replicas nor surface the conflict results the retry loops depend
//! on.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Precondition for conditional writes (CAS operations).
#[derive(Debug, Clone)]
pub enum WritePrecondition {
    /// Write only if no record exists under the key.
    DoesNotExist,
    /// Write only if the record's version matches the given token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

/// Result of a conditional write.
///
/// A failed precondition is a normal result, never an error: retry loops
/// branch on it without string-matching error messages.
#[derive(Debug, Clone)]
pub enum WriteResult {
    /// Write succeeded, returns the new version token.
    Success {
        /// The new version token after the write.
        version: String,
    },
    /// Precondition failed, returns the current version token.
    PreconditionFailed {
        /// The version that caused the precondition to fail; `"0"` when the
        /// record does not exist.
        current_version: String,
    },
}

/// A record read back from the store, with its version token.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    /// The record's key.
    pub key: String,
    /// Raw record payload.
    pub data: Bytes,
    /// Opaque version token for CAS writes.
    pub version: String,
    /// Last modification timestamp, if the backend tracks one.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage contract for versioned records.
///
/// No transaction spans multiple keys; every multi-record effect above
/// this layer is ordered and idempotent instead.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Reads a record and its current version.
    ///
    /// Returns [`Error::NotFound`] if no record exists under the key.
    async fn get(&self, key: &str) -> Result<StoredRecord>;

    /// Writes a record under an optional precondition.
    ///
    /// Returns [`WriteResult::PreconditionFailed`] when the precondition
    /// does not hold.
    async fn put(&self, key: &str, data: Bytes, precondition: WritePrecondition)
        -> Result<WriteResult>;

    /// Deletes a record. Succeeds even if the record does not exist.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Lists all records whose key starts with `prefix`.
    ///
    /// Ordering is backend-defined; callers needing determinism sort the
    /// results themselves.
    async fn list(&self, prefix: &str) -> Result<Vec<StoredRecord>>;
}

/// In-memory state store for tests and local development.
///
/// Thread-safe via `RwLock`; versions are numeric counters rendered as
/// strings, mimicking revision-based backends.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, MemoryRecord>>>,
}

#[derive(Debug, Clone)]
struct MemoryRecord {
    data: Bytes,
    version: i64,
    last_modified: DateTime<Utc>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<StoredRecord> {
        let records = self.records.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        records
            .get(key)
            .map(|r| StoredRecord {
                key: key.to_string(),
                data: r.data.clone(),
                version: r.version.to_string(),
                last_modified: Some(r.last_modified),
            })
            .ok_or_else(|| Error::not_found("record", key))
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut records = self.records.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        let current = records.get(key);

        match precondition {
            WritePrecondition::DoesNotExist => {
                if let Some(record) = current {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: record.version.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match current {
                    Some(record) if record.version != expected_num => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: record.version.to_string(),
                        });
                    }
                    None => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: "0".to_string(),
                        });
                    }
                    _ => {}
                }
            }
            WritePrecondition::None => {}
        }

        let new_version = current.map_or(1, |r| r.version + 1);
        records.insert(
            key.to_string(),
            MemoryRecord {
                data,
                version: new_version,
                last_modified: Utc::now(),
            },
        );
        drop(records);

        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.records
            .write()
            .map_err(|_| Error::Internal {
                message: "lock poisoned".into(),
            })?
            .remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredRecord>> {
        let records = self.records.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        Ok(records
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(key, r)| StoredRecord {
                key: key.clone(),
                data: r.data.clone(),
                version: r.version.to_string(),
                last_modified: Some(r.last_modified),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_returns_data_and_version() {
        let store = MemoryStore::new();
        let data = Bytes::from("hello");

        let result = store
            .put("adv/c1-adv", data.clone(), WritePrecondition::None)
            .await
            .expect("put should succeed");
        assert!(matches!(result, WriteResult::Success { ref version } if version == "1"));

        let record = store.get("adv/c1-adv").await.expect("get should succeed");
        assert_eq!(record.data, data);
        assert_eq!(record.version, "1");
        assert!(record.last_modified.is_some());
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get("absent").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn does_not_exist_precondition_blocks_second_create() {
        let store = MemoryStore::new();

        let first = store
            .put("k", Bytes::from("a"), WritePrecondition::DoesNotExist)
            .await
            .unwrap();
        assert!(matches!(first, WriteResult::Success { .. }));

        let second = store
            .put("k", Bytes::from("b"), WritePrecondition::DoesNotExist)
            .await
            .unwrap();
        assert!(matches!(second, WriteResult::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn matches_version_precondition_detects_stale_tokens() {
        let store = MemoryStore::new();

        let WriteResult::Success { version: v1 } = store
            .put("k", Bytes::from("a"), WritePrecondition::None)
            .await
            .unwrap()
        else {
            panic!("expected success");
        };

        let updated = store
            .put(
                "k",
                Bytes::from("b"),
                WritePrecondition::MatchesVersion(v1.clone()),
            )
            .await
            .unwrap();
        assert!(matches!(updated, WriteResult::Success { .. }));

        let stale = store
            .put("k", Bytes::from("c"), WritePrecondition::MatchesVersion(v1))
            .await
            .unwrap();
        assert!(
            matches!(stale, WriteResult::PreconditionFailed { ref current_version } if current_version == "2")
        );
    }

    #[tokio::test]
    async fn matches_version_on_missing_record_fails() {
        let store = MemoryStore::new();
        let result = store
            .put(
                "absent",
                Bytes::from("a"),
                WritePrecondition::MatchesVersion("3".to_string()),
            )
            .await
            .unwrap();
        assert!(
            matches!(result, WriteResult::PreconditionFailed { ref current_version } if current_version == "0")
        );
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let store = MemoryStore::new();
        for key in ["adv/c1-adv", "adv/c2-adv", "rsv/rsv-c0-1"] {
            store
                .put(key, Bytes::from("x"), WritePrecondition::None)
                .await
                .unwrap();
        }

        let advs = store.list("adv/").await.unwrap();
        assert_eq!(advs.len(), 2);

        let all = store.list("").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store
            .put("k", Bytes::from("a"), WritePrecondition::None)
            .await
            .unwrap();

        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.get("k").await.is_err());
    }
}
