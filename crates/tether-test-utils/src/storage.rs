//! Recording state store with injectable CAS conflicts.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use tether_core::{
    MemoryStore, Result, StateStore, StoredRecord, WritePrecondition, WriteResult,
};

/// A recorded store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// A `get` for the key.
    Get(String),
    /// A `put` for the key; true when a precondition was attached.
    Put(String, bool),
    /// A `delete` for the key.
    Delete(String),
    /// A `list` under the prefix.
    List(String),
}

/// In-memory state store that records operations and can inject version
/// conflicts.
///
/// Injected conflicts apply only to `MatchesVersion` writes, so seeding
/// fixtures with `create` stays unaffected; each injected conflict
/// reports the record's real current version and leaves the record
/// unchanged, exactly as a racing writer would make a CAS write behave.
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    operations: Mutex<Vec<Operation>>,
    cas_failures: AtomicU32,
}

impl RecordingStore {
    /// Creates an empty recording store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` version-conditioned writes fail their
    /// precondition.
    pub fn fail_next_cas(&self, count: u32) {
        self.cas_failures.store(count, Ordering::SeqCst);
    }

    /// Returns the operations recorded so far.
    pub fn operations(&self) -> Vec<Operation> {
        self.operations.lock().expect("operations lock").clone()
    }

    /// Returns how many version-conditioned writes were attempted.
    pub fn cas_attempts(&self) -> usize {
        self.operations()
            .iter()
            .filter(|op| matches!(op, Operation::Put(_, true)))
            .count()
    }

    fn record(&self, op: Operation) {
        self.operations.lock().expect("operations lock").push(op);
    }
}

#[async_trait]
impl StateStore for RecordingStore {
    async fn get(&self, key: &str) -> Result<StoredRecord> {
        self.record(Operation::Get(key.to_string()));
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let conditioned = matches!(precondition, WritePrecondition::MatchesVersion(_));
        self.record(Operation::Put(key.to_string(), conditioned));

        if conditioned
            && self
                .cas_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            let current_version = self
                .inner
                .get(key)
                .await
                .map(|record| record.version)
                .unwrap_or_else(|_| "0".to_string());
            return Ok(WriteResult::PreconditionFailed { current_version });
        }

        self.inner.put(key, data, precondition).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.record(Operation::Delete(key.to_string()));
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredRecord>> {
        self.record(Operation::List(prefix.to_string()));
        self.inner.list(prefix).await
    }
}
