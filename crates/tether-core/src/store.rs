//! Typed record stores over the raw [`StateStore`].
//!
//! A [`RecordStore`] pairs a JSON codec and a key prefix with the CAS
//! primitives, exposing the three operations the broker consumes:
//! fetch-by-name (with version), create-if-absent, and
//! update-with-version. A version mismatch surfaces as
//! [`Error::Conflict`], distinguishable from not-found and from generic
//! storage failures.

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::records::{ClusterAdvertisement, Reservation};
use crate::storage::{StateStore, StoredRecord, WritePrecondition, WriteResult};

/// Key prefix for advertisement records.
pub const ADVERTISEMENTS_PREFIX: &str = "advertisements";

/// Key prefix for reservation records.
pub const RESERVATIONS_PREFIX: &str = "reservations";

/// A record together with the version token it was read at.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    /// The decoded record.
    pub record: T,
    /// The version token to pass to `update`.
    pub version: String,
}

/// A typed, prefixed view of the state store.
pub struct RecordStore<T> {
    store: Arc<dyn StateStore>,
    prefix: String,
    resource_type: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for RecordStore<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            prefix: self.prefix.clone(),
            resource_type: self.resource_type,
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for RecordStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("prefix", &self.prefix)
            .field("resource_type", &self.resource_type)
            .finish()
    }
}

impl<T: Serialize + DeserializeOwned> RecordStore<T> {
    /// Creates a store rooted at `namespace/prefix` (namespace may be
    /// empty for single-tenant deployments).
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        namespace: &str,
        prefix: &str,
        resource_type: &'static str,
    ) -> Self {
        let prefix = if namespace.is_empty() {
            prefix.to_string()
        } else {
            format!("{namespace}/{prefix}")
        };
        Self {
            store,
            prefix,
            resource_type,
            _marker: PhantomData,
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{name}", self.prefix)
    }

    /// Fetches a record by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if absent, [`Error::Serialization`] on a
    /// corrupt payload.
    pub async fn fetch(&self, name: &str) -> Result<Versioned<T>> {
        let stored = self.store.get(&self.key(name)).await.map_err(|e| match e {
            Error::NotFound { .. } => Error::not_found(self.resource_type, name),
            other => other,
        })?;
        self.decode(&stored).map(|record| Versioned {
            record,
            version: stored.version,
        })
    }

    /// Fetches a record by name, mapping not-found to `None`.
    ///
    /// # Errors
    ///
    /// Propagates any failure other than not-found.
    pub async fn try_fetch(&self, name: &str) -> Result<Option<Versioned<T>>> {
        match self.fetch(name).await {
            Ok(v) => Ok(Some(v)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Creates a record that must not already exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if a record already exists under the
    /// name (a concurrent first create; callers refetch and retry).
    pub async fn create(&self, name: &str, record: &T) -> Result<String> {
        let data = self.encode(record)?;
        match self
            .store
            .put(&self.key(name), data, WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { version } => Ok(version),
            WriteResult::PreconditionFailed { .. } => Err(Error::conflict(format!(
                "{} {name} already exists",
                self.resource_type
            ))),
        }
    }

    /// Updates a record under the version token it was read at.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the token is stale (a concurrent
    /// writer advanced the record).
    pub async fn update(&self, name: &str, record: &T, version: &str) -> Result<String> {
        let data = self.encode(record)?;
        match self
            .store
            .put(
                &self.key(name),
                data,
                WritePrecondition::MatchesVersion(version.to_string()),
            )
            .await?
        {
            WriteResult::Success { version } => Ok(version),
            WriteResult::PreconditionFailed { current_version } => Err(Error::conflict(format!(
                "{} {name} moved from version {version} to {current_version}",
                self.resource_type
            ))),
        }
    }

    /// Lists every record under this store's prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if any payload fails to decode.
    pub async fn list(&self) -> Result<Vec<Versioned<T>>> {
        let stored = self.store.list(&format!("{}/", self.prefix)).await?;
        stored
            .iter()
            .map(|s| {
                self.decode(s).map(|record| Versioned {
                    record,
                    version: s.version.clone(),
                })
            })
            .collect()
    }

    /// Deletes a record by name (idempotent).
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.store.delete(&self.key(name)).await
    }

    fn encode(&self, record: &T) -> Result<Bytes> {
        serde_json::to_vec(record)
            .map(Bytes::from)
            .map_err(|e| Error::Serialization {
                message: format!("encode {}: {e}", self.resource_type),
            })
    }

    fn decode(&self, stored: &StoredRecord) -> Result<T> {
        serde_json::from_slice(&stored.data).map_err(|e| Error::Serialization {
            message: format!("decode {} at {}: {e}", self.resource_type, stored.key),
        })
    }
}

/// Store for cluster advertisements.
pub type AdvertisementStore = RecordStore<ClusterAdvertisement>;

/// Store for reservations.
pub type ReservationStore = RecordStore<Reservation>;

/// Opens the advertisement store under the given namespace.
#[must_use]
pub fn advertisements(store: Arc<dyn StateStore>, namespace: &str) -> AdvertisementStore {
    RecordStore::new(store, namespace, ADVERTISEMENTS_PREFIX, "advertisement")
}

/// Opens the reservation store under the given namespace.
#[must_use]
pub fn reservations(store: Arc<dyn StateStore>, namespace: &str) -> ReservationStore {
    RecordStore::new(store, namespace, RESERVATIONS_PREFIX, "reservation")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Doc {
        value: u32,
    }

    fn docs() -> RecordStore<Doc> {
        RecordStore::new(Arc::new(MemoryStore::new()), "test-ns", "docs", "doc")
    }

    #[tokio::test]
    async fn create_fetch_update_cycle() {
        let store = docs();

        let v1 = store.create("a", &Doc { value: 1 }).await.unwrap();
        let fetched = store.fetch("a").await.unwrap();
        assert_eq!(fetched.record, Doc { value: 1 });
        assert_eq!(fetched.version, v1);

        let v2 = store.update("a", &Doc { value: 2 }, &v1).await.unwrap();
        assert_ne!(v1, v2);
        assert_eq!(store.fetch("a").await.unwrap().record.value, 2);
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let store = docs();
        store.create("a", &Doc { value: 1 }).await.unwrap();
        let err = store.create("a", &Doc { value: 2 }).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let store = docs();
        let v1 = store.create("a", &Doc { value: 1 }).await.unwrap();
        store.update("a", &Doc { value: 2 }, &v1).await.unwrap();

        let err = store.update("a", &Doc { value: 3 }, &v1).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn fetch_missing_maps_resource_type() {
        let store = docs();
        let err = store.fetch("absent").await.unwrap_err();
        let Error::NotFound { resource_type, id } = err else {
            panic!("expected not found, got {err:?}");
        };
        assert_eq!(resource_type, "doc");
        assert_eq!(id, "absent");

        assert!(store.try_fetch("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_only_sees_own_prefix() {
        let backend = Arc::new(MemoryStore::new());
        let a: RecordStore<Doc> = RecordStore::new(Arc::clone(&backend) as _, "ns", "a", "doc");
        let b: RecordStore<Doc> = RecordStore::new(backend as _, "ns", "b", "doc");

        a.create("one", &Doc { value: 1 }).await.unwrap();
        b.create("two", &Doc { value: 2 }).await.unwrap();

        let listed = a.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].record.value, 1);
    }
}
