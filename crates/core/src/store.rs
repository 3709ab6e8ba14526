//! Authorization record persistence contract.
//!
//! The backing store only offers independent reads and version-guarded writes; the workflow engine
//! builds its read-modify-write cycles on top of [`AuthorizationStore::compare_and_set`].

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::authorization::{AuthorizationId, AuthorizationRecord, AuthorizationStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("authorization `{0}` already exists")]
    Duplicate(AuthorizationId),
    #[error("storage failure: {0}")]
    Backend(String),
    #[error("stored record could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    /// Returns the record and the version it was read at.
    async fn get(
        &self,
        id: &AuthorizationId,
    ) -> Result<Option<(AuthorizationRecord, u64)>, StoreError>;

    /// Persists a new record at version 0.
    async fn insert(&self, record: AuthorizationRecord) -> Result<(), StoreError>;

    /// Replaces the record only if it is still at `expected_version`. On success the stored
    /// version becomes `expected_version + 1`. Returns `false` on a version mismatch or when the
    /// record does not exist.
    async fn compare_and_set(
        &self,
        id: &AuthorizationId,
        expected_version: u64,
        record: AuthorizationRecord,
    ) -> Result<bool, StoreError>;

    async fn list_pending(&self) -> Result<Vec<AuthorizationId>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryAuthorizationStore {
    records: RwLock<HashMap<String, AuthorizationRecord>>,
}

impl InMemoryAuthorizationStore {
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AuthorizationStore for InMemoryAuthorizationStore {
    async fn get(
        &self,
        id: &AuthorizationId,
    ) -> Result<Option<(AuthorizationRecord, u64)>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(&id.0).map(|record| (record.clone(), record.version)))
    }

    async fn insert(&self, mut record: AuthorizationRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id.0) {
            return Err(StoreError::Duplicate(record.id));
        }
        record.version = 0;
        records.insert(record.id.0.clone(), record);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        id: &AuthorizationId,
        expected_version: u64,
        mut record: AuthorizationRecord,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        let Some(current) = records.get_mut(&id.0) else {
            return Ok(false);
        };
        if current.version != expected_version {
            return Ok(false);
        }
        record.version = expected_version + 1;
        *current = record;
        Ok(true)
    }

    async fn list_pending(&self) -> Result<Vec<AuthorizationId>, StoreError> {
        let records = self.records.read().await;
        let mut pending: Vec<AuthorizationId> = records
            .values()
            .filter(|record| record.status == AuthorizationStatus::Pending)
            .map(|record| record.id.clone())
            .collect();
        pending.sort();
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::{AuthorizationStore, InMemoryAuthorizationStore, StoreError};
    use crate::domain::authorization::{
        AuthorizationId, AuthorizationRecord, AuthorizationStatus, UserId,
    };
    use crate::settings::FieldPath;

    fn record(id: &str) -> AuthorizationRecord {
        AuthorizationRecord::new(
            AuthorizationId(id.to_string()),
            FieldPath::new(["TeamSettings", "MaxUsersPerTeam"]),
            "50",
            UserId::new("bob"),
            BTreeMap::new(),
            None,
            1,
            Utc::now(),
            None,
        )
    }

    #[tokio::test]
    async fn compare_and_set_requires_matching_version() {
        let store = InMemoryAuthorizationStore::default();
        store.insert(record("a-1")).await.expect("insert");
        let id = AuthorizationId("a-1".to_string());

        let (mut current, version) = store.get(&id).await.expect("get").expect("exists");
        assert_eq!(version, 0);

        current.proposed_value = "60".to_string();
        assert!(store.compare_and_set(&id, 0, current.clone()).await.expect("cas"));
        assert!(!store.compare_and_set(&id, 0, current).await.expect("stale cas"));

        let (stored, version) = store.get(&id).await.expect("get").expect("exists");
        assert_eq!(version, 1);
        assert_eq!(stored.version, 1);
        assert_eq!(stored.proposed_value, "60");
    }

    #[tokio::test]
    async fn insert_rejects_duplicates_and_cas_on_missing_is_false() {
        let store = InMemoryAuthorizationStore::default();
        store.insert(record("a-1")).await.expect("insert");

        assert_eq!(
            store.insert(record("a-1")).await,
            Err(StoreError::Duplicate(AuthorizationId("a-1".to_string())))
        );
        let missing = AuthorizationId("nope".to_string());
        assert!(!store.compare_and_set(&missing, 0, record("nope")).await.expect("cas"));
        assert!(store.get(&missing).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn list_pending_skips_terminal_records() {
        let store = InMemoryAuthorizationStore::default();
        store.insert(record("a-1")).await.expect("insert");
        let mut done = record("a-2");
        done.status = AuthorizationStatus::Denied;
        store.insert(done).await.expect("insert");

        let pending = store.list_pending().await.expect("list");
        assert_eq!(pending, vec![AuthorizationId("a-1".to_string())]);
        assert_eq!(store.len().await, 2);
    }
}
