use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use mpa_core::domain::{AuthorizationId, AuthorizationRecord, AuthorizationStatus};
use mpa_core::store::{AuthorizationStore, StoreError};

use super::{decode_error, RepositoryError};
use crate::DbPool;

/// Authorization records as JSON payloads guarded by an integer `version` column.
#[derive(Clone)]
pub struct SqlAuthorizationStore {
    pool: DbPool,
}

impl SqlAuthorizationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn count_by_status(&self, status: AuthorizationStatus) -> Result<i64, StoreError> {
        let row =
            sqlx::query("SELECT COUNT(*) AS count FROM authorization_records WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(RepositoryError::from)?;
        Ok(row.try_get::<i64, _>("count").map_err(decode_error)?)
    }
}

fn encode(record: &AuthorizationRecord) -> Result<String, RepositoryError> {
    serde_json::to_string(record).map_err(decode_error)
}

fn to_db_version(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version).map_err(decode_error)
}

fn row_to_record(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<(AuthorizationRecord, u64), RepositoryError> {
    let payload: String = row.try_get("payload_json").map_err(decode_error)?;
    let version: i64 = row.try_get("version").map_err(decode_error)?;
    let version = u64::try_from(version).map_err(decode_error)?;

    let mut record: AuthorizationRecord = serde_json::from_str(&payload).map_err(decode_error)?;
    record.version = version;
    Ok((record, version))
}

#[async_trait]
impl AuthorizationStore for SqlAuthorizationStore {
    async fn get(
        &self,
        id: &AuthorizationId,
    ) -> Result<Option<(AuthorizationRecord, u64)>, StoreError> {
        let row =
            sqlx::query("SELECT payload_json, version FROM authorization_records WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(RepositoryError::from)?;

        match row {
            Some(ref r) => Ok(Some(row_to_record(r)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, mut record: AuthorizationRecord) -> Result<(), StoreError> {
        record.version = 0;
        let payload = encode(&record)?;

        let result = sqlx::query(
            "INSERT INTO authorization_records (id, status, version, requester_id, field_path,
                                                payload_json, expires_at, created_at, updated_at)
             VALUES (?, ?, 0, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(record.status.as_str())
        .bind(&record.requester_id.0)
        .bind(record.field_path.to_string())
        .bind(&payload)
        .bind(record.expires_at.map(|at| at.to_rfc3339()))
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                Err(StoreError::Duplicate(record.id))
            }
            Err(error) => Err(RepositoryError::from(error).into()),
        }
    }

    async fn compare_and_set(
        &self,
        id: &AuthorizationId,
        expected_version: u64,
        mut record: AuthorizationRecord,
    ) -> Result<bool, StoreError> {
        let next_version = expected_version + 1;
        record.version = next_version;
        let payload = encode(&record)?;

        let result = sqlx::query(
            "UPDATE authorization_records
             SET status = ?, version = ?, payload_json = ?, expires_at = ?, updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(record.status.as_str())
        .bind(to_db_version(next_version)?)
        .bind(&payload)
        .bind(record.expires_at.map(|at| at.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .bind(to_db_version(expected_version)?)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_pending(&self) -> Result<Vec<AuthorizationId>, StoreError> {
        let rows = sqlx::query(
            "SELECT id FROM authorization_records WHERE status = ? ORDER BY created_at, id",
        )
        .bind(AuthorizationStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("id")
                    .map(AuthorizationId)
                    .map_err(|e| StoreError::from(decode_error(e)))
            })
            .collect()
    }
}
