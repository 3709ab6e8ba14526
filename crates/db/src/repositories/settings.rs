use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use tracing::info;

use mpa_core::settings::{ConfigurationManager, SettingValue, SettingsStoreError};

use super::{decode_error, RepositoryError};
use crate::DbPool;

/// Configuration snapshots kept as an append-only revision log. The newest revision is current.
#[derive(Clone)]
pub struct SqlSettingsStore {
    pool: DbPool,
}

impl SqlSettingsStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Stores `initial` as the first revision unless one already exists. Returns whether the seed
    /// was written.
    pub async fn seed_if_empty(&self, initial: &SettingValue) -> Result<bool, SettingsStoreError> {
        if self.latest_revision().await?.is_some() {
            return Ok(false);
        }
        self.append(initial).await?;
        info!(event_name = "mpa.settings.seeded", "initial configuration snapshot stored");
        Ok(true)
    }

    pub async fn latest_revision(&self) -> Result<Option<i64>, SettingsStoreError> {
        let row = sqlx::query("SELECT MAX(revision) AS revision FROM settings_revisions")
            .fetch_one(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(row.try_get::<Option<i64>, _>("revision").map_err(decode_error)?)
    }

    async fn append(&self, snapshot: &SettingValue) -> Result<(), SettingsStoreError> {
        let payload = serde_json::to_string(snapshot).map_err(decode_error)?;
        sqlx::query("INSERT INTO settings_revisions (snapshot_json, saved_at) VALUES (?, ?)")
            .bind(payload)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(())
    }
}

#[async_trait]
impl ConfigurationManager for SqlSettingsStore {
    async fn current_config(&self) -> Result<SettingValue, SettingsStoreError> {
        let row = sqlx::query(
            "SELECT snapshot_json FROM settings_revisions ORDER BY revision DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let Some(row) = row else {
            return Err(SettingsStoreError::Storage(
                "no configuration snapshot stored; seed one with `mpa migrate --seed <file>`"
                    .to_string(),
            ));
        };
        let payload: String = row.try_get("snapshot_json").map_err(decode_error)?;
        Ok(serde_json::from_str(&payload).map_err(decode_error)?)
    }

    async fn save_config(&self, config: SettingValue) -> Result<(), SettingsStoreError> {
        self.append(&config).await
    }
}
