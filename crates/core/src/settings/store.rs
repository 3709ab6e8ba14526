use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use super::SettingValue;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SettingsStoreError {
    #[error("settings storage failure: {0}")]
    Storage(String),
    #[error("settings snapshot could not be decoded: {0}")]
    Decode(String),
}

/// Source of truth for the managed configuration. `save_config` commits a full snapshot at once.
#[async_trait]
pub trait ConfigurationManager: Send + Sync {
    async fn current_config(&self) -> Result<SettingValue, SettingsStoreError>;
    async fn save_config(&self, config: SettingValue) -> Result<(), SettingsStoreError>;
}

#[derive(Clone, Default)]
pub struct InMemorySettingsStore {
    current: Arc<RwLock<SettingValue>>,
    revisions: Arc<RwLock<u64>>,
}

impl InMemorySettingsStore {
    pub fn new(initial: SettingValue) -> Self {
        Self { current: Arc::new(RwLock::new(initial)), revisions: Arc::new(RwLock::new(0)) }
    }

    /// Number of snapshots committed through `save_config`.
    pub async fn revision_count(&self) -> u64 {
        *self.revisions.read().await
    }
}

#[async_trait]
impl ConfigurationManager for InMemorySettingsStore {
    async fn current_config(&self) -> Result<SettingValue, SettingsStoreError> {
        Ok(self.current.read().await.clone())
    }

    async fn save_config(&self, config: SettingValue) -> Result<(), SettingsStoreError> {
        let mut current = self.current.write().await;
        *current = config;
        *self.revisions.write().await += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigurationManager, InMemorySettingsStore};
    use crate::settings::SettingValue;

    #[tokio::test]
    async fn save_replaces_whole_snapshot() {
        let store =
            InMemorySettingsStore::new(SettingValue::section([("A", SettingValue::Bool(false))]));

        let next = SettingValue::section([("B", SettingValue::Int32(1))]);
        store.save_config(next.clone()).await.expect("save");

        assert_eq!(store.current_config().await.expect("load"), next);
        assert_eq!(store.revision_count().await, 1);
    }
}
