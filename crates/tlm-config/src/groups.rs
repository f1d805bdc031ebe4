//! Sensor group editing
//!
//! Every call runs in its own [`ConfigTransaction`].

use crate::error::ConfigError;
use crate::store::{CommitReceipt, ConfigStore, ConfigTransaction};
use crate::telemetry::{sensor_group_path, sensor_groups_path, SensorGroup};
use std::sync::Arc;

/// Sensor groups configured on a device
#[derive(Clone)]
pub struct SensorGroups {
    store: Arc<dyn ConfigStore>,
}

impl SensorGroups {
    /// Editor over `store`
    #[must_use]
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    /// All sensor groups in the running datastore
    ///
    /// # Errors
    /// - [`ConfigError::Session`] / [`ConfigError::Read`] from the device
    /// - [`ConfigError::InvalidData`] for an entry without identifier
    pub async fn list(&self) -> Result<Vec<SensorGroup>, ConfigError> {
        let mut txn = ConfigTransaction::begin(self.store.as_ref()).await?;
        let container = txn.read_subtree(&sensor_groups_path()).await?;
        container
            .children_named("sensor-group")
            .map(|entry| {
                SensorGroup::from_node(entry).ok_or_else(|| {
                    ConfigError::InvalidData("sensor-group entry without identifier".to_string())
                })
            })
            .collect()
    }

    /// Sensor group `id`, if configured
    ///
    /// # Errors
    /// [`ConfigError::Session`] / [`ConfigError::Read`] from the device
    pub async fn get(&self, id: &str) -> Result<Option<SensorGroup>, ConfigError> {
        let mut txn = ConfigTransaction::begin(self.store.as_ref()).await?;
        let path = sensor_group_path(id);
        let node = txn.read_subtree(&path).await?;
        Ok(SensorGroup::from_node(&node))
    }

    /// Store `group`; its path set replaces whatever the device had
    ///
    /// # Errors
    /// [`ConfigError::Commit`] if the device rejects the group
    pub async fn save(&self, group: &SensorGroup) -> Result<CommitReceipt, ConfigError> {
        let mut txn = ConfigTransaction::begin(self.store.as_ref()).await?;
        txn.propose(group.save_delta()).await?;
        let receipt = txn.commit().await?;
        tracing::info!(group = group.id(), paths = group.len(), "sensor group saved");
        Ok(receipt)
    }

    /// Delete sensor group `id`; deleting an absent group succeeds
    ///
    /// # Errors
    /// [`ConfigError::Commit`] if the device rejects the removal, for
    /// instance while a subscription still references the group
    pub async fn delete(&self, id: &str) -> Result<CommitReceipt, ConfigError> {
        let mut txn = ConfigTransaction::begin(self.store.as_ref()).await?;
        txn.propose(SensorGroup::delete_delta(id)).await?;
        let receipt = txn.commit().await?;
        tracing::info!(group = id, "sensor group deleted");
        Ok(receipt)
    }
}

impl std::fmt::Debug for SensorGroups {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorGroups").finish_non_exhaustive()
    }
}
