//! Snapshot and clone flows.
//!
//! Cloning goes snapshot -> clone -> publish. The intermediate snapshot
//! for volume-to-volume clones has a deterministic name so a retried
//! clone finds (and a failed clone removes) the same snapshot. A clone
//! keeps its origin snapshot alive; the snapshot is only removed when the
//! clone flow fails.

use truenas_client::{DatasetKind, Snapshot};

use crate::driver::Driver;
use crate::error::{DriverError, Result};
use crate::params::{Protocol, VolumeParams};
use crate::volume::VolumeHandle;

/// Prefix of driver-generated intermediate snapshots.
const CLONE_SNAPSHOT_PREFIX: &str = "csi-clone-";

impl Driver {
    /// Snapshots the volume behind `handle` as `dataset@snapshot_name`.
    ///
    /// Filesystem volumes snapshot recursively when they have child
    /// datasets so the point-in-time view covers the whole subtree;
    /// ZVOLs are always non-recursive.
    pub async fn create_snapshot(
        &self,
        handle: &VolumeHandle,
        snapshot_name: &str,
    ) -> Result<Snapshot> {
        validate_snapshot_name(snapshot_name)?;

        let recursive = match handle.protocol() {
            Protocol::Iscsi => false,
            Protocol::Nfs => !self.client.list_datasets(handle.dataset()).await?.is_empty(),
        };

        Ok(self
            .client
            .create_snapshot(handle.dataset(), snapshot_name, recursive)
            .await?)
    }

    /// Deletes a snapshot by its `dataset@name` identifier.
    ///
    /// Idempotent for absent snapshots. A snapshot with dependent clones
    /// is refused by the appliance and that error surfaces unchanged; the
    /// caller must delete the clones first.
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        Ok(self.client.delete_snapshot(snapshot_id).await?)
    }

    /// Clones a volume: snapshots the source under a deterministic
    /// temporary name, clones that snapshot to a fresh dataset, and
    /// publishes it like a normal provision. If any step after the
    /// snapshot fails, the clone and the temporary snapshot are removed.
    pub async fn clone_volume(
        &self,
        source: &VolumeHandle,
        new_name: &str,
        params: &VolumeParams,
    ) -> Result<VolumeHandle> {
        let snapshot_name = format!("{}{}", CLONE_SNAPSHOT_PREFIX, new_name);
        let snapshot_id = format!("{}@{}", source.dataset(), snapshot_name);

        if let Err(e) = self
            .client
            .create_snapshot(source.dataset(), &snapshot_name, false)
            .await
        {
            // A leftover from a previously failed clone is reused.
            if self.client.get_snapshot(&snapshot_id).await.is_err() {
                return Err(e.into());
            }
        }

        match self.clone_and_publish(&snapshot_id, new_name, params).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                if let Err(del) = self.client.delete_snapshot(&snapshot_id).await {
                    self.log_rollback_failure("snapshot", &snapshot_id, &del.into());
                }
                Err(e)
            }
        }
    }

    /// Creates a volume from an externally-named snapshot. The snapshot
    /// itself is left untouched on failure; only the clone is rolled
    /// back.
    pub async fn volume_from_snapshot(
        &self,
        snapshot_id: &str,
        new_name: &str,
        params: &VolumeParams,
    ) -> Result<VolumeHandle> {
        self.clone_and_publish(snapshot_id, new_name, params).await
    }

    /// Clones `snapshot_id` to a new dataset and publishes it with the
    /// protocol-level resources, rolling the clone back on failure.
    async fn clone_and_publish(
        &self,
        snapshot_id: &str,
        new_name: &str,
        params: &VolumeParams,
    ) -> Result<VolumeHandle> {
        if !snapshot_id.contains('@') {
            return Err(DriverError::InvalidArgument(format!(
                "snapshot id must be dataset@name, got {:?}",
                snapshot_id
            )));
        }
        let new_dataset = self.dataset_id(new_name, params)?;

        let clone = self.client.clone_snapshot(snapshot_id, &new_dataset).await?;

        let published = match (params.protocol, clone.kind) {
            (Protocol::Nfs, DatasetKind::Filesystem) => self.publish_nfs(&clone, new_name).await,
            (Protocol::Iscsi, DatasetKind::Volume) => {
                self.publish_iscsi(&new_dataset, new_name).await
            }
            (protocol, kind) => Err(DriverError::InvalidArgument(format!(
                "snapshot backs a {:?} dataset, cannot publish as {:?}",
                kind, protocol
            ))),
        };

        match published {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.rollback_dataset(&new_dataset).await;
                Err(e)
            }
        }
    }
}

fn validate_snapshot_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DriverError::InvalidArgument("snapshot name is empty".to_string()));
    }
    if name.contains('/') || name.contains('@') {
        return Err(DriverError::InvalidArgument(format!(
            "snapshot name must not contain '/' or '@': {:?}",
            name
        )));
    }
    Ok(())
}
