//! iSCSI provisioning flow: ZVOL, extent, target, association.
//!
//! Four appliance objects implement one block volume; each creation can
//! fail partway, so the flow unwinds whatever it created in reverse order
//! before surfacing the error.

use truenas_client::{
    DatasetCreateOptions, DatasetDeleteOptions, DatasetKind, IscsiExtentCreateOptions,
};

use crate::driver::{provisioned_comment, round_up, Driver};
use crate::error::{DriverError, Result};
use crate::params::VolumeParams;
use crate::volume::VolumeHandle;

/// Logical block size reported to initiators. ZVOL geometry is governed
/// separately by `volblocksize`.
const EXTENT_BLOCKSIZE: i64 = 512;

impl Driver {
    /// Provisions an iSCSI volume: ZVOL, then extent, target, and
    /// association at LUN 0. On failure at step *k*, steps `1..k-1` are
    /// unwound in reverse.
    pub(crate) async fn create_iscsi_volume(
        &self,
        name: &str,
        capacity_bytes: i64,
        params: &VolumeParams,
    ) -> Result<VolumeHandle> {
        if self.config.iscsi_portal.is_empty() {
            return Err(DriverError::InvalidArgument(
                "iSCSI portal is not configured".to_string(),
            ));
        }
        let dataset_id = self.dataset_id(name, params)?;
        let volsize = round_up(capacity_bytes, params.volblocksize_bytes());

        let opts = DatasetCreateOptions {
            name: dataset_id.clone(),
            kind: Some(DatasetKind::Volume),
            volsize: Some(volsize),
            volblocksize: Some(params.volblocksize.clone()),
            sparse: Some(params.sparse),
            compression: params.compression.map(|c| c.appliance_value().to_string()),
            sync: params.sync.map(|s| s.appliance_value().to_string()),
            comments: Some(provisioned_comment(name)),
            ..Default::default()
        };
        self.client.create_dataset(&opts).await?;

        match self.publish_iscsi(&dataset_id, name).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.rollback_dataset(&dataset_id).await;
                Err(e)
            }
        }
    }

    /// Publishes an existing ZVOL: extent, target, association. Unwinds
    /// its own creations on failure; the ZVOL itself is the caller's to
    /// roll back. Shared between provisioning and clone publishing.
    pub(crate) async fn publish_iscsi(&self, dataset_id: &str, name: &str) -> Result<VolumeHandle> {
        let disk = format!("zvol/{}", dataset_id);

        let extent = self
            .client
            .create_iscsi_extent(&IscsiExtentCreateOptions::disk(name, &disk, EXTENT_BLOCKSIZE))
            .await?;

        let target = match self.client.create_iscsi_target(name, name).await {
            Ok(target) => target,
            Err(e) => {
                self.rollback_extent(extent.id).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .client
            .create_iscsi_target_extent(target.id, extent.id, 0)
            .await
        {
            self.rollback_target(target.id).await;
            self.rollback_extent(extent.id).await;
            return Err(e.into());
        }

        Ok(VolumeHandle::Iscsi {
            dataset: dataset_id.to_string(),
            iqn: format!("{}:{}", self.config.iscsi_iqn_base, name),
            portal: self.config.iscsi_portal.clone(),
            lun: 0,
        })
    }

    /// Tears an iSCSI volume down: association, extent, target, ZVOL.
    /// Every step tolerates absence.
    pub(crate) async fn delete_iscsi_volume(&self, dataset: &str, iqn: &str) -> Result<()> {
        let disk = format!("zvol/{}", dataset);
        match self.client.get_iscsi_extent_by_disk(&disk).await {
            Ok(extent) => {
                match self.client.get_iscsi_target_extent_by_extent(extent.id).await {
                    Ok(te) => self.client.delete_iscsi_target_extent(te.id, true).await?,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
                self.client.delete_iscsi_extent(extent.id, false, true).await?;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let target_name = iqn.rsplit(':').next().unwrap_or(iqn);
        match self.client.get_iscsi_target_by_name(target_name).await {
            Ok(target) => self.client.delete_iscsi_target(target.id, true).await?,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        self.client
            .delete_dataset(
                dataset,
                &DatasetDeleteOptions {
                    recursive: true,
                    force: true,
                },
            )
            .await?;
        Ok(())
    }

    /// Maps a provisioned ZVOL back to its handle by walking
    /// extent -> association -> target. Returns `None` when any link is
    /// missing (the volume is mid-provision or mid-teardown).
    pub(crate) async fn resolve_iscsi_handle(
        &self,
        dataset_id: &str,
    ) -> Result<Option<VolumeHandle>> {
        let disk = format!("zvol/{}", dataset_id);
        let extent = match self.client.get_iscsi_extent_by_disk(&disk).await {
            Ok(extent) => extent,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let te = match self.client.get_iscsi_target_extent_by_extent(extent.id).await {
            Ok(te) => te,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let target = match self.client.get_iscsi_target_by_id(te.target).await {
            Ok(target) => target,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(VolumeHandle::Iscsi {
            dataset: dataset_id.to_string(),
            iqn: format!("{}:{}", self.config.iscsi_iqn_base, target.name),
            portal: self.config.iscsi_portal.clone(),
            lun: te.lunid,
        }))
    }

    async fn rollback_extent(&self, extent_id: i64) {
        if let Err(e) = self.client.delete_iscsi_extent(extent_id, false, true).await {
            self.log_rollback_failure("iscsi extent", &extent_id.to_string(), &e.into());
        }
    }

    async fn rollback_target(&self, target_id: i64) {
        if let Err(e) = self.client.delete_iscsi_target(target_id, true).await {
            self.log_rollback_failure("iscsi target", &target_id.to_string(), &e.into());
        }
    }
}
