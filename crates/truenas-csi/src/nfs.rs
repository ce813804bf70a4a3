//! NFS provisioning flow: dataset, then share at the dataset mountpoint.

use truenas_client::{
    Dataset, DatasetCreateOptions, DatasetDeleteOptions, NfsShareCreateOptions,
};

use crate::driver::{provisioned_comment, Driver};
use crate::error::{DriverError, Result};
use crate::params::VolumeParams;
use crate::volume::VolumeHandle;

impl Driver {
    /// Provisions an NFS volume: create the dataset with its quota, then
    /// export it. If the export fails, the dataset is rolled back before
    /// the error surfaces.
    pub(crate) async fn create_nfs_volume(
        &self,
        name: &str,
        capacity_bytes: i64,
        params: &VolumeParams,
    ) -> Result<VolumeHandle> {
        if self.config.nfs_server.is_empty() {
            return Err(DriverError::InvalidArgument(
                "NFS server is not configured".to_string(),
            ));
        }
        let dataset_id = self.dataset_id(name, params)?;

        let opts = DatasetCreateOptions {
            name: dataset_id.clone(),
            refquota: Some(capacity_bytes),
            recordsize: params.recordsize.clone(),
            compression: params.compression.map(|c| c.appliance_value().to_string()),
            sync: params.sync.map(|s| s.appliance_value().to_string()),
            atime: params.atime.map(|a| a.appliance_value().to_string()),
            comments: Some(provisioned_comment(name)),
            ..Default::default()
        };
        let dataset = self.client.create_dataset(&opts).await?;

        match self.publish_nfs(&dataset, name).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.rollback_dataset(&dataset_id).await;
                Err(e)
            }
        }
    }

    /// Exports an existing filesystem dataset and composes its handle.
    /// Shared between provisioning and clone publishing.
    pub(crate) async fn publish_nfs(&self, dataset: &Dataset, name: &str) -> Result<VolumeHandle> {
        let mountpoint = dataset
            .mountpoint
            .clone()
            .unwrap_or_else(|| format!("/mnt/{}", dataset.id));

        let share = NfsShareCreateOptions {
            path: mountpoint.clone(),
            comment: Some(provisioned_comment(name)),
            hosts: self.config.nfs_allowed_hosts.clone(),
            networks: self.config.nfs_allowed_networks.clone(),
            enabled: true,
            ..Default::default()
        };
        self.client.create_nfs_share(&share).await?;

        Ok(VolumeHandle::Nfs {
            dataset: dataset.id.clone(),
            mountpoint,
            server: self.config.nfs_server.clone(),
        })
    }

    /// Tears an NFS volume down: share first, then the dataset. Both
    /// steps tolerate absence.
    pub(crate) async fn delete_nfs_volume(&self, dataset: &str, mountpoint: &str) -> Result<()> {
        match self.client.get_nfs_share_by_path(mountpoint).await {
            Ok(share) => self.client.delete_nfs_share(share.id).await?,
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

    /// Best-effort dataset rollback: absence is fine, anything else is
    /// logged without masking the original provisioning error.
    pub(crate) async fn rollback_dataset(&self, dataset_id: &str) {
        let opts = DatasetDeleteOptions {
            recursive: true,
            force: true,
        };
        if let Err(e) = self.client.delete_dataset(dataset_id, &opts).await {
            self.log_rollback_failure("dataset", dataset_id, &e.into());
        }
    }
}
