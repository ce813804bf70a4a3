//! The volume orchestration engine.
//!
//! Each public operation is a linear flow of typed appliance calls.
//! Multi-object provisioning rolls back in reverse creation order on
//! failure; teardown tolerates absence at every step so it can be safely
//! re-executed after a partial prior run.

use tracing::debug;
use truenas_client::{Client, DatasetKind, DatasetUpdateOptions};

use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::params::{Protocol, VolumeParams};
use crate::volume::VolumeHandle;

/// Volume orchestration engine: composes appliance operations into
/// CSI-level volume lifecycle flows.
pub struct Driver {
    pub(crate) client: Client,
    pub(crate) config: DriverConfig,
}

impl Driver {
    /// Wraps an existing client. The configuration is validated eagerly;
    /// configuration failures are permanent.
    pub fn new(client: Client, config: DriverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { client, config })
    }

    /// Builds a client from the configuration and connects it.
    pub async fn connect(config: DriverConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::new(config.client.clone());
        client.connect().await?;
        Ok(Self { client, config })
    }

    /// The underlying appliance client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The driver configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Provisions a volume and returns its handle.
    ///
    /// Not idempotent: provisioning the same name twice surfaces the
    /// appliance's already-exists error on the second call.
    pub async fn create_volume(
        &self,
        name: &str,
        capacity_bytes: i64,
        params: &VolumeParams,
    ) -> Result<VolumeHandle> {
        if capacity_bytes <= 0 {
            return Err(DriverError::InvalidArgument(format!(
                "capacity must be positive, got {}",
                capacity_bytes
            )));
        }
        match params.protocol {
            Protocol::Nfs => self.create_nfs_volume(name, capacity_bytes, params).await,
            Protocol::Iscsi => self.create_iscsi_volume(name, capacity_bytes, params).await,
        }
    }

    /// Tears a volume down in reverse dependency order.
    ///
    /// Idempotent: every step treats "already gone" as success, so
    /// deleting an already-deleted volume succeeds.
    pub async fn delete_volume(&self, handle: &VolumeHandle) -> Result<()> {
        match handle {
            VolumeHandle::Nfs {
                dataset,
                mountpoint,
                ..
            } => self.delete_nfs_volume(dataset, mountpoint).await,
            VolumeHandle::Iscsi { dataset, iqn, .. } => {
                self.delete_iscsi_volume(dataset, iqn).await
            }
        }
    }

    /// Grows a volume to `new_bytes`, returning the resulting size.
    ///
    /// Expanding to the current size is a no-op; shrinking is rejected
    /// and leaves the volume unchanged.
    pub async fn expand_volume(&self, handle: &VolumeHandle, new_bytes: i64) -> Result<i64> {
        if new_bytes <= 0 {
            return Err(DriverError::InvalidArgument(format!(
                "capacity must be positive, got {}",
                new_bytes
            )));
        }

        let dataset = self.client.get_dataset(handle.dataset()).await?;
        match handle {
            VolumeHandle::Nfs { .. } => {
                let current = dataset.refquota;
                if new_bytes == current {
                    return Ok(current);
                }
                if new_bytes < current {
                    return Err(DriverError::InvalidArgument(format!(
                        "shrink not supported: {} < current {}",
                        new_bytes, current
                    )));
                }
                let updates = DatasetUpdateOptions {
                    refquota: Some(new_bytes),
                    ..Default::default()
                };
                self.client.update_dataset(&dataset.id, &updates).await?;
                Ok(new_bytes)
            }
            VolumeHandle::Iscsi { .. } => {
                let current = dataset.volsize;
                if new_bytes == current {
                    return Ok(current);
                }
                if new_bytes < current {
                    return Err(DriverError::InvalidArgument(format!(
                        "shrink not supported: {} < current {}",
                        new_bytes, current
                    )));
                }
                let block = dataset.volblocksize.filter(|b| *b > 0).unwrap_or(16_384);
                let rounded = round_up(new_bytes, block);
                let updates = DatasetUpdateOptions {
                    volsize: Some(rounded),
                    ..Default::default()
                };
                self.client.update_dataset(&dataset.id, &updates).await?;
                Ok(rounded)
            }
        }
    }

    /// Lists the volumes currently provisioned under the configured
    /// dataset prefix. Datasets missing their protocol-level publishing
    /// resources (mid-provision or mid-teardown) are skipped.
    pub async fn list_volumes(&self) -> Result<Vec<VolumeHandle>> {
        let prefix = self.dataset_prefix();
        let datasets = self.client.list_datasets(&prefix).await?;

        let mut handles = Vec::new();
        for dataset in datasets {
            match dataset.kind {
                DatasetKind::Filesystem => {
                    let mountpoint = dataset
                        .mountpoint
                        .clone()
                        .unwrap_or_else(|| format!("/mnt/{}", dataset.id));
                    match self.client.get_nfs_share_by_path(&mountpoint).await {
                        Ok(_) => handles.push(VolumeHandle::Nfs {
                            dataset: dataset.id,
                            mountpoint,
                            server: self.config.nfs_server.clone(),
                        }),
                        Err(e) if e.is_not_found() => {
                            debug!(dataset = %dataset.id, "skipping unshared dataset");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                DatasetKind::Volume => match self.resolve_iscsi_handle(&dataset.id).await? {
                    Some(handle) => handles.push(handle),
                    None => debug!(dataset = %dataset.id, "skipping unpublished zvol"),
                },
            }
        }
        Ok(handles)
    }

    /// Available bytes in the given pool, or the default pool.
    pub async fn capacity(&self, pool: Option<&str>) -> Result<i64> {
        let pool = pool.unwrap_or(&self.config.default_pool);
        Ok(self.client.available_space(pool).await?)
    }

    /// Full dataset identifier for a volume name under the configured (or
    /// parameter-overridden) pool and path prefix.
    pub(crate) fn dataset_id(&self, name: &str, params: &VolumeParams) -> Result<String> {
        if name.is_empty() {
            return Err(DriverError::InvalidArgument("volume name is empty".to_string()));
        }
        if name.contains('/') || name.contains('@') {
            return Err(DriverError::InvalidArgument(format!(
                "volume name must not contain '/' or '@': {:?}",
                name
            )));
        }
        let pool = params.pool.as_deref().unwrap_or(&self.config.default_pool);
        let path = params
            .dataset_path
            .as_deref()
            .unwrap_or(&self.config.dataset_path);
        if path.is_empty() {
            Ok(format!("{}/{}", pool, name))
        } else {
            Ok(format!("{}/{}/{}", pool, path, name))
        }
    }

    pub(crate) fn dataset_prefix(&self) -> String {
        if self.config.dataset_path.is_empty() {
            self.config.default_pool.clone()
        } else {
            format!("{}/{}", self.config.default_pool, self.config.dataset_path)
        }
    }

    /// Logs a failed rollback step. Absence never lands here (the client
    /// deletes tolerate it); anything else is leaked state a human has to
    /// clean up, so the full identifier goes into the log.
    pub(crate) fn log_rollback_failure(&self, entity: &str, id: &str, err: &DriverError) {
        tracing::error!(%entity, %id, error = %err, "rollback step failed, appliance state leaked");
    }
}

/// Rounds `bytes` up to the next multiple of `block`.
pub(crate) fn round_up(bytes: i64, block: i64) -> i64 {
    if block <= 1 {
        return bytes;
    }
    match bytes % block {
        0 => bytes,
        rem => bytes + (block - rem),
    }
}

/// Comment stamped on appliance entities this driver creates; makes
/// orphan hunting possible from the appliance UI.
pub(crate) fn provisioned_comment(name: &str) -> String {
    format!("{}: {}", crate::capabilities::DRIVER_NAME, name)
}
