//! Driver configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use truenas_client::ClientConfig;

use crate::error::{DriverError, Result};

/// Default dataset path prefix under the pool.
pub const DEFAULT_DATASET_PATH: &str = "k8s";
/// Default IQN base; targets publish as `<base>:<volume-name>`.
pub const DEFAULT_IQN_BASE: &str = "iqn.2005-10.org.freenas.ctl";

/// Configuration for the [`Driver`](crate::Driver).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Appliance connection settings.
    pub client: ClientConfig,
    /// Pool used when a storage class names none.
    pub default_pool: String,
    /// Path prefix under the pool for provisioned datasets.
    pub dataset_path: String,
    /// Address NFS clients mount from.
    pub nfs_server: String,
    /// `host:port` iSCSI initiators connect to.
    pub iscsi_portal: String,
    /// IQN base for published targets.
    pub iscsi_iqn_base: String,
    /// Hosts allowed on provisioned NFS shares; empty means unrestricted.
    pub nfs_allowed_hosts: Vec<String>,
    /// Networks (CIDR) allowed on provisioned NFS shares.
    pub nfs_allowed_networks: Vec<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            default_pool: String::new(),
            dataset_path: DEFAULT_DATASET_PATH.to_string(),
            nfs_server: String::new(),
            iscsi_portal: String::new(),
            iscsi_iqn_base: DEFAULT_IQN_BASE.to_string(),
            nfs_allowed_hosts: Vec::new(),
            nfs_allowed_networks: Vec::new(),
        }
    }
}

impl DriverConfig {
    /// Loads configuration from a TOML or JSON file, dispatched on the
    /// file extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: DriverConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: DriverConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("unsupported config file extension: {}", ext),
        }
    }

    /// Validates the configuration. Failures are permanent.
    pub fn validate(&self) -> Result<()> {
        self.client.validate().map_err(DriverError::Client)?;
        if self.default_pool.is_empty() {
            return Err(DriverError::InvalidArgument(
                "default pool is not configured".to_string(),
            ));
        }
        if self.default_pool.contains('/') {
            return Err(DriverError::InvalidArgument(format!(
                "pool name must not contain '/': {:?}",
                self.default_pool
            )));
        }
        if self.dataset_path.starts_with('/') || self.dataset_path.ends_with('/') {
            return Err(DriverError::InvalidArgument(format!(
                "dataset path must not begin or end with '/': {:?}",
                self.dataset_path
            )));
        }
        Ok(())
    }
}
