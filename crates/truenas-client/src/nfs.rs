//! NFS share operations (`sharing.nfs.*`).
//!
//! The appliance keeps at most one share per exported path; the by-path
//! lookup leans on that invariant.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::Client;
use crate::dataset::{absent_to_not_found, expect_one};
use crate::error::Result;

const METHOD_CREATE: &str = "sharing.nfs.create";
const METHOD_GET: &str = "sharing.nfs.get_instance";
const METHOD_QUERY: &str = "sharing.nfs.query";
const METHOD_UPDATE: &str = "sharing.nfs.update";
const METHOD_DELETE: &str = "sharing.nfs.delete";

/// An NFS share as reported by the appliance.
#[derive(Debug, Clone, Deserialize)]
pub struct NfsShare {
    /// Share id.
    pub id: i64,
    /// Exported path; equals the mountpoint of the backing dataset.
    pub path: String,
    /// Free-form comment.
    #[serde(default)]
    pub comment: String,
    /// Allowed hosts; empty means unrestricted.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Allowed networks in CIDR form; empty means unrestricted.
    #[serde(default)]
    pub networks: Vec<String>,
    /// User that root is mapped to.
    #[serde(default)]
    pub maproot_user: Option<String>,
    /// Group that root is mapped to.
    #[serde(default)]
    pub maproot_group: Option<String>,
    /// Export as read-only.
    #[serde(default)]
    pub ro: bool,
    /// Whether the share is enabled.
    #[serde(default)]
    pub enabled: bool,
}

/// Options for `sharing.nfs.create`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NfsShareCreateOptions {
    /// Path to export; must be a dataset mountpoint.
    pub path: String,
    /// Free-form comment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Allowed hosts.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    /// Allowed networks in CIDR form.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    /// Map root to this user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maproot_user: Option<String>,
    /// Map root to this group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maproot_group: Option<String>,
    /// Export read-only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ro: Option<bool>,
    /// Enable the share immediately.
    pub enabled: bool,
}

/// Options for `sharing.nfs.update`. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NfsShareUpdateOptions {
    /// New comment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// New allowed hosts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<String>>,
    /// New allowed networks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub networks: Option<Vec<String>>,
    /// Enable or disable the share.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl Client {
    /// Creates an NFS share.
    pub async fn create_nfs_share(&self, opts: &NfsShareCreateOptions) -> Result<NfsShare> {
        self.call(METHOD_CREATE, json!([opts])).await
    }

    /// Fetches a share by id.
    pub async fn get_nfs_share(&self, id: i64) -> Result<NfsShare> {
        self.call(METHOD_GET, json!([id]))
            .await
            .map_err(absent_to_not_found)
    }

    /// Fetches the share exporting `path`.
    ///
    /// Returns [`crate::ClientError::NotFound`] when no share exports the
    /// path. The appliance allows at most one share per path; should the
    /// query return more anyway, the first match wins and a warning is
    /// logged.
    pub async fn get_nfs_share_by_path(&self, path: &str) -> Result<NfsShare> {
        let shares: Vec<NfsShare> = self
            .call(METHOD_QUERY, json!([[["path", "=", path]]]))
            .await?;
        expect_one(shares, "NFS share", path)
    }

    /// Lists all shares.
    pub async fn list_nfs_shares(&self) -> Result<Vec<NfsShare>> {
        self.call(METHOD_QUERY, json!([[]])).await
    }

    /// Applies in-place updates to a share.
    pub async fn update_nfs_share(&self, id: i64, updates: &NfsShareUpdateOptions) -> Result<()> {
        self.call_raw(METHOD_UPDATE, json!([id, updates])).await?;
        Ok(())
    }

    /// Deletes a share; absence is success.
    pub async fn delete_nfs_share(&self, id: i64) -> Result<()> {
        match self.call_raw(METHOD_DELETE, json!([id])).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
