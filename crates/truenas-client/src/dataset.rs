//! Dataset operations (`pool.dataset.*`).
//!
//! Datasets are keyed by slash-delimited identifiers (`pool/a/b`); the
//! first path segment is always the pool name. Numeric properties decode
//! through [`crate::property`] since the appliance wraps them
//! inconsistently.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::Client;
use crate::error::{ClientError, Result};
use crate::property::{prop_i64, prop_opt_i64, prop_opt_string};

const METHOD_CREATE: &str = "pool.dataset.create";
const METHOD_GET: &str = "pool.dataset.get_instance";
const METHOD_QUERY: &str = "pool.dataset.query";
const METHOD_UPDATE: &str = "pool.dataset.update";
const METHOD_DELETE: &str = "pool.dataset.delete";

/// Whether a dataset is a filesystem or a block volume (ZVOL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatasetKind {
    /// Mountable filesystem dataset.
    Filesystem,
    /// Block volume backing an iSCSI extent.
    Volume,
}

/// A dataset as reported by the appliance.
#[derive(Debug, Clone, Deserialize)]
pub struct Dataset {
    /// Full slash-delimited identifier, e.g. `tank/k8s/pvc-1234`.
    pub id: String,
    /// Final path segment.
    pub name: String,
    /// Pool the dataset lives in.
    pub pool: String,
    /// Filesystem or volume.
    #[serde(rename = "type")]
    pub kind: DatasetKind,
    /// Mountpoint for filesystems; volumes have none.
    #[serde(default)]
    pub mountpoint: Option<String>,
    /// Bytes used.
    #[serde(default, deserialize_with = "prop_i64")]
    pub used: i64,
    /// Bytes available.
    #[serde(default, deserialize_with = "prop_i64")]
    pub available: i64,
    /// Referenced quota in bytes; zero when unset.
    #[serde(default, deserialize_with = "prop_i64")]
    pub refquota: i64,
    /// Volume size in bytes; zero for filesystems.
    #[serde(default, deserialize_with = "prop_i64")]
    pub volsize: i64,
    /// Volume block size in bytes; volumes only.
    #[serde(default, deserialize_with = "prop_opt_i64")]
    pub volblocksize: Option<i64>,
    /// Compression setting, e.g. `lz4`.
    #[serde(default, deserialize_with = "prop_opt_string")]
    pub compression: Option<String>,
    /// Sync policy, e.g. `standard`.
    #[serde(default, deserialize_with = "prop_opt_string")]
    pub sync: Option<String>,
    /// Record size for filesystems, e.g. `128K`.
    #[serde(default, deserialize_with = "prop_opt_string")]
    pub recordsize: Option<String>,
    /// Free-form comment.
    #[serde(default, deserialize_with = "prop_opt_string")]
    pub comments: Option<String>,
    /// Whether the dataset is encrypted.
    #[serde(default)]
    pub encrypted: bool,
}

/// Encryption parameters for dataset creation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EncryptionOptions {
    /// Generate a random key on the appliance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_key: Option<bool>,
    /// Passphrase-derived key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    /// Cipher, e.g. `AES-256-GCM`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

/// Options for `pool.dataset.create`. Unset fields are omitted from the
/// wire payload; the appliance rejects explicit nulls for several of them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetCreateOptions {
    /// Full identifier of the dataset to create.
    pub name: String,
    /// `FILESYSTEM` (default on the appliance) or `VOLUME`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<DatasetKind>,
    /// Volume size in bytes; required for volumes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volsize: Option<i64>,
    /// Volume block size, e.g. `16K`; volumes only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volblocksize: Option<String>,
    /// Thin-provision the volume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse: Option<bool>,
    /// Referenced quota in bytes; filesystems only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refquota: Option<i64>,
    /// Record size, e.g. `128K`; filesystems only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recordsize: Option<String>,
    /// Compression, e.g. `LZ4`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    /// Sync policy: `STANDARD`, `ALWAYS`, or `DISABLED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<String>,
    /// Access-time updates: `ON` or `OFF`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atime: Option<String>,
    /// Free-form comment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    /// Enable encryption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<bool>,
    /// Key material when encryption is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_options: Option<EncryptionOptions>,
    /// Inherit encryption from the parent instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherit_encryption: Option<bool>,
}

/// Options for `pool.dataset.update`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetUpdateOptions {
    /// New referenced quota in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refquota: Option<i64>,
    /// New volume size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volsize: Option<i64>,
    /// New comment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

/// Options for `pool.dataset.delete`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DatasetDeleteOptions {
    /// Delete children and snapshots too.
    pub recursive: bool,
    /// Force unmount of busy filesystems.
    pub force: bool,
}

/// Returns the pool name (first path segment) of a dataset identifier.
pub fn pool_of(path: &str) -> &str {
    match path.find('/') {
        Some(idx) => &path[..idx],
        None => path,
    }
}

impl Client {
    /// Creates a dataset (filesystem or volume).
    pub async fn create_dataset(&self, opts: &DatasetCreateOptions) -> Result<Dataset> {
        self.call(METHOD_CREATE, json!([opts])).await
    }

    /// Fetches a dataset by its full identifier.
    pub async fn get_dataset(&self, id: &str) -> Result<Dataset> {
        self.call(METHOD_GET, json!([id]))
            .await
            .map_err(absent_to_not_found)
    }

    /// Lists datasets whose identifier starts with `prefix/`.
    pub async fn list_datasets(&self, prefix: &str) -> Result<Vec<Dataset>> {
        let filter = json!([[["id", "^", format!("{}/", prefix)]]]);
        self.call(METHOD_QUERY, filter).await
    }

    /// Applies in-place updates to a dataset.
    pub async fn update_dataset(&self, id: &str, updates: &DatasetUpdateOptions) -> Result<()> {
        self.call_raw(METHOD_UPDATE, json!([id, updates])).await?;
        Ok(())
    }

    /// Deletes a dataset. Absence is treated as success so teardown can
    /// be re-executed after a partial prior run.
    pub async fn delete_dataset(&self, id: &str, opts: &DatasetDeleteOptions) -> Result<()> {
        match self.call_raw(METHOD_DELETE, json!([id, opts])).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Collapses the appliance's assorted absence signals into the sentinel.
pub(crate) fn absent_to_not_found(e: ClientError) -> ClientError {
    if e.is_not_found() {
        ClientError::NotFound
    } else {
        e
    }
}

/// Picks the single row a unique-key query should have returned.
///
/// An empty result set maps to [`ClientError::NotFound`]. More than one
/// row violates an appliance-side uniqueness invariant; the first match
/// wins deterministically and the violation is logged.
pub(crate) fn expect_one<T>(mut rows: Vec<T>, what: &str, key: &str) -> Result<T> {
    match rows.len() {
        0 => Err(ClientError::NotFound),
        1 => Ok(rows.remove(0)),
        n => {
            tracing::warn!(%key, count = n, "multiple {} rows for unique key, using first", what);
            Ok(rows.remove(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_of() {
        assert_eq!(pool_of("tank"), "tank");
        assert_eq!(pool_of("tank/dataset"), "tank");
        assert_eq!(pool_of("tank/dataset/sub"), "tank");
        assert_eq!(pool_of("pool/a/b/c/d"), "pool");
        assert_eq!(pool_of(""), "");
    }

    #[test]
    fn test_create_options_omit_unset_fields() {
        let opts = DatasetCreateOptions {
            name: "tank/test".to_string(),
            refquota: Some(10000),
            ..Default::default()
        };
        let value = serde_json::to_value(&opts).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("name"));
        assert!(obj.contains_key("refquota"));
        assert!(!obj.contains_key("type"));
        assert!(!obj.contains_key("encryption"));
        assert!(!obj.contains_key("volsize"));
    }

    #[test]
    fn test_dataset_decodes_wrapped_properties() {
        let dataset: Dataset = serde_json::from_value(serde_json::json!({
            "id": "tank/test",
            "name": "test",
            "pool": "tank",
            "type": "FILESYSTEM",
            "mountpoint": "/mnt/tank/test",
            "used": {"parsed": 1000},
            "available": {"parsed": 5000},
            "refquota": {"parsed": 10000},
        }))
        .unwrap();
        assert_eq!(dataset.kind, DatasetKind::Filesystem);
        assert_eq!(dataset.used, 1000);
        assert_eq!(dataset.available, 5000);
        assert_eq!(dataset.refquota, 10000);
        assert_eq!(dataset.volsize, 0);
    }

    #[test]
    fn test_zvol_decodes() {
        let dataset: Dataset = serde_json::from_value(serde_json::json!({
            "id": "tank/vol",
            "name": "vol",
            "pool": "tank",
            "type": "VOLUME",
            "volsize": {"parsed": 1073741824i64},
        }))
        .unwrap();
        assert_eq!(dataset.kind, DatasetKind::Volume);
        assert_eq!(dataset.volsize, 1073741824);
        assert!(dataset.mountpoint.is_none());
    }

    #[test]
    fn test_expect_one() {
        assert!(matches!(
            expect_one(Vec::<i32>::new(), "share", "p"),
            Err(ClientError::NotFound)
        ));
        assert_eq!(expect_one(vec![7], "share", "p").unwrap(), 7);
        assert_eq!(expect_one(vec![7, 8], "share", "p").unwrap(), 7);
    }
}
