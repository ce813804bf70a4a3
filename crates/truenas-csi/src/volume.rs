//! Volume handles.
//!
//! A handle is the opaque string the CSI surface round-trips between
//! operations. It encodes everything needed to later delete, expand,
//! snapshot, or publish the volume without consulting any side store:
//! the backing dataset plus the protocol-level coordinates.

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};
use crate::params::Protocol;

/// Decoded volume handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum VolumeHandle {
    /// Filesystem dataset exported over NFS.
    Nfs {
        /// Backing dataset identifier.
        dataset: String,
        /// Exported mountpoint.
        mountpoint: String,
        /// NFS server address clients mount from.
        server: String,
    },
    /// ZVOL published as an iSCSI LUN.
    Iscsi {
        /// Backing ZVOL identifier.
        dataset: String,
        /// Full target IQN.
        iqn: String,
        /// Portal (`host:port`) initiators connect to.
        portal: String,
        /// LUN number on the target.
        lun: i64,
    },
}

impl VolumeHandle {
    /// Serializes the handle into its opaque string form.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("volume handle serializes")
    }

    /// Decodes an opaque handle string.
    pub fn decode(s: &str) -> Result<Self> {
        serde_json::from_str(s)
            .map_err(|e| DriverError::InvalidArgument(format!("malformed volume handle: {}", e)))
    }

    /// The backing dataset identifier.
    pub fn dataset(&self) -> &str {
        match self {
            VolumeHandle::Nfs { dataset, .. } => dataset,
            VolumeHandle::Iscsi { dataset, .. } => dataset,
        }
    }

    /// The publishing protocol.
    pub fn protocol(&self) -> Protocol {
        match self {
            VolumeHandle::Nfs { .. } => Protocol::Nfs,
            VolumeHandle::Iscsi { .. } => Protocol::Iscsi,
        }
    }

    /// The volume name: the final segment of the backing dataset.
    pub fn name(&self) -> &str {
        self.dataset().rsplit('/').next().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nfs_round_trip() {
        let handle = VolumeHandle::Nfs {
            dataset: "tank/k8s/pvc-1234".to_string(),
            mountpoint: "/mnt/tank/k8s/pvc-1234".to_string(),
            server: "10.0.0.2".to_string(),
        };
        let decoded = VolumeHandle::decode(&handle.encode()).unwrap();
        assert_eq!(decoded, handle);
        assert_eq!(decoded.protocol(), Protocol::Nfs);
        assert_eq!(decoded.name(), "pvc-1234");
    }

    #[test]
    fn test_iscsi_round_trip() {
        let handle = VolumeHandle::Iscsi {
            dataset: "tank/k8s/pvc-5678".to_string(),
            iqn: "iqn.2005-10.org.freenas.ctl:pvc-5678".to_string(),
            portal: "10.0.0.2:3260".to_string(),
            lun: 0,
        };
        let decoded = VolumeHandle::decode(&handle.encode()).unwrap();
        assert_eq!(decoded, handle);
        assert_eq!(decoded.protocol(), Protocol::Iscsi);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(VolumeHandle::decode("").is_err());
        assert!(VolumeHandle::decode("not json").is_err());
        assert!(VolumeHandle::decode(r#"{"protocol":"smb"}"#).is_err());
        assert!(VolumeHandle::decode(r#"{"protocol":"nfs"}"#).is_err());
    }

    #[test]
    fn test_encoded_form_carries_protocol_tag() {
        let handle = VolumeHandle::Nfs {
            dataset: "tank/k8s/v".to_string(),
            mountpoint: "/mnt/tank/k8s/v".to_string(),
            server: "nas".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&handle.encode()).unwrap();
        assert_eq!(value["protocol"], "nfs");
    }
}
