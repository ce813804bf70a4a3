//! Storage-class parameter parsing.
//!
//! The orchestrator receives a flat string map from the CSI surface;
//! this module turns it into a typed [`VolumeParams`], rejecting unknown
//! enum values up front so a bad storage class fails before any appliance
//! state is created.

use std::collections::HashMap;

use crate::error::{DriverError, Result};

/// Default ZVOL block size when a storage class names none.
pub const DEFAULT_VOLBLOCKSIZE: &str = "16K";

/// Recognized parameter keys.
const KEY_PROTOCOL: &str = "protocol";
const KEY_POOL: &str = "pool";
const KEY_DATASET_PATH: &str = "datasetPath";
const KEY_COMPRESSION: &str = "compression";
const KEY_SYNC: &str = "sync";
const KEY_ATIME: &str = "atime";
const KEY_RECORDSIZE: &str = "recordsize";
const KEY_VOLBLOCKSIZE: &str = "volblocksize";
const KEY_FS_TYPE: &str = "fsType";
const KEY_SPARSE: &str = "sparse";
const KEY_NFS_EXPORT_OPTIONS: &str = "nfsExportOptions";

/// Publishing protocol of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Filesystem dataset exported over NFS.
    Nfs,
    /// ZVOL published as an iSCSI LUN.
    Iscsi,
}

impl Protocol {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "nfs" => Ok(Protocol::Nfs),
            "iscsi" => Ok(Protocol::Iscsi),
            other => Err(DriverError::InvalidArgument(format!(
                "protocol must be nfs or iscsi, got {:?}",
                other
            ))),
        }
    }
}

/// Dataset compression setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression.
    Off,
    /// LZ4.
    Lz4,
    /// Gzip.
    Gzip,
    /// Zstandard.
    Zstd,
}

impl Compression {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "off" => Ok(Compression::Off),
            "lz4" => Ok(Compression::Lz4),
            "gzip" => Ok(Compression::Gzip),
            "zstd" => Ok(Compression::Zstd),
            other => Err(DriverError::InvalidArgument(format!(
                "compression must be off, lz4, gzip, or zstd, got {:?}",
                other
            ))),
        }
    }

    /// The appliance's uppercase enum value.
    pub fn appliance_value(self) -> &'static str {
        match self {
            Compression::Off => "OFF",
            Compression::Lz4 => "LZ4",
            Compression::Gzip => "GZIP",
            Compression::Zstd => "ZSTD",
        }
    }
}

/// Dataset sync policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// POSIX-compliant sync behaviour.
    Standard,
    /// Every write is synchronous.
    Always,
    /// Sync requests are ignored.
    Disabled,
}

impl SyncPolicy {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "standard" => Ok(SyncPolicy::Standard),
            "always" => Ok(SyncPolicy::Always),
            "disabled" => Ok(SyncPolicy::Disabled),
            other => Err(DriverError::InvalidArgument(format!(
                "sync must be standard, always, or disabled, got {:?}",
                other
            ))),
        }
    }

    /// The appliance's uppercase enum value.
    pub fn appliance_value(self) -> &'static str {
        match self {
            SyncPolicy::Standard => "STANDARD",
            SyncPolicy::Always => "ALWAYS",
            SyncPolicy::Disabled => "DISABLED",
        }
    }
}

/// Access-time updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Atime {
    /// Record access times.
    On,
    /// Skip access-time updates.
    Off,
}

impl Atime {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "on" => Ok(Atime::On),
            "off" => Ok(Atime::Off),
            other => Err(DriverError::InvalidArgument(format!(
                "atime must be on or off, got {:?}",
                other
            ))),
        }
    }

    /// The appliance's uppercase enum value.
    pub fn appliance_value(self) -> &'static str {
        match self {
            Atime::On => "ON",
            Atime::Off => "OFF",
        }
    }
}

/// Filesystem created on iSCSI volumes by the node side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsType {
    /// ext4 (default).
    #[default]
    Ext4,
    /// XFS.
    Xfs,
}

impl FsType {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "ext4" => Ok(FsType::Ext4),
            "xfs" => Ok(FsType::Xfs),
            other => Err(DriverError::InvalidArgument(format!(
                "fsType must be ext4 or xfs, got {:?}",
                other
            ))),
        }
    }
}

/// Typed storage-class parameters.
#[derive(Debug, Clone)]
pub struct VolumeParams {
    /// Publishing protocol; required.
    pub protocol: Protocol,
    /// Pool override; falls back to the driver's default pool.
    pub pool: Option<String>,
    /// Dataset path override; falls back to the driver's dataset path.
    pub dataset_path: Option<String>,
    /// Compression, passed through to dataset creation.
    pub compression: Option<Compression>,
    /// Sync policy, passed through to dataset creation.
    pub sync: Option<SyncPolicy>,
    /// Access-time updates (NFS).
    pub atime: Option<Atime>,
    /// Record size for filesystems, e.g. `128K` (NFS).
    pub recordsize: Option<String>,
    /// ZVOL block size, e.g. `16K` (iSCSI).
    pub volblocksize: String,
    /// Filesystem for the node side to create (iSCSI).
    pub fs_type: FsType,
    /// Thin-provision the ZVOL (iSCSI).
    pub sparse: bool,
    /// Opaque NFS export options handed to the node-side mounter.
    pub nfs_export_options: Option<String>,
}

impl VolumeParams {
    /// Parses the flat string map handed over by the CSI surface.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let protocol = map
            .get(KEY_PROTOCOL)
            .map(|s| Protocol::parse(s))
            .transpose()?
            .ok_or_else(|| {
                DriverError::InvalidArgument(format!("missing required parameter {:?}", KEY_PROTOCOL))
            })?;

        let volblocksize = match map.get(KEY_VOLBLOCKSIZE) {
            Some(s) => {
                let bytes = parse_size(s)?;
                if !is_power_of_two(bytes) || !(512..=131_072).contains(&bytes) {
                    return Err(DriverError::InvalidArgument(format!(
                        "volblocksize must be a power of two between 512 and 128K, got {:?}",
                        s
                    )));
                }
                s.clone()
            }
            None => DEFAULT_VOLBLOCKSIZE.to_string(),
        };

        if let Some(s) = map.get(KEY_RECORDSIZE) {
            let bytes = parse_size(s)?;
            if !is_power_of_two(bytes) {
                return Err(DriverError::InvalidArgument(format!(
                    "recordsize must be a power of two, got {:?}",
                    s
                )));
            }
        }

        let sparse = match map.get(KEY_SPARSE) {
            Some(s) => match s.as_str() {
                "true" => true,
                "false" => false,
                other => {
                    return Err(DriverError::InvalidArgument(format!(
                        "sparse must be true or false, got {:?}",
                        other
                    )))
                }
            },
            None => false,
        };

        Ok(Self {
            protocol,
            pool: map.get(KEY_POOL).cloned(),
            dataset_path: map.get(KEY_DATASET_PATH).cloned(),
            compression: map
                .get(KEY_COMPRESSION)
                .map(|s| Compression::parse(s))
                .transpose()?,
            sync: map.get(KEY_SYNC).map(|s| SyncPolicy::parse(s)).transpose()?,
            atime: map.get(KEY_ATIME).map(|s| Atime::parse(s)).transpose()?,
            recordsize: map.get(KEY_RECORDSIZE).cloned(),
            volblocksize,
            fs_type: map
                .get(KEY_FS_TYPE)
                .map(|s| FsType::parse(s))
                .transpose()?
                .unwrap_or_default(),
            sparse,
            nfs_export_options: map.get(KEY_NFS_EXPORT_OPTIONS).cloned(),
        })
    }

    /// Parameters for a bare protocol with defaults for everything else.
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            pool: None,
            dataset_path: None,
            compression: None,
            sync: None,
            atime: None,
            recordsize: None,
            volblocksize: DEFAULT_VOLBLOCKSIZE.to_string(),
            fs_type: FsType::default(),
            sparse: false,
            nfs_export_options: None,
        }
    }

    /// ZVOL block size in bytes.
    pub fn volblocksize_bytes(&self) -> i64 {
        // Validated at parse time; the default always parses.
        parse_size(&self.volblocksize).unwrap_or(16_384)
    }
}

fn is_power_of_two(n: i64) -> bool {
    n > 0 && n & (n - 1) == 0
}

/// Parses a size string: plain bytes (`4096`) or with a binary suffix
/// (`16K`, `1M`).
pub(crate) fn parse_size(s: &str) -> Result<i64> {
    let s = s.trim();
    let (digits, multiplier) = match s.chars().last() {
        Some('K') | Some('k') => (&s[..s.len() - 1], 1024i64),
        Some('M') | Some('m') => (&s[..s.len() - 1], 1024 * 1024),
        Some('G') | Some('g') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    digits
        .parse::<i64>()
        .ok()
        .filter(|n| *n > 0)
        .map(|n| n * multiplier)
        .ok_or_else(|| DriverError::InvalidArgument(format!("invalid size {:?}", s)))
}
