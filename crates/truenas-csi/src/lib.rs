#![warn(missing_docs)]

//! Volume orchestration engine for the TrueNAS CSI driver.
//!
//! Sits between the CSI gRPC surface (external) and the appliance client,
//! composing typed middleware operations into volume lifecycle flows:
//! provision, delete, expand, snapshot, and clone, over NFS shares or
//! iSCSI targets. Every multi-object flow is a linear state machine with
//! an explicit reverse-order rollback; a volume either ends up fully
//! published or leaves nothing behind.

pub mod capabilities;
pub mod config;
pub mod driver;
pub mod error;
mod iscsi;
mod nfs;
pub mod params;
mod snapshot;
pub mod volume;

pub use capabilities::{ControllerCapability, NodeCapability, DRIVER_NAME};
pub use config::DriverConfig;
pub use driver::Driver;
pub use error::{DriverError, Result};
pub use params::{Atime, Compression, FsType, Protocol, SyncPolicy, VolumeParams};
pub use volume::VolumeHandle;
