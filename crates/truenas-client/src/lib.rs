#![warn(missing_docs)]

//! Async client for the TrueNAS middleware API (JSON-RPC 2.0 over WebSocket).
//!
//! This crate provides the appliance-facing half of the CSI driver:
//! - A single authenticated WebSocket connection with request multiplexing
//! - Session lifecycle: API-key login, keepalive pings, reconnect with backoff
//! - Typed wrappers for datasets, NFS shares, iSCSI targets/extents/
//!   associations/auth/initiators, snapshots, snapshot tasks, and pools
//! - A mock appliance server for integration testing
//!
//! All durable state lives on the appliance; the client caches nothing
//! across calls.

pub mod client;
pub mod config;
pub mod dataset;
pub mod error;
pub mod iscsi;
pub mod mock;
pub mod nfs;
pub mod pool;
pub mod property;
pub mod rpc;
pub mod snapshot;
mod tls;
pub mod transport;

pub use client::Client;
pub use config::ClientConfig;
pub use dataset::{
    pool_of, Dataset, DatasetCreateOptions, DatasetDeleteOptions, DatasetKind,
    DatasetUpdateOptions, EncryptionOptions,
};
pub use error::{ClientError, ConnOp, Result, RpcError};
pub use iscsi::{
    IscsiAuth, IscsiAuthCreateOptions, IscsiExtent, IscsiExtentCreateOptions, IscsiInitiator,
    IscsiInitiatorCreateOptions, IscsiTarget, IscsiTargetExtent, IscsiTargetGroup,
};
pub use nfs::{NfsShare, NfsShareCreateOptions, NfsShareUpdateOptions};
pub use pool::{Pool, ZfsResource};
pub use property::ZfsProperty;
pub use snapshot::{Snapshot, SnapshotTask, SnapshotTaskCreateOptions, SnapshotTaskSchedule};
