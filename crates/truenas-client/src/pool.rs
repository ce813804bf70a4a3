//! Pool queries (`pool.query`) and capacity lookups via the ZFS resource
//! interface (`zfs.resource.query`).

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::json;

use crate::client::Client;
use crate::dataset::expect_one;
use crate::error::{ClientError, Result};
use crate::property::ZfsProperty;

const METHOD_POOL_QUERY: &str = "pool.query";
const METHOD_RESOURCE_QUERY: &str = "zfs.resource.query";

/// A storage pool.
#[derive(Debug, Clone, Deserialize)]
pub struct Pool {
    /// Pool id.
    pub id: i64,
    /// Pool name.
    pub name: String,
    /// Status string, e.g. `ONLINE`.
    #[serde(default)]
    pub status: String,
    /// Whether the pool is healthy.
    #[serde(default)]
    pub healthy: bool,
    /// Total size in bytes.
    #[serde(default)]
    pub size: i64,
    /// Allocated bytes.
    #[serde(default)]
    pub allocated: i64,
    /// Free bytes.
    #[serde(default)]
    pub free: i64,
}

/// A row from the ZFS resource query interface.
#[derive(Debug, Clone, Deserialize)]
pub struct ZfsResource {
    /// Resource name (pool or dataset path).
    pub name: String,
    /// Owning pool.
    #[serde(default)]
    pub pool: String,
    /// Resource type, e.g. `pool`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Requested properties in the appliance's polymorphic shapes.
    #[serde(default)]
    pub properties: HashMap<String, ZfsProperty>,
}

impl Client {
    /// Fetches a pool by name.
    pub async fn get_pool(&self, name: &str) -> Result<Pool> {
        let pools: Vec<Pool> = self
            .call(METHOD_POOL_QUERY, json!([[["name", "=", name]]]))
            .await?;
        expect_one(pools, "pool", name)
    }

    /// Lists all pools.
    pub async fn list_pools(&self) -> Result<Vec<Pool>> {
        self.call(METHOD_POOL_QUERY, json!([[]])).await
    }

    /// Returns the available bytes in a pool.
    pub async fn available_space(&self, pool: &str) -> Result<i64> {
        let params = json!([{ "paths": [pool], "properties": ["available"] }]);
        let resources: Vec<ZfsResource> = self.call(METHOD_RESOURCE_QUERY, params).await?;
        let resource = resources
            .into_iter()
            .find(|r| r.name == pool)
            .ok_or(ClientError::NotFound)?;
        resource
            .properties
            .get("available")
            .and_then(|p| p.as_i64())
            .ok_or(ClientError::NotFound)
    }
}
