//! iSCSI operations: targets, extents, target-extent associations, CHAP
//! credentials, and initiator groups.
//!
//! One block volume is published through a coordinated triple: a ZVOL-backed
//! extent, a target, and the association that assigns the extent to the
//! target at a LUN. The clients here are deliberately thin; the
//! multi-object choreography lives in the orchestration layer.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::Client;
use crate::dataset::expect_one;
use crate::error::{ClientError, Result};

const METHOD_TARGET_CREATE: &str = "iscsi.target.create";
const METHOD_TARGET_QUERY: &str = "iscsi.target.query";
const METHOD_TARGET_DELETE: &str = "iscsi.target.delete";
const METHOD_EXTENT_CREATE: &str = "iscsi.extent.create";
const METHOD_EXTENT_QUERY: &str = "iscsi.extent.query";
const METHOD_EXTENT_DELETE: &str = "iscsi.extent.delete";
const METHOD_TARGETEXTENT_CREATE: &str = "iscsi.targetextent.create";
const METHOD_TARGETEXTENT_QUERY: &str = "iscsi.targetextent.query";
const METHOD_TARGETEXTENT_DELETE: &str = "iscsi.targetextent.delete";
const METHOD_AUTH_CREATE: &str = "iscsi.auth.create";
const METHOD_AUTH_QUERY: &str = "iscsi.auth.query";
const METHOD_AUTH_DELETE: &str = "iscsi.auth.delete";
const METHOD_INITIATOR_CREATE: &str = "iscsi.initiator.create";
const METHOD_INITIATOR_QUERY: &str = "iscsi.initiator.query";
const METHOD_INITIATOR_DELETE: &str = "iscsi.initiator.delete";

/// CHAP secrets must be 12 to 16 characters; the appliance enforces this
/// and we fail fast client-side with the same bounds.
const CHAP_SECRET_MIN: usize = 12;
const CHAP_SECRET_MAX: usize = 16;

/// A portal/auth/initiator grouping within a target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IscsiTargetGroup {
    /// Portal id the target listens on.
    pub portal: i64,
    /// Initiator group id allowed to connect; `None` means any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<i64>,
    /// CHAP credential id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<i64>,
    /// Authentication method: `NONE`, `CHAP`, or `CHAP_MUTUAL`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authmethod: Option<String>,
}

/// An iSCSI target. The `name` field holds only the trailing segment; the
/// full IQN is `<base>:<name>` with the base configured appliance-side.
#[derive(Debug, Clone, Deserialize)]
pub struct IscsiTarget {
    /// Target id.
    pub id: i64,
    /// Trailing IQN segment.
    pub name: String,
    /// Human-readable alias.
    #[serde(default)]
    pub alias: Option<String>,
    /// Operating mode, normally `ISCSI`.
    #[serde(default)]
    pub mode: Option<String>,
    /// Portal/auth groupings.
    #[serde(default)]
    pub groups: Vec<IscsiTargetGroup>,
}

#[derive(Debug, Serialize)]
struct IscsiTargetCreateOptions<'a> {
    name: &'a str,
    alias: &'a str,
    mode: &'static str,
    groups: Vec<IscsiTargetGroup>,
}

/// An extent: the block backing store of a LUN.
#[derive(Debug, Clone, Deserialize)]
pub struct IscsiExtent {
    /// Extent id.
    pub id: i64,
    /// Extent name.
    pub name: String,
    /// Extent type; always `DISK` for ZVOL-backed extents.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Backing disk reference, `zvol/<dataset>`.
    #[serde(default)]
    pub disk: Option<String>,
    /// Logical block size in bytes.
    #[serde(default)]
    pub blocksize: i64,
    /// Whether the extent is enabled.
    #[serde(default)]
    pub enabled: bool,
}

/// Options for `iscsi.extent.create`.
#[derive(Debug, Clone, Serialize)]
pub struct IscsiExtentCreateOptions {
    /// Extent name.
    pub name: String,
    /// Extent type; `DISK` for ZVOL backing.
    #[serde(rename = "type")]
    pub kind: String,
    /// Backing disk reference, `zvol/<dataset>`.
    pub disk: String,
    /// Logical block size in bytes.
    pub blocksize: i64,
    /// Enable immediately.
    pub enabled: bool,
}

impl IscsiExtentCreateOptions {
    /// Builds options for a ZVOL-backed DISK extent.
    pub fn disk(name: impl Into<String>, zvol: impl Into<String>, blocksize: i64) -> Self {
        Self {
            name: name.into(),
            kind: "DISK".to_string(),
            disk: zvol.into(),
            blocksize,
            enabled: true,
        }
    }
}

/// A target-extent association: extent published on target at a LUN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IscsiTargetExtent {
    /// Association id.
    pub id: i64,
    /// Target id.
    pub target: i64,
    /// Extent id.
    pub extent: i64,
    /// LUN number; unique within one target.
    pub lunid: i64,
}

/// A CHAP credential. Credentials sharing a tag form one group.
#[derive(Debug, Clone, Deserialize)]
pub struct IscsiAuth {
    /// Credential id.
    pub id: i64,
    /// Group tag; positive.
    pub tag: i64,
    /// CHAP user.
    pub user: String,
    /// CHAP secret, 12-16 characters.
    #[serde(default)]
    pub secret: String,
}

/// Options for `iscsi.auth.create`.
#[derive(Debug, Clone, Serialize)]
pub struct IscsiAuthCreateOptions {
    /// Group tag; use [`Client::next_iscsi_auth_tag`] for a fresh one.
    pub tag: i64,
    /// CHAP user.
    pub user: String,
    /// CHAP secret, 12-16 characters.
    pub secret: String,
}

/// An initiator group: IQN patterns allowed to connect.
#[derive(Debug, Clone, Deserialize)]
pub struct IscsiInitiator {
    /// Group id.
    pub id: i64,
    /// Allowed initiator IQN patterns; empty means any.
    #[serde(default)]
    pub initiators: Vec<String>,
    /// Free-form comment.
    #[serde(default)]
    pub comment: String,
}

/// Options for `iscsi.initiator.create`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IscsiInitiatorCreateOptions {
    /// Allowed initiator IQN patterns.
    pub initiators: Vec<String>,
    /// Free-form comment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Client {
    // --- targets ---

    /// Creates a target on portal 1 with no authentication.
    pub async fn create_iscsi_target(&self, name: &str, alias: &str) -> Result<IscsiTarget> {
        let opts = IscsiTargetCreateOptions {
            name,
            alias,
            mode: "ISCSI",
            groups: vec![IscsiTargetGroup {
                portal: 1,
                ..Default::default()
            }],
        };
        self.call(METHOD_TARGET_CREATE, json!([opts])).await
    }

    /// Creates a target on portal 1 with CHAP auth and an allowed-initiator
    /// group.
    pub async fn create_iscsi_target_with_auth(
        &self,
        name: &str,
        alias: &str,
        auth_tag: i64,
        initiator_id: i64,
    ) -> Result<IscsiTarget> {
        let opts = IscsiTargetCreateOptions {
            name,
            alias,
            mode: "ISCSI",
            groups: vec![IscsiTargetGroup {
                portal: 1,
                initiator: Some(initiator_id),
                auth: Some(auth_tag),
                authmethod: Some("CHAP".to_string()),
            }],
        };
        self.call(METHOD_TARGET_CREATE, json!([opts])).await
    }

    /// Fetches a target by its trailing IQN segment.
    pub async fn get_iscsi_target_by_name(&self, name: &str) -> Result<IscsiTarget> {
        let targets: Vec<IscsiTarget> = self
            .call(METHOD_TARGET_QUERY, json!([[["name", "=", name]]]))
            .await?;
        expect_one(targets, "iSCSI target", name)
    }

    /// Fetches a target by id.
    pub async fn get_iscsi_target_by_id(&self, id: i64) -> Result<IscsiTarget> {
        let targets: Vec<IscsiTarget> = self
            .call(METHOD_TARGET_QUERY, json!([[["id", "=", id]]]))
            .await?;
        expect_one(targets, "iSCSI target", &id.to_string())
    }

    /// Deletes a target, unlinking its extent associations first so the
    /// appliance does not refuse the delete. Absence is success.
    pub async fn delete_iscsi_target(&self, id: i64, force: bool) -> Result<()> {
        let associations = self.list_iscsi_target_extents(id).await?;
        for te in associations {
            self.delete_iscsi_target_extent(te.id, force).await?;
        }
        match self.call_raw(METHOD_TARGET_DELETE, json!([id, force])).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    // --- extents ---

    /// Creates an extent.
    pub async fn create_iscsi_extent(&self, opts: &IscsiExtentCreateOptions) -> Result<IscsiExtent> {
        self.call(METHOD_EXTENT_CREATE, json!([opts])).await
    }

    /// Fetches an extent by name.
    pub async fn get_iscsi_extent_by_name(&self, name: &str) -> Result<IscsiExtent> {
        let extents: Vec<IscsiExtent> = self
            .call(METHOD_EXTENT_QUERY, json!([[["name", "=", name]]]))
            .await?;
        expect_one(extents, "iSCSI extent", name)
    }

    /// Fetches the extent backed by `disk` (`zvol/<dataset>`). At most one
    /// extent exists per backing disk.
    pub async fn get_iscsi_extent_by_disk(&self, disk: &str) -> Result<IscsiExtent> {
        let extents: Vec<IscsiExtent> = self
            .call(METHOD_EXTENT_QUERY, json!([[["disk", "=", disk]]]))
            .await?;
        expect_one(extents, "iSCSI extent", disk)
    }

    /// Deletes an extent. `remove` also deletes file-backed extent data;
    /// absence is success.
    pub async fn delete_iscsi_extent(&self, id: i64, remove: bool, force: bool) -> Result<()> {
        match self
            .call_raw(METHOD_EXTENT_DELETE, json!([id, remove, force]))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    // --- target-extent associations ---

    /// Associates an extent with a target at the given LUN.
    pub async fn create_iscsi_target_extent(
        &self,
        target_id: i64,
        extent_id: i64,
        lun_id: i64,
    ) -> Result<IscsiTargetExtent> {
        let opts = json!({ "target": target_id, "extent": extent_id, "lunid": lun_id });
        self.call(METHOD_TARGETEXTENT_CREATE, json!([opts])).await
    }

    /// Fetches the association publishing `extent_id`.
    pub async fn get_iscsi_target_extent_by_extent(
        &self,
        extent_id: i64,
    ) -> Result<IscsiTargetExtent> {
        let rows: Vec<IscsiTargetExtent> = self
            .call(METHOD_TARGETEXTENT_QUERY, json!([[["extent", "=", extent_id]]]))
            .await?;
        expect_one(rows, "target-extent association", &extent_id.to_string())
    }

    /// Lists the associations of a target.
    pub async fn list_iscsi_target_extents(&self, target_id: i64) -> Result<Vec<IscsiTargetExtent>> {
        self.call(METHOD_TARGETEXTENT_QUERY, json!([[["target", "=", target_id]]]))
            .await
    }

    /// Deletes an association; absence is success.
    pub async fn delete_iscsi_target_extent(&self, id: i64, force: bool) -> Result<()> {
        match self
            .call_raw(METHOD_TARGETEXTENT_DELETE, json!([id, force]))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    // --- CHAP auth ---

    /// Creates a CHAP credential. The secret length is validated here with
    /// the appliance's own bounds so a bad secret fails before any state
    /// is created.
    pub async fn create_iscsi_auth(&self, opts: &IscsiAuthCreateOptions) -> Result<IscsiAuth> {
        let len = opts.secret.chars().count();
        if !(CHAP_SECRET_MIN..=CHAP_SECRET_MAX).contains(&len) {
            return Err(ClientError::Config(format!(
                "CHAP secret must be {}-{} characters, got {}",
                CHAP_SECRET_MIN, CHAP_SECRET_MAX, len
            )));
        }
        self.call(METHOD_AUTH_CREATE, json!([opts])).await
    }

    /// Fetches a credential by tag.
    pub async fn get_iscsi_auth_by_tag(&self, tag: i64) -> Result<IscsiAuth> {
        let rows: Vec<IscsiAuth> = self
            .call(METHOD_AUTH_QUERY, json!([[["tag", "=", tag]]]))
            .await?;
        expect_one(rows, "iSCSI auth", &tag.to_string())
    }

    /// Returns the next free credential tag: `max(existing) + 1`, or `1`
    /// when no credentials exist. Gaps in the tag sequence are not reused.
    pub async fn next_iscsi_auth_tag(&self) -> Result<i64> {
        let rows: Vec<IscsiAuth> = self.call(METHOD_AUTH_QUERY, json!([[]])).await?;
        Ok(rows.iter().map(|a| a.tag).max().unwrap_or(0) + 1)
    }

    /// Deletes a credential; absence is success.
    pub async fn delete_iscsi_auth(&self, id: i64) -> Result<()> {
        match self.call_raw(METHOD_AUTH_DELETE, json!([id])).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    // --- initiator groups ---

    /// Creates an initiator group.
    pub async fn create_iscsi_initiator(
        &self,
        opts: &IscsiInitiatorCreateOptions,
    ) -> Result<IscsiInitiator> {
        self.call(METHOD_INITIATOR_CREATE, json!([opts])).await
    }

    /// Lists all initiator groups.
    pub async fn list_iscsi_initiators(&self) -> Result<Vec<IscsiInitiator>> {
        self.call(METHOD_INITIATOR_QUERY, json!([[]])).await
    }

    /// Deletes an initiator group; absence is success.
    pub async fn delete_iscsi_initiator(&self, id: i64) -> Result<()> {
        match self.call_raw(METHOD_INITIATOR_DELETE, json!([id])).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
