//! Snapshot operations (`zfs.snapshot.*`) and periodic snapshot tasks
//! (`pool.snapshottask.*`).
//!
//! Snapshots are keyed `dataset@name`. Deleting a snapshot that clones
//! still depend on is refused by the appliance; that error is surfaced
//! unchanged so callers know to delete the clones first.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::Client;
use crate::dataset::{absent_to_not_found, expect_one, Dataset};
use crate::error::Result;
use crate::property::prop_opt_i64;

const METHOD_CREATE: &str = "zfs.snapshot.create";
const METHOD_QUERY: &str = "zfs.snapshot.query";
const METHOD_DELETE: &str = "zfs.snapshot.delete";
const METHOD_CLONE: &str = "zfs.snapshot.clone";

const METHOD_TASK_CREATE: &str = "pool.snapshottask.create";
const METHOD_TASK_GET: &str = "pool.snapshottask.get_instance";
const METHOD_TASK_QUERY: &str = "pool.snapshottask.query";
const METHOD_TASK_DELETE: &str = "pool.snapshottask.delete";

/// A snapshot as reported by the appliance.
#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    /// Full identifier, `dataset@name`.
    pub id: String,
    /// Dataset the snapshot was taken of.
    pub dataset: String,
    /// Snapshot name (the part after `@`).
    pub name: String,
    /// Creation time, seconds since epoch, when the appliance reports it.
    #[serde(default, deserialize_with = "prop_opt_i64")]
    pub creation: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SnapshotCreateOptions<'a> {
    dataset: &'a str,
    name: &'a str,
    recursive: bool,
}

/// Cron-style schedule of a periodic snapshot task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTaskSchedule {
    /// Minute field.
    pub minute: String,
    /// Hour field.
    pub hour: String,
    /// Day-of-month field.
    pub dom: String,
    /// Month field.
    pub month: String,
    /// Day-of-week field.
    pub dow: String,
}

/// A periodic snapshot task.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotTask {
    /// Task id.
    pub id: i64,
    /// Dataset snapshotted by the task.
    pub dataset: String,
    /// How long task-created snapshots are kept.
    pub lifetime_value: i64,
    /// Unit for the lifetime, e.g. `DAY`.
    pub lifetime_unit: String,
    /// Whether the task is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Snapshot naming schema, e.g. `auto-%Y-%m-%d_%H-%M`.
    #[serde(default)]
    pub naming_schema: Option<String>,
    /// Schedule; absent in some query projections.
    #[serde(default)]
    pub schedule: Option<SnapshotTaskSchedule>,
}

/// Options for `pool.snapshottask.create`.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotTaskCreateOptions {
    /// Dataset to snapshot.
    pub dataset: String,
    /// Keep snapshots for this many `lifetime_unit`s.
    pub lifetime_value: i64,
    /// Lifetime unit, e.g. `DAY`.
    pub lifetime_unit: String,
    /// Enable immediately.
    pub enabled: bool,
    /// Snapshot naming schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub naming_schema: Option<String>,
    /// Include child datasets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recursive: Option<bool>,
    /// When to run.
    pub schedule: SnapshotTaskSchedule,
}

impl Client {
    /// Creates a snapshot `dataset@name`, optionally recursing into child
    /// datasets.
    pub async fn create_snapshot(
        &self,
        dataset: &str,
        name: &str,
        recursive: bool,
    ) -> Result<Snapshot> {
        let opts = SnapshotCreateOptions {
            dataset,
            name,
            recursive,
        };
        self.call(METHOD_CREATE, json!([opts]))
            .await
            .map_err(absent_to_not_found)
    }

    /// Fetches a snapshot by its `dataset@name` identifier.
    pub async fn get_snapshot(&self, id: &str) -> Result<Snapshot> {
        let rows: Vec<Snapshot> = self
            .call(METHOD_QUERY, json!([[["id", "=", id]]]))
            .await?;
        expect_one(rows, "snapshot", id)
    }

    /// Lists the snapshots of one dataset.
    pub async fn list_snapshots(&self, dataset: &str) -> Result<Vec<Snapshot>> {
        self.call(METHOD_QUERY, json!([[["dataset", "=", dataset]]]))
            .await
    }

    /// Lists every snapshot on the appliance.
    pub async fn list_all_snapshots(&self) -> Result<Vec<Snapshot>> {
        self.call(METHOD_QUERY, json!([[]])).await
    }

    /// Finds a snapshot by bare name across all datasets. Returns
    /// `Ok(None)` when nothing matches; more than one match returns the
    /// first.
    pub async fn find_snapshot_by_name(&self, name: &str) -> Result<Option<Snapshot>> {
        let mut rows: Vec<Snapshot> = self
            .call(METHOD_QUERY, json!([[["name", "=", name]]]))
            .await?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.remove(0)))
        }
    }

    /// Deletes a snapshot.
    ///
    /// Absence is success. A snapshot with dependent clones cannot be
    /// deleted; the appliance's error is returned unchanged and the caller
    /// must delete the clones first.
    pub async fn delete_snapshot(&self, id: &str) -> Result<()> {
        match self.call_raw(METHOD_DELETE, json!([id])).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Clones a snapshot to a new dataset and returns the clone.
    pub async fn clone_snapshot(&self, snapshot_id: &str, target: &str) -> Result<Dataset> {
        let opts = json!({ "snapshot": snapshot_id, "dataset_dst": target });
        self.call_raw(METHOD_CLONE, json!([opts]))
            .await
            .map_err(absent_to_not_found)?;
        self.get_dataset(target).await
    }

    // --- periodic snapshot tasks ---

    /// Creates a periodic snapshot task.
    pub async fn create_snapshot_task(
        &self,
        opts: &SnapshotTaskCreateOptions,
    ) -> Result<SnapshotTask> {
        self.call(METHOD_TASK_CREATE, json!([opts])).await
    }

    /// Fetches a task by id.
    pub async fn get_snapshot_task(&self, id: i64) -> Result<SnapshotTask> {
        self.call(METHOD_TASK_GET, json!([id]))
            .await
            .map_err(absent_to_not_found)
    }

    /// Fetches the task covering `dataset`.
    pub async fn get_snapshot_task_by_dataset(&self, dataset: &str) -> Result<SnapshotTask> {
        let rows: Vec<SnapshotTask> = self
            .call(METHOD_TASK_QUERY, json!([[["dataset", "=", dataset]]]))
            .await?;
        expect_one(rows, "snapshot task", dataset)
    }

    /// Deletes a task; absence is success. With `fixate_removal_date`,
    /// snapshots already created by the task get their retention pinned
    /// instead of becoming immortal.
    pub async fn delete_snapshot_task(&self, id: i64, fixate_removal_date: bool) -> Result<()> {
        let opts = json!({ "fixate_removal_date": fixate_removal_date });
        match self.call_raw(METHOD_TASK_DELETE, json!([id, opts])).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_decodes() {
        let snap: Snapshot = serde_json::from_value(serde_json::json!({
            "id": "tank/data@snap1",
            "dataset": "tank/data",
            "name": "snap1",
        }))
        .unwrap();
        assert_eq!(snap.id, "tank/data@snap1");
        assert!(snap.creation.is_none());

        let snap: Snapshot = serde_json::from_value(serde_json::json!({
            "id": "tank/data@snap2",
            "dataset": "tank/data",
            "name": "snap2",
            "creation": {"parsed": 1720000000i64},
        }))
        .unwrap();
        assert_eq!(snap.creation, Some(1720000000));
    }

    #[test]
    fn test_create_options_carry_recursive_flag() {
        let opts = SnapshotCreateOptions {
            dataset: "tank",
            name: "recursive-snap",
            recursive: true,
        };
        let value = serde_json::to_value(&opts).unwrap();
        assert_eq!(value["recursive"], serde_json::json!(true));
    }
}
