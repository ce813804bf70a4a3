//! Stateful fake appliance for orchestration tests.
//!
//! Sits on top of the mock server's dynamic-response hook and models just
//! enough middleware behaviour for end-to-end flows: datasets, NFS
//! shares, the iSCSI triple, snapshots with clone dependencies, and
//! per-method failure injection.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};
use truenas_client::mock::{MockResponse, MockServer};

const AVAILABLE_BYTES: i64 = 500_000_000_000;

#[derive(Default)]
pub struct FakeState {
    pub datasets: HashMap<String, Value>,
    pub shares: HashMap<i64, Value>,
    pub extents: HashMap<i64, Value>,
    pub targets: HashMap<i64, Value>,
    pub targetextents: HashMap<i64, Value>,
    pub snapshots: HashMap<String, Value>,
    /// clone dataset id -> origin snapshot id
    pub clones: HashMap<String, String>,
    next_id: i64,
    fail_methods: HashSet<String>,
}

impl FakeState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone)]
pub struct FakeAppliance {
    state: Arc<Mutex<FakeState>>,
}

impl FakeAppliance {
    /// Wires a fresh fake into the mock server's response hook.
    pub fn install(mock: &MockServer) -> Self {
        let fake = Self {
            state: Arc::new(Mutex::new(FakeState::default())),
        };
        let state = Arc::clone(&fake.state);
        mock.set_response_fn(move |method, params| handle(&state, method, params));
        fake
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Forces every call to `method` to fail until cleared.
    pub fn fail_method(&self, method: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_methods
            .insert(method.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().fail_methods.clear();
    }

    pub fn has_dataset(&self, id: &str) -> bool {
        self.state().datasets.contains_key(id)
    }

    pub fn has_share_for_path(&self, path: &str) -> bool {
        self.state()
            .shares
            .values()
            .any(|s| s["path"].as_str() == Some(path))
    }

    pub fn has_extent_for_disk(&self, disk: &str) -> bool {
        self.state()
            .extents
            .values()
            .any(|e| e["disk"].as_str() == Some(disk))
    }

    pub fn has_target_named(&self, name: &str) -> bool {
        self.state()
            .targets
            .values()
            .any(|t| t["name"].as_str() == Some(name))
    }

    pub fn has_snapshot(&self, id: &str) -> bool {
        self.state().snapshots.contains_key(id)
    }

    pub fn counts(&self) -> (usize, usize, usize, usize, usize) {
        let s = self.state();
        (
            s.datasets.len(),
            s.shares.len(),
            s.extents.len(),
            s.targets.len(),
            s.targetextents.len(),
        )
    }
}

fn handle(state: &Mutex<FakeState>, method: &str, params: &Value) -> MockResponse {
    let mut s = state.lock().unwrap();
    if s.fail_methods.contains(method) {
        return MockResponse::err(-1, format!("injected failure: {}", method));
    }

    match method {
        "pool.dataset.create" => dataset_create(&mut s, &params[0]),
        "pool.dataset.get_instance" => {
            let id = params[0].as_str().unwrap_or_default();
            match s.datasets.get(id) {
                Some(ds) => MockResponse::ok(ds.clone()),
                None => MockResponse::err(-6, format!("dataset {} does not exist", id)),
            }
        }
        "pool.dataset.query" => {
            let rows = filter_rows(s.datasets.values(), &params[0]);
            MockResponse::ok(rows)
        }
        "pool.dataset.update" => dataset_update(&mut s, params),
        "pool.dataset.delete" => dataset_delete(&mut s, params),
        "sharing.nfs.create" => share_create(&mut s, &params[0]),
        "sharing.nfs.query" => {
            let rows = filter_rows(s.shares.values(), &params[0]);
            MockResponse::ok(rows)
        }
        "sharing.nfs.delete" => {
            let id = params[0].as_i64().unwrap_or_default();
            match s.shares.remove(&id) {
                Some(_) => MockResponse::ok(true),
                None => MockResponse::err(-6, "share not found"),
            }
        }
        "iscsi.extent.create" => extent_create(&mut s, &params[0]),
        "iscsi.extent.query" => {
            let rows = filter_rows(s.extents.values(), &params[0]);
            MockResponse::ok(rows)
        }
        "iscsi.extent.delete" => {
            let id = params[0].as_i64().unwrap_or_default();
            match s.extents.remove(&id) {
                Some(_) => MockResponse::ok(true),
                None => MockResponse::err(-6, "extent not found"),
            }
        }
        "iscsi.target.create" => target_create(&mut s, &params[0]),
        "iscsi.target.query" => {
            let rows = filter_rows(s.targets.values(), &params[0]);
            MockResponse::ok(rows)
        }
        "iscsi.target.delete" => {
            let id = params[0].as_i64().unwrap_or_default();
            match s.targets.remove(&id) {
                Some(_) => MockResponse::ok(true),
                None => MockResponse::err(-6, "target not found"),
            }
        }
        "iscsi.targetextent.create" => targetextent_create(&mut s, &params[0]),
        "iscsi.targetextent.query" => {
            let rows = filter_rows(s.targetextents.values(), &params[0]);
            MockResponse::ok(rows)
        }
        "iscsi.targetextent.delete" => {
            let id = params[0].as_i64().unwrap_or_default();
            match s.targetextents.remove(&id) {
                Some(_) => MockResponse::ok(true),
                None => MockResponse::err(-6, "targetextent not found"),
            }
        }
        "zfs.snapshot.create" => snapshot_create(&mut s, &params[0]),
        "zfs.snapshot.query" => {
            let rows = filter_rows(s.snapshots.values(), &params[0]);
            MockResponse::ok(rows)
        }
        "zfs.snapshot.delete" => snapshot_delete(&mut s, params),
        "zfs.snapshot.clone" => snapshot_clone(&mut s, &params[0]),
        "zfs.resource.query" => {
            let pool = params[0]["paths"][0].as_str().unwrap_or("tank");
            MockResponse::ok(json!([{
                "name": pool,
                "pool": pool,
                "type": "pool",
                "properties": {"available": {"value": AVAILABLE_BYTES}},
            }]))
        }
        "pool.query" => MockResponse::ok(json!([{
            "id": 1,
            "name": "tank",
            "status": "ONLINE",
            "healthy": true,
            "size": 1_000_000_000_000i64,
            "allocated": 500_000_000_000i64,
            "free": AVAILABLE_BYTES,
        }])),
        _ => MockResponse::ok(Value::Null),
    }
}

fn dataset_create(s: &mut FakeState, opts: &Value) -> MockResponse {
    let id = opts["name"].as_str().unwrap_or_default().to_string();
    if s.datasets.contains_key(&id) {
        return MockResponse::err(-1, format!("dataset {} already exists", id));
    }
    let kind = opts["type"].as_str().unwrap_or("FILESYSTEM").to_string();
    let ds = build_dataset(&id, &kind, opts);
    s.datasets.insert(id, ds.clone());
    MockResponse::ok(ds)
}

fn build_dataset(id: &str, kind: &str, opts: &Value) -> Value {
    let name = id.rsplit('/').next().unwrap_or(id);
    let pool = id.split('/').next().unwrap_or(id);
    let mut ds = json!({
        "id": id,
        "name": name,
        "pool": pool,
        "type": kind,
        "used": {"parsed": 0},
        "available": {"parsed": AVAILABLE_BYTES},
    });
    if kind == "FILESYSTEM" {
        ds["mountpoint"] = json!(format!("/mnt/{}", id));
        ds["refquota"] = json!({"parsed": opts["refquota"].as_i64().unwrap_or(0)});
    } else {
        ds["volsize"] = json!({"parsed": opts["volsize"].as_i64().unwrap_or(0)});
        ds["volblocksize"] = json!({"parsed": 16384});
    }
    ds
}

fn dataset_update(s: &mut FakeState, params: &Value) -> MockResponse {
    let id = params[0].as_str().unwrap_or_default();
    let updates = &params[1];
    let Some(ds) = s.datasets.get_mut(id) else {
        return MockResponse::err(-6, format!("dataset {} does not exist", id));
    };
    if let Some(refquota) = updates["refquota"].as_i64() {
        ds["refquota"] = json!({"parsed": refquota});
    }
    if let Some(volsize) = updates["volsize"].as_i64() {
        ds["volsize"] = json!({"parsed": volsize});
    }
    MockResponse::ok(ds.clone())
}

fn dataset_delete(s: &mut FakeState, params: &Value) -> MockResponse {
    let id = params[0].as_str().unwrap_or_default().to_string();
    let recursive = params[1]["recursive"].as_bool().unwrap_or(false);
    if !s.datasets.contains_key(&id) {
        return MockResponse::err(-6, format!("dataset {} does not exist", id));
    }
    s.datasets.remove(&id);
    s.clones.remove(&id);
    if recursive {
        let prefix = format!("{}/", id);
        s.datasets.retain(|k, _| !k.starts_with(&prefix));
        s.snapshots
            .retain(|k, _| !k.starts_with(&prefix) && !k.starts_with(&format!("{}@", id)));
    }
    MockResponse::ok(true)
}

fn share_create(s: &mut FakeState, opts: &Value) -> MockResponse {
    let path = opts["path"].as_str().unwrap_or_default().to_string();
    if s.shares.values().any(|sh| sh["path"].as_str() == Some(&path)) {
        return MockResponse::err(-1, format!("share for {} already exists", path));
    }
    let id = s.next_id();
    let mut share = opts.clone();
    share["id"] = json!(id);
    if share.get("enabled").is_none() {
        share["enabled"] = json!(true);
    }
    s.shares.insert(id, share.clone());
    MockResponse::ok(share)
}

fn extent_create(s: &mut FakeState, opts: &Value) -> MockResponse {
    let disk = opts["disk"].as_str().unwrap_or_default().to_string();
    if s.extents.values().any(|e| e["disk"].as_str() == Some(&disk)) {
        return MockResponse::err(-1, format!("extent for {} already exists", disk));
    }
    let id = s.next_id();
    let mut extent = opts.clone();
    extent["id"] = json!(id);
    s.extents.insert(id, extent.clone());
    MockResponse::ok(extent)
}

fn target_create(s: &mut FakeState, opts: &Value) -> MockResponse {
    let name = opts["name"].as_str().unwrap_or_default().to_string();
    if s.targets.values().any(|t| t["name"].as_str() == Some(&name)) {
        return MockResponse::err(-1, format!("target {} already exists", name));
    }
    let id = s.next_id();
    let mut target = opts.clone();
    target["id"] = json!(id);
    s.targets.insert(id, target.clone());
    MockResponse::ok(target)
}

fn targetextent_create(s: &mut FakeState, opts: &Value) -> MockResponse {
    let target = opts["target"].as_i64().unwrap_or_default();
    let lunid = opts["lunid"].as_i64().unwrap_or_default();
    let clash = s
        .targetextents
        .values()
        .any(|te| te["target"].as_i64() == Some(target) && te["lunid"].as_i64() == Some(lunid));
    if clash {
        return MockResponse::err(-1, format!("LUN {} in use on target {}", lunid, target));
    }
    let id = s.next_id();
    let mut te = opts.clone();
    te["id"] = json!(id);
    s.targetextents.insert(id, te.clone());
    MockResponse::ok(te)
}

fn snapshot_create(s: &mut FakeState, opts: &Value) -> MockResponse {
    let dataset = opts["dataset"].as_str().unwrap_or_default().to_string();
    let name = opts["name"].as_str().unwrap_or_default().to_string();
    if !s.datasets.contains_key(&dataset) {
        return MockResponse::err(-6, format!("dataset {} does not exist", dataset));
    }
    let id = format!("{}@{}", dataset, name);
    if s.snapshots.contains_key(&id) {
        return MockResponse::err(-1, format!("snapshot {} already exists", id));
    }
    let snap = json!({ "id": id, "dataset": dataset, "name": name });
    s.snapshots.insert(id, snap.clone());
    MockResponse::ok(snap)
}

fn snapshot_delete(s: &mut FakeState, params: &Value) -> MockResponse {
    let id = params[0].as_str().unwrap_or_default().to_string();
    if !s.snapshots.contains_key(&id) {
        return MockResponse::err(-6, format!("snapshot {} does not exist", id));
    }
    if s.clones.values().any(|origin| origin == &id) {
        return MockResponse::err(-1, format!("snapshot {} has dependent clones", id));
    }
    s.snapshots.remove(&id);
    MockResponse::ok(true)
}

fn snapshot_clone(s: &mut FakeState, opts: &Value) -> MockResponse {
    let snapshot = opts["snapshot"].as_str().unwrap_or_default().to_string();
    let dst = opts["dataset_dst"].as_str().unwrap_or_default().to_string();
    if !s.snapshots.contains_key(&snapshot) {
        return MockResponse::err(-6, format!("snapshot {} does not exist", snapshot));
    }
    if s.datasets.contains_key(&dst) {
        return MockResponse::err(-1, format!("dataset {} already exists", dst));
    }
    let origin_dataset = snapshot.split('@').next().unwrap_or_default();
    let kind = s
        .datasets
        .get(origin_dataset)
        .and_then(|d| d["type"].as_str())
        .unwrap_or("FILESYSTEM")
        .to_string();
    let origin = s.datasets.get(origin_dataset).cloned().unwrap_or(json!({}));
    let ds = build_dataset(&dst, &kind, &origin);
    s.datasets.insert(dst.clone(), ds);
    s.clones.insert(dst, snapshot);
    MockResponse::ok(Value::Null)
}

/// Applies middleware-style query filters `[[field, op, value], ...]` to
/// a set of rows. Supports `=` and the `^` (starts-with) operator.
fn filter_rows<'a>(rows: impl Iterator<Item = &'a Value>, filters: &Value) -> Vec<Value> {
    let filters = filters.as_array().cloned().unwrap_or_default();
    rows.filter(|row| {
        filters.iter().all(|f| {
            let field = f[0].as_str().unwrap_or_default();
            let op = f[1].as_str().unwrap_or("=");
            let expected = &f[2];
            let actual = &row[field];
            match op {
                "^" => match (actual.as_str(), expected.as_str()) {
                    (Some(a), Some(e)) => a.starts_with(e),
                    _ => false,
                },
                _ => actual == expected,
            }
        })
    })
    .cloned()
    .collect()
}
