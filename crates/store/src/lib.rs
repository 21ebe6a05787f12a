//! Droplet store: the versioned object store seam used by the syncer, plus an
//! in-memory implementation with the same optimistic-concurrency contract as
//! the API server.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use droplet_core::{Managed, ObjectKey, SyncError, SyncResult};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Resource;
use metrics::counter;
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tracing::debug;

/// Read and write access to one namespaced object per (kind, key).
///
/// `update` is a compare-and-swap on the resource version: it must fail with
/// [`SyncError::Conflict`] when the stored version differs from
/// `expected_version` or the object no longer exists.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get<K: Managed>(&self, key: &ObjectKey) -> SyncResult<Option<K>>;
    async fn create<K: Managed>(&self, obj: &K) -> SyncResult<K>;
    async fn update<K: Managed>(&self, obj: &K, expected_version: &str) -> SyncResult<K>;
}

/// `apps/v1/Deployment`, `v1/Service`, ...
pub fn type_key<K: Managed>() -> String {
    format!("{}/{}", K::api_version(&()), K::kind(&()))
}

#[derive(Default)]
struct Inner {
    objects: FxHashMap<(String, ObjectKey), Json>,
    last_rv: u64,
    writes: u64,
    fail_next: Option<SyncError>,
}

impl Inner {
    fn bump(&mut self) -> String {
        self.last_rv += 1;
        self.last_rv.to_string()
    }

    fn take_failure(&mut self) -> SyncResult<()> {
        match self.fail_next.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// In-memory [`ObjectStore`]. Assigns uid, creation timestamp and a
/// monotonically increasing resource version on every write.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| SyncError::Transport("memory store lock poisoned".into()))
    }

    /// Number of stored objects across all kinds.
    pub fn len(&self) -> usize {
        self.lock().map(|g| g.objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Successful create and update calls so far.
    pub fn writes(&self) -> u64 {
        self.lock().map(|g| g.writes).unwrap_or(0)
    }

    /// Make the next create or update fail with `err`.
    pub fn fail_next_write(&self, err: SyncError) {
        if let Ok(mut g) = self.lock() {
            g.fail_next = Some(err);
        }
    }

    /// Simulate another writer: bump the stored version of `key` without
    /// changing its content. Returns the new version.
    pub fn touch<K: Managed>(&self, key: &ObjectKey) -> Option<String> {
        let mut g = self.lock().ok()?;
        let slot = (type_key::<K>(), key.clone());
        if !g.objects.contains_key(&slot) {
            return None;
        }
        let rv = g.bump();
        let obj = g.objects.get_mut(&slot)?;
        obj["metadata"]["resourceVersion"] = Json::String(rv.clone());
        Some(rv)
    }

    /// Replace the stored object as another writer would, bumping its version.
    pub fn put_external<K: Managed>(&self, obj: &K) -> SyncResult<K> {
        let key = ObjectKey::of(obj);
        let mut g = self.lock()?;
        let rv = g.bump();
        let mut stored = obj.clone();
        stored.meta_mut().resource_version = Some(rv);
        let json = encode(&stored)?;
        g.objects.insert((type_key::<K>(), key), json.clone());
        decode(json)
    }

    pub fn delete<K: Managed>(&self, key: &ObjectKey) -> bool {
        self.lock()
            .map(|mut g| g.objects.remove(&(type_key::<K>(), key.clone())).is_some())
            .unwrap_or(false)
    }
}

fn encode<K: Managed>(obj: &K) -> SyncResult<Json> {
    serde_json::to_value(obj).map_err(|e| SyncError::Transport(format!("encode {}: {}", type_key::<K>(), e)))
}

fn decode<K: Managed>(json: Json) -> SyncResult<K> {
    serde_json::from_value(json).map_err(|e| SyncError::Transport(format!("decode {}: {}", type_key::<K>(), e)))
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: Managed>(&self, key: &ObjectKey) -> SyncResult<Option<K>> {
        let json = self.lock()?.objects.get(&(type_key::<K>(), key.clone())).cloned();
        json.map(decode).transpose()
    }

    async fn create<K: Managed>(&self, obj: &K) -> SyncResult<K> {
        let key = ObjectKey::of(obj);
        let tk = type_key::<K>();
        let mut g = self.lock()?;
        g.take_failure()?;
        if g.objects.contains_key(&(tk.clone(), key.clone())) {
            return Err(SyncError::Conflict(format!("{} {} already exists", K::kind(&()), key)));
        }
        let rv = g.bump();
        let mut stored = obj.clone();
        let meta = stored.meta_mut();
        meta.namespace = Some(key.namespace.clone());
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.creation_timestamp = Some(Time(chrono::Utc::now()));
        meta.resource_version = Some(rv.clone());
        let json = encode(&stored)?;
        g.objects.insert((tk.clone(), key.clone()), json.clone());
        g.writes += 1;
        counter!("store_writes_total", 1u64, "op" => "create");
        debug!(kind = %tk, key = %key, rv = %rv, "store: created");
        decode(json)
    }

    async fn update<K: Managed>(&self, obj: &K, expected_version: &str) -> SyncResult<K> {
        let key = ObjectKey::of(obj);
        let tk = type_key::<K>();
        let mut g = self.lock()?;
        g.take_failure()?;
        let Some(live) = g.objects.get(&(tk.clone(), key.clone())) else {
            return Err(SyncError::Conflict(format!("{} {} not found", K::kind(&()), key)));
        };
        let live_rv = live["metadata"]["resourceVersion"].as_str().unwrap_or_default().to_string();
        if live_rv != expected_version {
            counter!("store_conflicts_total", 1u64);
            return Err(SyncError::Conflict(format!(
                "{} {}: version {} is stale (stored {})",
                K::kind(&()),
                key,
                expected_version,
                live_rv
            )));
        }
        let uid = live["metadata"]["uid"].clone();
        let created = live["metadata"]["creationTimestamp"].clone();
        let rv = g.bump();
        let mut json = encode(obj)?;
        json["metadata"]["namespace"] = Json::String(key.namespace.clone());
        json["metadata"]["uid"] = uid;
        json["metadata"]["creationTimestamp"] = created;
        json["metadata"]["resourceVersion"] = Json::String(rv.clone());
        g.objects.insert((tk.clone(), key.clone()), json.clone());
        g.writes += 1;
        counter!("store_writes_total", 1u64, "op" => "update");
        debug!(kind = %tk, key = %key, rv = %rv, "store: updated");
        decode(json)
    }
}
