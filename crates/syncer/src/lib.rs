//! Droplet syncer: reconcile one managed object against its desired state.
//!
//! One [`ObjectSyncer::sync`] call reads the object, claims it for the owner,
//! applies the caller's mutation and writes at most once: a create when the
//! object is new, an update guarded by the previously read resource version
//! when it drifted. The outcome is reported to the owner through an
//! [`EventSink`].

#![forbid(unsafe_code)]

use std::time::Instant;

use droplet_core::{controller_of, Managed, ObjectKey, OwnerRef, SyncError, SyncOutcome, SyncResult};
use droplet_store::ObjectStore;
use kube::Resource;
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

pub mod events;

pub use events::{EventSink, EventType, NullSink, RecordedEvent, RecordingSink};

/// Result of a successful sync: what happened and the object as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Synced<K> {
    pub outcome: SyncOutcome,
    pub object: K,
}

pub struct ObjectSyncer<'a, S, E: ?Sized> {
    store: &'a S,
    events: &'a E,
}

impl<'a, S, E> ObjectSyncer<'a, S, E>
where
    S: ObjectStore,
    E: EventSink + ?Sized,
{
    pub fn new(store: &'a S, events: &'a E) -> Self {
        Self { store, events }
    }

    /// Reconcile the object identified by `stub`.
    ///
    /// `kind_name` labels events, logs and metrics only. `mutate` receives the
    /// live object (or `stub` when absent) and must be idempotent. Dropping the
    /// returned future before completion never leaves a partial write.
    pub async fn sync<K, F>(&self, owner: Option<&OwnerRef>, kind_name: &str, stub: K, mutate: F) -> SyncResult<Synced<K>>
    where
        K: Managed,
        F: FnOnce(&mut K) -> SyncResult<()> + Send,
    {
        let started = Instant::now();
        let key = ObjectKey::of(&stub);
        let res = self.run(owner, &key, stub, mutate).await;
        histogram!("sync_latency_ms", started.elapsed().as_secs_f64() * 1000.0);

        let outcome = match &res {
            Ok(s) => {
                counter!("sync_total", 1u64, "kind" => kind_name.to_string(), "outcome" => s.outcome.verb());
                if s.outcome.is_write() {
                    info!(kind = kind_name, key = %key, outcome = %s.outcome, "sync: ok");
                } else {
                    debug!(kind = kind_name, key = %key, "sync: unchanged");
                }
                s.outcome.clone()
            }
            Err(e) => {
                counter!("sync_total", 1u64, "kind" => kind_name.to_string(), "outcome" => "failed");
                counter!("sync_errors_total", 1u64, "kind" => kind_name.to_string(), "error" => e.kind().as_str());
                warn!(kind = kind_name, key = %key, error = %e, retryable = e.is_retryable(), "sync: failed");
                SyncOutcome::Failed(e.to_string())
            }
        };

        if let Some(owner) = owner {
            if let Some((type_, reason, message)) = events::describe(&events::qualified_kind::<K>(), kind_name, &key, &outcome) {
                self.events.record(owner, type_, &reason, &message);
            }
        }
        res
    }

    async fn run<K, F>(&self, owner: Option<&OwnerRef>, key: &ObjectKey, stub: K, mutate: F) -> SyncResult<Synced<K>>
    where
        K: Managed,
        F: FnOnce(&mut K) -> SyncResult<()> + Send,
    {
        let live = self.store.get::<K>(key).await?;
        let exists = live.is_some();
        let mut obj = live.unwrap_or(stub);
        let previous = obj.clone();

        if let Some(owner) = owner {
            claim(&mut obj, owner)?;
        }
        mutate(&mut obj)?;

        if exists && obj == previous {
            return Ok(Synced { outcome: SyncOutcome::Unchanged, object: previous });
        }
        if !exists {
            let object = self.store.create(&obj).await?;
            return Ok(Synced { outcome: SyncOutcome::Created, object });
        }
        let version = previous.meta().resource_version.clone().unwrap_or_default();
        let object = self.store.update(&obj, &version).await?;
        Ok(Synced { outcome: SyncOutcome::Updated, object })
    }
}

/// Attach `owner` as the controller of `obj`. Fails when another parent
/// already controls it.
pub fn claim<K: Managed>(obj: &mut K, owner: &OwnerRef) -> SyncResult<()> {
    if let Some(current) = controller_of(obj.meta()) {
        if owner.matches(current) {
            return Ok(());
        }
        return Err(SyncError::NotPermitted(format!(
            "{} {} is already controlled by {} {}",
            K::kind(&()),
            ObjectKey::of(&*obj),
            current.kind,
            current.name
        )));
    }
    obj.meta_mut()
        .owner_references
        .get_or_insert_with(Vec::new)
        .push(owner.controller_reference());
    Ok(())
}
