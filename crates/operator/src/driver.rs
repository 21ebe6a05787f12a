//! Reconciliation driver: bring every child object of one droplet in line
//! with its spec, one syncer at a time.

use std::time::Instant;

use droplet_core::{Managed, ObjectKey, OwnerRef, SyncError, SyncOutcome, SyncResult};
use droplet_store::ObjectStore;
use droplet_syncer::{EventSink, ObjectSyncer};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::Resource;
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use crate::build::stub;
use crate::component::Component;
use crate::config::ReconcileConfig;
use crate::types::Droplet;
use crate::{defaults, drupal, nginx};

/// One child object as left by a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub component: &'static str,
    pub key: ObjectKey,
    pub outcome: SyncOutcome,
    pub object: Json,
}

/// Reconcile all children of `droplet`. Stops at the first failing syncer
/// and returns its error unchanged.
pub async fn reconcile<S, E>(store: &S, events: &E, cfg: &ReconcileConfig, droplet: &Droplet) -> SyncResult<Vec<Step>>
where
    S: ObjectStore,
    E: EventSink + ?Sized,
{
    let started = Instant::now();
    let res = run(store, events, cfg, droplet).await;
    histogram!("reconcile_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
    counter!("reconcile_total", 1u64);
    match &res {
        Ok(steps) => {
            let writes = steps.iter().filter(|s| s.outcome.is_write()).count();
            info!(droplet = %ObjectKey::of(droplet), steps = steps.len(), writes, "driver: reconciled");
        }
        Err(e) => {
            counter!("reconcile_errors_total", 1u64, "error" => e.kind().as_str());
            warn!(droplet = %ObjectKey::of(droplet), error = %e, retryable = e.is_retryable(), "driver: failed");
        }
    }
    res
}

async fn run<S, E>(store: &S, events: &E, cfg: &ReconcileConfig, droplet: &Droplet) -> SyncResult<Vec<Step>>
where
    S: ObjectStore,
    E: EventSink + ?Sized,
{
    let mut d = droplet.clone();
    defaults::apply(&mut d);
    defaults::validate(&d)?;
    let owner = OwnerRef::from_resource(&d).ok_or_else(|| SyncError::mutation("droplet has no uid"))?;
    let d = &d;
    let mut s = Steps { syncer: ObjectSyncer::new(store, events), owner: &owner, droplet: d, done: Vec::new() };

    let secret = s.step::<Secret, _>(Component::DrupalSecret, |o| drupal::secret(o, d, cfg)).await?;
    let secret_version = secret.meta().resource_version.clone().unwrap_or_default();
    s.step::<ConfigMap, _>(Component::DrupalConfigMap, |o| drupal::config_map(o, d, cfg)).await?;
    s.step::<Deployment, _>(Component::DrupalDeployment, |o| drupal::deployment(o, d, cfg, &secret_version)).await?;
    s.step::<Service, _>(Component::DrupalService, |o| drupal::service(o, d, cfg)).await?;
    s.step::<CronJob, _>(Component::DrupalCron, |o| drupal::cron(o, d, cfg)).await?;
    if cfg.upgrade_jobs {
        s.step::<Job, _>(Component::DrupalDbUpgrade, |o| drupal::upgrade_job(o, d, cfg)).await?;
    }

    s.step::<ConfigMap, _>(Component::NginxConfigMap, |o| nginx::config_map(o, d, cfg)).await?;
    s.step::<Deployment, _>(Component::NginxDeployment, |o| nginx::deployment(o, d, cfg)).await?;
    s.step::<Service, _>(Component::NginxService, |o| nginx::service(o, d, cfg)).await?;
    s.step::<Ingress, _>(Component::Ingress, |o| nginx::ingress(o, d, cfg)).await?;

    if d.spec.drupal.code.as_ref().map_or(false, |c| c.persistent_volume_claim.is_some()) {
        s.step::<PersistentVolumeClaim, _>(Component::DrupalCodePvc, |o| drupal::code_pvc(o, d, cfg)).await?;
    }
    if d.spec.drupal.media.as_ref().map_or(false, |m| m.persistent_volume_claim.is_some()) {
        s.step::<PersistentVolumeClaim, _>(Component::DrupalMediaPvc, |o| drupal::media_pvc(o, d, cfg)).await?;
    }
    Ok(s.done)
}

struct Steps<'a, S, E: ?Sized> {
    syncer: ObjectSyncer<'a, S, E>,
    owner: &'a OwnerRef,
    droplet: &'a Droplet,
    done: Vec<Step>,
}

impl<'a, S, E> Steps<'a, S, E>
where
    S: ObjectStore,
    E: EventSink + ?Sized,
{
    async fn step<K, F>(&mut self, component: Component, mutate: F) -> SyncResult<K>
    where
        K: Managed + Default,
        F: FnOnce(&mut K) -> SyncResult<()> + Send,
    {
        let kind_name = component.kind_name();
        let obj: K = stub(self.droplet, component);
        let synced = self.syncer.sync(Some(self.owner), kind_name, obj, mutate).await?;
        let object = serde_json::to_value(&synced.object).map_err(SyncError::mutation)?;
        debug!(kind = kind_name, outcome = %synced.outcome, "driver: step done");
        self.done.push(Step { component: kind_name, key: ObjectKey::of(&synced.object), outcome: synced.outcome, object });
        Ok(synced.object)
    }
}
