//! Controller wiring: watch droplets and their children, run the driver,
//! report status.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use droplet_core::{Managed, SyncError, SyncResult};
use droplet_kubehub::{classify, KubeEventSink, KubeStore};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::Client;
use rand::Rng;
use serde_json::{json, Value as Json};
use tracing::{debug, info, warn};

use crate::component::Component;
use crate::config::Settings;
use crate::driver::{self, Step};
use crate::types::{Droplet, DropletStatus};

pub const CONTROLLER_NAME: &str = "droplet-controller";

pub struct Context {
    pub client: Client,
    pub store: KubeStore,
    pub events: KubeEventSink,
    pub settings: Settings,
}

impl Context {
    pub fn new(client: Client, settings: Settings) -> Self {
        Self {
            store: KubeStore::new(client.clone()),
            events: KubeEventSink::new(client.clone(), CONTROLLER_NAME),
            client,
            settings,
        }
    }
}

fn scoped<K: Managed>(client: &Client, namespace: Option<&str>) -> Api<K> {
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run until SIGINT/SIGTERM.
pub async fn run(client: Client, settings: Settings) -> Result<()> {
    let ns = settings.namespace.clone();
    let ns = ns.as_deref();
    let droplets: Api<Droplet> = scoped(&client, ns);
    droplets
        .list(&ListParams::default().limit(1))
        .await
        .context("listing droplets; is the Droplet CRD installed?")?;

    info!(namespace = ns.unwrap_or("*"), requeue_secs = settings.requeue_secs, "controller: starting");
    let ctx = Arc::new(Context::new(client.clone(), settings.clone()));
    Controller::new(droplets, WatcherConfig::default())
        .owns(scoped::<Secret>(&client, ns), WatcherConfig::default())
        .owns(scoped::<ConfigMap>(&client, ns), WatcherConfig::default())
        .owns(scoped::<Deployment>(&client, ns), WatcherConfig::default())
        .owns(scoped::<Service>(&client, ns), WatcherConfig::default())
        .owns(scoped::<CronJob>(&client, ns), WatcherConfig::default())
        .owns(scoped::<Job>(&client, ns), WatcherConfig::default())
        .owns(scoped::<PersistentVolumeClaim>(&client, ns), WatcherConfig::default())
        .owns(scoped::<Ingress>(&client, ns), WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(droplet = %obj, "controller: reconciled"),
                Err(e) => warn!(error = %e, "controller: reconcile error"),
            }
        })
        .await;
    info!("controller: stopped");
    Ok(())
}

async fn reconcile(droplet: Arc<Droplet>, ctx: Arc<Context>) -> SyncResult<Action> {
    if droplet.metadata.deletion_timestamp.is_some() {
        // Children go with the owner references.
        return Ok(Action::await_change());
    }
    let cfg = ctx.settings.reconcile_config();
    let steps = driver::reconcile(&ctx.store, &ctx.events, &cfg, &droplet).await?;
    update_status(&ctx.client, &droplet, &steps).await?;
    Ok(Action::requeue(Duration::from_secs(ctx.settings.requeue_secs)))
}

fn error_policy(droplet: Arc<Droplet>, err: &SyncError, ctx: Arc<Context>) -> Action {
    if !err.is_retryable() {
        warn!(droplet = droplet.name(), error = %err, "controller: waiting for a spec change");
        return Action::await_change();
    }
    let base = Duration::from_secs(ctx.settings.retry_secs);
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 5));
    debug!(droplet = droplet.name(), error = %err, delay_ms = (base + jitter).as_millis() as u64, "controller: retrying");
    Action::requeue(base + jitter)
}

/// Replica count reported by the drupal deployment in this pass.
pub fn observed_replicas(steps: &[Step]) -> i32 {
    steps
        .iter()
        .find(|s| s.component == Component::DrupalDeployment.kind_name())
        .and_then(|s| s.object.pointer("/status/replicas"))
        .and_then(Json::as_i64)
        .unwrap_or(0) as i32
}

async fn update_status(client: &Client, droplet: &Droplet, steps: &[Step]) -> SyncResult<()> {
    let status = DropletStatus { replicas: observed_replicas(steps) };
    if droplet.status.as_ref() == Some(&status) {
        return Ok(());
    }
    let api: Api<Droplet> = Api::namespaced(client.clone(), droplet.ns());
    let patch = json!({ "status": status });
    api.patch_status(droplet.name(), &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(classify)?;
    Ok(())
}
