//! Mutation functions for the drupal tier. Each one is idempotent and only
//! touches the fields it owns.

use std::collections::BTreeMap;

use droplet_core::labels;
use droplet_core::{is_new, SyncError, SyncResult};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, PersistentVolumeClaimSpec, Secret, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::build::{merge_template, set_labels, set_selector};
use crate::component::{drupal_pod_labels, selector_labels, Component};
use crate::config::ReconcileConfig;
use crate::pod::{self, DRUPAL_PORT};
use crate::templates;
use crate::types::Droplet;

pub const SECRET_VERSION_ANNOTATION: &str = "drupal.sylus.ca/secretVersion";

const SALTS: [&str; 8] = [
    "AUTH_KEY",
    "SECURE_AUTH_KEY",
    "LOGGED_IN_KEY",
    "NONCE_KEY",
    "AUTH_SALT",
    "SECURE_AUTH_SALT",
    "LOGGED_IN_SALT",
    "NONCE_SALT",
];
const SALT_LEN: usize = 64;

const CRON_CMD: [&str; 4] = ["crond", "-f", "-d", "8"];
const UPGRADE_CMD: [&str; 3] = ["/bin/sh", "-c", "drush updatedb && drush cr all"];

fn random_salt() -> ByteString {
    let s: String = rand::thread_rng().sample_iter(&Alphanumeric).take(SALT_LEN).map(char::from).collect();
    ByteString(s.into_bytes())
}

/// Generated salts. Existing values are never regenerated.
pub fn secret(out: &mut Secret, d: &Droplet, cfg: &ReconcileConfig) -> SyncResult<()> {
    set_labels(&mut out.metadata, Component::DrupalSecret, d, cfg);
    let data = out.data.get_or_insert_with(BTreeMap::new);
    for name in SALTS {
        if data.get(name).map_or(true, |v| v.0.is_empty()) {
            data.insert(name.to_string(), random_salt());
        }
    }
    Ok(())
}

pub fn config_map(out: &mut ConfigMap, d: &Droplet, cfg: &ReconcileConfig) -> SyncResult<()> {
    set_labels(&mut out.metadata, Component::DrupalConfigMap, d, cfg);
    out.data
        .get_or_insert_with(BTreeMap::new)
        .insert(templates::SETTINGS_KEY.to_string(), templates::drupal_settings(d));
    Ok(())
}

/// Web deployment. `secret_version` is stamped on the pod template so a salt
/// change rolls the pods.
pub fn deployment(out: &mut Deployment, d: &Droplet, cfg: &ReconcileConfig, secret_version: &str) -> SyncResult<()> {
    set_labels(&mut out.metadata, Component::DrupalDeployment, d, cfg);

    let mut template = pod::drupal(d);
    template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(SECRET_VERSION_ANNOTATION.to_string(), secret_version.to_string());

    let spec = out.spec.get_or_insert_with(Default::default);
    set_selector(&out.metadata, &mut spec.selector, &selector_labels(&drupal_pod_labels(d)), "deployment selector")?;
    merge_template(&mut spec.template, template)?;
    if let Some(replicas) = d.spec.drupal.replicas {
        spec.replicas = Some(replicas);
    }
    Ok(())
}

/// Single `http` port in front of php-fpm.
pub fn service(out: &mut Service, d: &Droplet, cfg: &ReconcileConfig) -> SyncResult<()> {
    set_labels(&mut out.metadata, Component::DrupalService, d, cfg);
    let selector = selector_labels(&drupal_pod_labels(d));
    let fresh = is_new(&out.metadata);
    let spec = out.spec.get_or_insert_with(Default::default);
    set_service_selector(fresh, &mut spec.selector, selector)?;
    set_single_port(&mut spec.ports, DRUPAL_PORT, DRUPAL_PORT);
    Ok(())
}

pub(crate) fn set_service_selector(
    fresh: bool,
    current: &mut Option<BTreeMap<String, String>>,
    desired: BTreeMap<String, String>,
) -> SyncResult<()> {
    if labels::equals(current.as_ref(), Some(&desired)) {
        return Ok(());
    }
    if !fresh {
        return Err(SyncError::immutable("service selector"));
    }
    *current = Some(desired);
    Ok(())
}

/// Keep one port, preserving store-defaulted fields such as the protocol.
pub(crate) fn set_single_port(ports: &mut Option<Vec<ServicePort>>, port: i32, target: i32) {
    let ports = ports.get_or_insert_with(Vec::new);
    if ports.len() != 1 {
        *ports = vec![ServicePort::default()];
    }
    let p = &mut ports[0];
    p.name = Some("http".into());
    p.port = port;
    p.target_port = Some(IntOrString::Int(target));
}

pub fn cron(out: &mut CronJob, d: &Droplet, cfg: &ReconcileConfig) -> SyncResult<()> {
    set_labels(&mut out.metadata, Component::DrupalCron, d, cfg);
    let spec = out.spec.get_or_insert_with(Default::default);
    spec.schedule = "* * * * *".into();
    spec.concurrency_policy = Some("Forbid".into());
    spec.starting_deadline_seconds = Some(10);
    spec.successful_jobs_history_limit = Some(3);
    spec.failed_jobs_history_limit = Some(1);

    let job = &mut spec.job_template;
    job.metadata.get_or_insert_with(Default::default).labels =
        Some(labels::merge(None, &[&Component::DrupalCron.labels(d), &cfg.controller_labels]));
    let job_spec = job.spec.get_or_insert_with(Default::default);
    job_spec.backoff_limit = Some(0);
    job_spec.active_deadline_seconds = Some(10);
    merge_template(&mut job_spec.template, pod::drupal_job(d, &CRON_CMD))
}

/// Database upgrade for the current tag. Job specs are immutable, so only a
/// new job is populated.
pub fn upgrade_job(out: &mut Job, d: &Droplet, cfg: &ReconcileConfig) -> SyncResult<()> {
    set_labels(&mut out.metadata, Component::DrupalDbUpgrade, d, cfg);
    if !is_new(&out.metadata) {
        return Ok(());
    }
    let spec = out.spec.get_or_insert_with(Default::default);
    spec.backoff_limit = Some(0);
    spec.active_deadline_seconds = Some(10);
    merge_template(&mut spec.template, pod::drupal_job(d, &UPGRADE_CMD))
}

fn claim(out: &mut PersistentVolumeClaim, want: Option<&PersistentVolumeClaimSpec>, field: &str) -> SyncResult<()> {
    let want = want.ok_or_else(|| SyncError::mutation(format!(".spec.{}.persistentVolumeClaim is not defined", field)))?;
    match out.spec.as_ref() {
        Some(live) if *live != PersistentVolumeClaimSpec::default() => {
            if claim_drifted(live, want) {
                return Err(SyncError::immutable(format!("{} claim spec", field)));
            }
        }
        _ => out.spec = Some(want.clone()),
    }
    Ok(())
}

/// Whether a field the droplet sets differs on the live claim. Fields the
/// droplet leaves unset (a defaulted storage class) are not compared.
fn claim_drifted(live: &PersistentVolumeClaimSpec, want: &PersistentVolumeClaimSpec) -> bool {
    fn differs<T: PartialEq>(want: Option<&T>, live: Option<&T>) -> bool {
        want.is_some() && want != live
    }
    let requests = |s: &PersistentVolumeClaimSpec| s.resources.as_ref().and_then(|r| r.requests.clone());
    differs(requests(want).as_ref(), requests(live).as_ref())
        || differs(want.access_modes.as_ref(), live.access_modes.as_ref())
        || differs(want.storage_class_name.as_ref(), live.storage_class_name.as_ref())
        || differs(want.volume_mode.as_ref(), live.volume_mode.as_ref())
}

pub fn code_pvc(out: &mut PersistentVolumeClaim, d: &Droplet, cfg: &ReconcileConfig) -> SyncResult<()> {
    set_labels(&mut out.metadata, Component::DrupalCodePvc, d, cfg);
    let want = d.spec.drupal.code.as_ref().and_then(|c| c.persistent_volume_claim.as_ref());
    claim(out, want, "code")
}

pub fn media_pvc(out: &mut PersistentVolumeClaim, d: &Droplet, cfg: &ReconcileConfig) -> SyncResult<()> {
    set_labels(&mut out.metadata, Component::DrupalMediaPvc, d, cfg);
    let want = d.spec.drupal.media.as_ref().and_then(|m| m.persistent_volume_claim.as_ref());
    claim(out, want, "media")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::stub;
    use crate::defaults;
    use crate::types::DropletSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn droplet() -> Droplet {
        let mut d = Droplet::new("example", DropletSpec { domains: vec!["example.com".into()], ..Default::default() });
        d.metadata.namespace = Some("default".into());
        defaults::apply(&mut d);
        d
    }

    fn persisted<K: kube::Resource>(mut obj: K) -> K {
        obj.meta_mut().creation_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        obj
    }

    #[test]
    fn secret_fills_missing_salts_only() {
        let d = droplet();
        let cfg = ReconcileConfig::default();
        let mut s: Secret = stub(&d, Component::DrupalSecret);
        s.data = Some(BTreeMap::from([("AUTH_KEY".to_string(), ByteString(b"keep".to_vec()))]));
        secret(&mut s, &d, &cfg).unwrap();

        let data = s.data.clone().unwrap();
        assert_eq!(data.len(), SALTS.len());
        assert_eq!(data["AUTH_KEY"].0, b"keep".to_vec());
        assert_eq!(data["NONCE_SALT"].0.len(), SALT_LEN);

        let before = s.clone();
        secret(&mut s, &d, &cfg).unwrap();
        assert_eq!(s, before);
    }

    #[test]
    fn deployment_selector_is_immutable_once_created() {
        let d = droplet();
        let cfg = ReconcileConfig::default();
        let mut dep: Deployment = stub(&d, Component::DrupalDeployment);
        deployment(&mut dep, &d, &cfg, "7").unwrap();
        let annotations = dep.spec.as_ref().unwrap().template.metadata.as_ref().unwrap().annotations.clone();
        assert_eq!(annotations.unwrap()[SECRET_VERSION_ANNOTATION], "7");

        let mut dep = persisted(dep);
        dep.spec.as_mut().unwrap().selector.match_labels = Some(BTreeMap::from([("app".to_string(), "other".to_string())]));
        let err = deployment(&mut dep, &d, &cfg, "7").unwrap_err();
        assert_eq!(err, SyncError::immutable("deployment selector"));
    }

    #[test]
    fn tag_bump_keeps_selector() {
        let mut d = droplet();
        let cfg = ReconcileConfig::default();
        let mut dep: Deployment = stub(&d, Component::DrupalDeployment);
        deployment(&mut dep, &d, &cfg, "1").unwrap();
        let mut dep = persisted(dep);

        d.spec.drupal.tag = Some("0.0.2".into());
        deployment(&mut dep, &d, &cfg, "1").unwrap();
        let c = &dep.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        assert_eq!(c.image.as_deref(), Some("drupalwxt/site-canada:0.0.2"));
    }

    #[test]
    fn service_keeps_defaulted_port_fields() {
        let d = droplet();
        let cfg = ReconcileConfig::default();
        let mut svc: Service = stub(&d, Component::DrupalService);
        service(&mut svc, &d, &cfg).unwrap();
        let mut svc = persisted(svc);
        svc.spec.as_mut().unwrap().ports.as_mut().unwrap()[0].protocol = Some("TCP".into());

        let before = svc.clone();
        service(&mut svc, &d, &cfg).unwrap();
        assert_eq!(svc, before);

        svc.spec.as_mut().unwrap().selector = None;
        assert_eq!(service(&mut svc, &d, &cfg).unwrap_err(), SyncError::immutable("service selector"));
    }

    #[test]
    fn upgrade_job_is_left_alone_once_created() {
        let d = droplet();
        let cfg = ReconcileConfig::default();
        let mut job: Job = stub(&d, Component::DrupalDbUpgrade);
        upgrade_job(&mut job, &d, &cfg).unwrap();
        assert_eq!(job.spec.as_ref().unwrap().backoff_limit, Some(0));

        let mut job = persisted(Job { metadata: job.metadata, spec: None, status: None });
        upgrade_job(&mut job, &d, &cfg).unwrap();
        assert!(job.spec.is_none());
    }

    #[test]
    fn pvc_requires_a_claim_spec() {
        let d = droplet();
        let cfg = ReconcileConfig::default();
        let mut pvc: PersistentVolumeClaim = stub(&d, Component::DrupalMediaPvc);
        let err = media_pvc(&mut pvc, &d, &cfg).unwrap_err();
        assert_eq!(err, SyncError::Mutation(".spec.media.persistentVolumeClaim is not defined".into()));
    }

    fn with_media_claim(mut d: Droplet, size: &str) -> Droplet {
        d.spec.drupal.media = Some(
            serde_json::from_value(serde_json::json!({
                "persistentVolumeClaim": {
                    "accessModes": ["ReadWriteOnce"],
                    "resources": { "requests": { "storage": size } }
                }
            }))
            .unwrap(),
        );
        d
    }

    #[test]
    fn pvc_claim_spec_cannot_change() {
        let cfg = ReconcileConfig::default();
        let d = with_media_claim(droplet(), "1Gi");
        let mut pvc: PersistentVolumeClaim = stub(&d, Component::DrupalMediaPvc);
        media_pvc(&mut pvc, &d, &cfg).unwrap();
        let mut pvc = persisted(pvc);

        // Server-assigned fields the droplet does not set are not drift.
        let spec = pvc.spec.as_mut().unwrap();
        spec.storage_class_name = Some("standard".into());
        spec.volume_name = Some("pvc-0001".into());
        let before = pvc.clone();
        media_pvc(&mut pvc, &d, &cfg).unwrap();
        assert_eq!(pvc, before);

        let bigger = with_media_claim(droplet(), "5Gi");
        let err = media_pvc(&mut pvc, &bigger, &cfg).unwrap_err();
        assert_eq!(err, SyncError::immutable("media claim spec"));
        assert!(!err.is_retryable());
        assert_eq!(pvc.spec, before.spec);
    }
}
