//! Helpers shared by the drupal and nginx builders.

use droplet_core::labels::{self, LabelSet};
use droplet_core::{is_new, Managed, SyncError, SyncResult};
use droplet_merge::{EntryPolicy, MergeRules};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use crate::component::Component;
use crate::config::ReconcileConfig;
use crate::types::Droplet;

/// Identity-only object for `component`, in the droplet's namespace.
pub fn stub<K: Managed + Default>(d: &Droplet, component: Component) -> K {
    let mut obj = K::default();
    let meta = obj.meta_mut();
    meta.name = Some(component.object_name(d));
    meta.namespace = Some(d.ns().to_string());
    obj
}

/// Live labels, then component labels, then controller labels.
pub fn set_labels(meta: &mut ObjectMeta, component: Component, d: &Droplet, cfg: &ReconcileConfig) {
    meta.labels = Some(labels::merge(meta.labels.as_ref(), &[&component.labels(d), &cfg.controller_labels]));
}

/// Set the selector on a new object; on an existing one only check it.
pub fn set_selector(
    meta: &ObjectMeta,
    current: &mut LabelSelector,
    desired: &LabelSet,
    what: &str,
) -> SyncResult<()> {
    let want = labels::selector(desired);
    if *current == want {
        return Ok(());
    }
    if !is_new(meta) {
        return Err(SyncError::immutable(what));
    }
    *current = want;
    Ok(())
}

/// Pod spec rules for templates. Matched containers keep fields the API
/// server defaults (termination message, pull policy); volumes are replaced.
pub fn template_rules() -> MergeRules {
    MergeRules::pod_spec()
        .keyed_with("containers", "name", EntryPolicy::OverrideSet)
        .keyed_with("initContainers", "name", EntryPolicy::OverrideSet)
}

/// Replace the template metadata and merge the pod spec.
pub fn merge_template(current: &mut PodTemplateSpec, desired: PodTemplateSpec) -> SyncResult<()> {
    current.metadata = desired.metadata;
    let spec = current.spec.get_or_insert_with(Default::default);
    droplet_merge::merge(spec, &desired.spec.unwrap_or_default(), &template_rules())
        .map_err(|e| SyncError::mutation(format!("{:#}", e)))
}
