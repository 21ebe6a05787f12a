//! Droplet merge: fold a desired value into a live value without clobbering
//! fields the desired value does not mention.
//!
//! Plain fields follow override-if-set: a zero value in `desired` (null, `""`,
//! `0`, `false`, `[]`, `{}`) leaves the live field alone, anything else replaces
//! it outright. Keyed collections (containers, volumes, ...) are reconciled by
//! identity instead of position:
//! - the result follows the order of `desired`,
//! - an entry matched by key is merged per its [`EntryPolicy`],
//! - an unmatched desired entry is appended as-is,
//! - live entries missing from `desired` are dropped; an empty or absent
//!   desired collection clears the field.
//!
//! Values are merged through their JSON form, so any serde type works.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::PodSpec;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value as Json};
use tracing::trace;

/// How a live entry is combined with the desired entry sharing its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryPolicy {
    /// Every field comes from the desired entry, including absent ones.
    /// Nested lists are therefore replaced wholesale and cleared when empty.
    #[default]
    Replace,
    /// Scalars set in the desired entry override, unset scalars keep the live
    /// value. Nested lists and objects present in the desired entry replace
    /// the live ones wholesale.
    OverrideSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedField {
    pub field: &'static str,
    pub key: &'static str,
    pub entries: EntryPolicy,
}

/// Which top-level fields of a value are keyed collections.
#[derive(Debug, Clone, Default)]
pub struct MergeRules {
    keyed: Vec<KeyedField>,
}

impl MergeRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keyed(self, field: &'static str, key: &'static str) -> Self {
        self.keyed_with(field, key, EntryPolicy::default())
    }

    pub fn keyed_with(mut self, field: &'static str, key: &'static str, entries: EntryPolicy) -> Self {
        self.keyed.retain(|k| k.field != field);
        self.keyed.push(KeyedField { field, key, entries });
        self
    }

    /// Containers, init containers, ephemeral containers and volumes, by name.
    pub fn pod_spec() -> Self {
        Self::new()
            .keyed("containers", "name")
            .keyed("initContainers", "name")
            .keyed("ephemeralContainers", "name")
            .keyed("volumes", "name")
    }

    pub fn keyed_fields(&self) -> &[KeyedField] {
        &self.keyed
    }

    fn is_keyed(&self, field: &str) -> bool {
        self.keyed.iter().any(|k| k.field == field)
    }
}

/// Merge `desired` into `current` in place.
pub fn merge<T: Serialize + DeserializeOwned>(current: &mut T, desired: &T, rules: &MergeRules) -> Result<()> {
    let mut cur = serde_json::to_value(&*current).context("serializing current value")?;
    let des = serde_json::to_value(desired).context("serializing desired value")?;
    merge_values(&mut cur, &des, rules);
    *current = serde_json::from_value(cur).context("deserializing merged value")?;
    Ok(())
}

/// [`merge`] with [`MergeRules::pod_spec`].
pub fn merge_pod_spec(current: &mut PodSpec, desired: &PodSpec) -> Result<()> {
    merge(current, desired, &MergeRules::pod_spec())
}

/// JSON-level merge; see the crate docs for the field semantics.
pub fn merge_values(current: &mut Json, desired: &Json, rules: &MergeRules) {
    let des = match desired {
        Json::Object(d) => d,
        other => {
            if !is_zero(other) {
                *current = other.clone();
            }
            return;
        }
    };
    if !current.is_object() {
        *current = Json::Object(Map::new());
    }
    let Json::Object(cur) = current else { return };

    for (k, dv) in des.iter() {
        if rules.is_keyed(k) || is_zero(dv) {
            continue;
        }
        cur.insert(k.clone(), dv.clone());
    }

    for kf in rules.keyed.iter() {
        match des.get(kf.field) {
            Some(Json::Array(entries)) => {
                let merged = merge_keyed(cur.get(kf.field), entries, kf);
                cur.insert(kf.field.to_string(), Json::Array(merged));
            }
            None | Some(Json::Null) => {
                cur.remove(kf.field);
            }
            // Not a list after all: treat like a plain field.
            Some(other) => {
                cur.insert(kf.field.to_string(), other.clone());
            }
        }
    }
}

fn merge_keyed(current: Option<&Json>, desired: &[Json], kf: &KeyedField) -> Vec<Json> {
    let current: &[Json] = current.and_then(Json::as_array).map(Vec::as_slice).unwrap_or(&[]);
    desired
        .iter()
        .map(|d| {
            // Duplicate keys in `current`: first match wins.
            let matched = d
                .get(kf.key)
                .and_then(|id| current.iter().find(|c| c.get(kf.key) == Some(id)));
            match matched {
                Some(c) => {
                    trace!(field = kf.field, key = ?d.get(kf.key), "merge: matched entry");
                    merge_entry(c, d, kf.entries)
                }
                None => d.clone(),
            }
        })
        .collect()
}

fn merge_entry(current: &Json, desired: &Json, policy: EntryPolicy) -> Json {
    match (policy, current, desired) {
        (EntryPolicy::OverrideSet, Json::Object(cur), Json::Object(des)) => {
            let mut out = cur.clone();
            for (k, dv) in des.iter() {
                if dv.is_array() || dv.is_object() || !is_zero(dv) {
                    out.insert(k.clone(), dv.clone());
                }
            }
            Json::Object(out)
        }
        _ => desired.clone(),
    }
}

/// Zero value in the Go sense, as seen through JSON.
pub fn is_zero(v: &Json) -> bool {
    match v {
        Json::Null => true,
        Json::Bool(b) => !b,
        Json::Number(n) => n.as_f64() == Some(0.0),
        Json::String(s) => s.is_empty(),
        Json::Array(a) => a.is_empty(),
        Json::Object(o) => o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(v: &Json, field: &str) -> Vec<String> {
        v[field]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn zero_values_keep_current() {
        let mut cur = json!({"dnsPolicy": "ClusterFirst", "hostNetwork": true, "priority": 5, "nodeSelector": {"a": "b"}});
        let des = json!({"dnsPolicy": "", "hostNetwork": false, "priority": 0, "nodeSelector": {}, "hostname": null});
        merge_values(&mut cur, &des, &MergeRules::new());
        assert_eq!(cur, json!({"dnsPolicy": "ClusterFirst", "hostNetwork": true, "priority": 5, "nodeSelector": {"a": "b"}}));
    }

    #[test]
    fn set_values_replace_outright() {
        let mut cur = json!({"nodeSelector": {"a": "b", "c": "d"}, "schedulerName": "default"});
        let des = json!({"nodeSelector": {"x": "y"}});
        merge_values(&mut cur, &des, &MergeRules::new());
        assert_eq!(cur["nodeSelector"], json!({"x": "y"}));
        assert_eq!(cur["schedulerName"], "default");
    }

    #[test]
    fn keyed_result_follows_desired_order() {
        let mut cur = json!({"volumes": [{"name": "a"}, {"name": "b"}, {"name": "c"}]});
        let des = json!({"volumes": [{"name": "c"}, {"name": "d"}, {"name": "a"}]});
        merge_values(&mut cur, &des, &MergeRules::pod_spec());
        assert_eq!(names(&cur, "volumes"), vec!["c", "d", "a"]);
    }

    #[test]
    fn absent_or_empty_keyed_field_clears() {
        let rules = MergeRules::pod_spec();
        let mut cur = json!({"volumes": [{"name": "a"}], "containers": [{"name": "x"}]});
        merge_values(&mut cur, &json!({"containers": []}), &rules);
        assert!(cur.get("volumes").is_none());
        assert_eq!(cur["containers"], json!([]));
    }

    #[test]
    fn duplicate_current_names_first_match_wins() {
        let rules = MergeRules::new().keyed_with("items", "name", EntryPolicy::OverrideSet);
        let mut cur = json!({"items": [{"name": "a", "v": 1}, {"name": "a", "v": 2}]});
        merge_values(&mut cur, &json!({"items": [{"name": "a"}]}), &rules);
        assert_eq!(cur["items"], json!([{"name": "a", "v": 1}]));
    }

    #[test]
    fn override_set_policy_keeps_unset_scalars() {
        let rules = MergeRules::new().keyed_with("containers", "name", EntryPolicy::OverrideSet);
        let mut cur = json!({"containers": [{
            "name": "main", "image": "v1", "terminationMessagePath": "/dev/termination-log",
            "ports": [{"containerPort": 80}, {"containerPort": 443}]
        }]});
        let des = json!({"containers": [{"name": "main", "image": "v2", "ports": []}]});
        merge_values(&mut cur, &des, &rules);
        assert_eq!(cur["containers"][0]["image"], "v2");
        assert_eq!(cur["containers"][0]["terminationMessagePath"], "/dev/termination-log");
        assert_eq!(cur["containers"][0]["ports"], json!([]));
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let rules = MergeRules::pod_spec();
        let mut cur = json!({"restartPolicy": "Always", "volumes": [{"name": "old"}]});
        let des = json!({"containers": [{"name": "a", "image": "i"}], "volumes": [{"name": "v", "emptyDir": {}}]});
        merge_values(&mut cur, &des, &rules);
        let once = cur.clone();
        merge_values(&mut cur, &des, &rules);
        assert_eq!(cur, once);
    }

    #[test]
    fn keyed_with_replaces_previous_rule() {
        let rules = MergeRules::pod_spec().keyed_with("volumes", "name", EntryPolicy::OverrideSet);
        let vols: Vec<_> = rules.keyed_fields().iter().filter(|k| k.field == "volumes").collect();
        assert_eq!(vols.len(), 1);
        assert_eq!(vols[0].entries, EntryPolicy::OverrideSet);
    }
}
