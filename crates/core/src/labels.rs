//! Label set helpers used by the desired-state builders.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

pub type LabelSet = BTreeMap<String, String>;

/// Merge label layers on top of `base`; later layers win on key collisions.
pub fn merge(base: Option<&LabelSet>, layers: &[&LabelSet]) -> LabelSet {
    let mut out = base.cloned().unwrap_or_default();
    for layer in layers {
        for (k, v) in layer.iter() {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

/// Label equality where a missing map equals an empty one.
pub fn equals(a: Option<&LabelSet>, b: Option<&LabelSet>) -> bool {
    let empty = LabelSet::new();
    a.unwrap_or(&empty) == b.unwrap_or(&empty)
}

pub fn selector(labels: &LabelSet) -> LabelSelector {
    LabelSelector { match_labels: Some(labels.clone()), match_expressions: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn merge_keeps_foreign_labels_and_overrides_ours() {
        let live = set(&[("team", "web"), ("app.kubernetes.io/name", "old")]);
        let ours = set(&[("app.kubernetes.io/name", "drupal")]);
        let ctl = set(&[("app.kubernetes.io/managed-by", "drupal-operator.sylus.ca")]);
        let out = merge(Some(&live), &[&ours, &ctl]);
        assert_eq!(out.get("team").map(String::as_str), Some("web"));
        assert_eq!(out.get("app.kubernetes.io/name").map(String::as_str), Some("drupal"));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn missing_equals_empty() {
        assert!(equals(None, Some(&LabelSet::new())));
        assert!(!equals(None, Some(&set(&[("a", "b")]))));
    }
}
