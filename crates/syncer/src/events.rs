//! Event reporting: turn a sync outcome into an event on the owning parent.

use std::sync::Mutex;

use droplet_core::{ObjectKey, OwnerRef, SyncOutcome};
use kube::Resource;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

/// Receives events about managed objects, attached to their owner.
///
/// Implementations must not block the caller and must swallow their own
/// failures (log them).
pub trait EventSink: Send + Sync {
    fn record(&self, owner: &OwnerRef, type_: EventType, reason: &str, message: &str);
}

/// `apiVersion.Kind` of `K`, the type qualifier leading every message.
pub fn qualified_kind<K: Resource<DynamicType = ()>>() -> String {
    format!("{}.{}", K::api_version(&()), K::kind(&()))
}

/// Event content for one outcome, or `None` when nothing is worth reporting.
pub fn describe(kind: &str, kind_name: &str, key: &ObjectKey, outcome: &SyncOutcome) -> Option<(EventType, String, String)> {
    match outcome {
        SyncOutcome::Unchanged => None,
        SyncOutcome::Created | SyncOutcome::Updated => Some((
            EventType::Normal,
            format!("{}SyncSuccessful", kind_name),
            format!("{} {} {} successfully", kind, key, outcome.verb()),
        )),
        SyncOutcome::Failed(reason) => Some((
            EventType::Warning,
            format!("{}SyncFailed", kind_name),
            format!("{} {} failed syncing: {}", kind, key, reason),
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub owner: OwnerRef,
    pub type_: EventType,
    pub reason: String,
    pub message: String,
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for RecordingSink {
    fn record(&self, owner: &OwnerRef, type_: EventType, reason: &str, message: &str) {
        if let Ok(mut g) = self.events.lock() {
            g.push(RecordedEvent {
                owner: owner.clone(),
                type_,
                reason: reason.to_string(),
                message: message.to_string(),
            });
        }
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&self, _owner: &OwnerRef, _type: EventType, _reason: &str, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_shapes() {
        let key = ObjectKey::new("default", "example");
        let (t, reason, msg) = describe("apps/v1.Deployment", "ExampleDeployment", &key, &SyncOutcome::Created).unwrap();
        assert_eq!(t, EventType::Normal);
        assert_eq!(reason, "ExampleDeploymentSyncSuccessful");
        assert_eq!(msg, "apps/v1.Deployment default/example created successfully");

        let (t, reason, msg) =
            describe("v1.Service", "DrupalService", &key, &SyncOutcome::Failed("immutable: service selector is immutable".into()))
                .unwrap();
        assert_eq!(t, EventType::Warning);
        assert_eq!(reason, "DrupalServiceSyncFailed");
        assert_eq!(msg, "v1.Service default/example failed syncing: immutable: service selector is immutable");

        assert!(describe("v1.Service", "DrupalService", &key, &SyncOutcome::Unchanged).is_none());
    }

    #[test]
    fn kinds_carry_their_api_group() {
        use k8s_openapi::api::apps::v1::Deployment;
        use k8s_openapi::api::core::v1::Secret;
        assert_eq!(qualified_kind::<Deployment>(), "apps/v1.Deployment");
        assert_eq!(qualified_kind::<Secret>(), "v1.Secret");
    }
}
