use droplet_core::{ObjectKey, SyncError};
use droplet_store::{MemoryStore, ObjectStore};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

fn cm(name: &str, data: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta { name: Some(name.into()), namespace: Some("default".into()), ..Default::default() },
        data: Some([("k".to_string(), data.to_string())].into_iter().collect()),
        ..Default::default()
    }
}

#[tokio::test]
async fn create_assigns_identity_and_version() {
    let store = MemoryStore::new();
    let created = store.create(&cm("example", "a")).await.unwrap();
    assert!(created.metadata.uid.is_some());
    assert!(created.metadata.creation_timestamp.is_some());
    assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));

    let got: ConfigMap = store.get(&ObjectKey::new("default", "example")).await.unwrap().unwrap();
    assert_eq!(got, created);
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn kinds_do_not_collide() {
    let store = MemoryStore::new();
    store.create(&cm("example", "a")).await.unwrap();
    let key = ObjectKey::new("default", "example");
    let secret: Option<Secret> = store.get(&key).await.unwrap();
    assert!(secret.is_none());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn duplicate_create_conflicts() {
    let store = MemoryStore::new();
    store.create(&cm("example", "a")).await.unwrap();
    let err = store.create(&cm("example", "b")).await.unwrap_err();
    assert!(matches!(err, SyncError::Conflict(_)));
}

#[tokio::test]
async fn update_checks_version() {
    let store = MemoryStore::new();
    let created = store.create(&cm("example", "a")).await.unwrap();
    let rv = created.metadata.resource_version.clone().unwrap();

    let mut next = created.clone();
    next.data = cm("example", "b").data;
    let updated = store.update(&next, &rv).await.unwrap();
    assert_ne!(updated.metadata.resource_version, created.metadata.resource_version);
    assert_eq!(updated.metadata.uid, created.metadata.uid);

    // Same stale version again.
    let err = store.update(&next, &rv).await.unwrap_err();
    assert!(matches!(err, SyncError::Conflict(_)));
}

#[tokio::test]
async fn touch_makes_held_version_stale() {
    let store = MemoryStore::new();
    let created = store.create(&cm("example", "a")).await.unwrap();
    let key = ObjectKey::new("default", "example");
    let rv = created.metadata.resource_version.clone().unwrap();
    assert!(store.touch::<ConfigMap>(&key).is_some());

    let err = store.update(&created, &rv).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn update_of_missing_object_conflicts() {
    let store = MemoryStore::new();
    let err = store.update(&cm("ghost", "a"), "1").await.unwrap_err();
    assert!(matches!(err, SyncError::Conflict(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn injected_failure_applies_once() {
    let store = MemoryStore::new();
    store.fail_next_write(SyncError::Transport("timeout".into()));
    let err = store.create(&cm("example", "a")).await.unwrap_err();
    assert_eq!(err, SyncError::Transport("timeout".into()));
    store.create(&cm("example", "a")).await.unwrap();
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn delete_removes_object() {
    let store = MemoryStore::new();
    store.create(&cm("example", "a")).await.unwrap();
    let key = ObjectKey::new("default", "example");
    assert!(store.delete::<ConfigMap>(&key));
    assert!(!store.delete::<ConfigMap>(&key));
    let got: Option<ConfigMap> = store.get(&key).await.unwrap();
    assert!(got.is_none());
}
