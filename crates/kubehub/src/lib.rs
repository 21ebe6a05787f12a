//! Droplet kubehub: API server backed store and error classification.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use droplet_core::{Managed, ObjectKey, SyncError, SyncResult};
use droplet_store::ObjectStore;
use kube::{
    api::{Api, PostParams},
    Client, Resource,
};
use tracing::{debug, info};

mod events;

pub use events::KubeEventSink;

/// Client from the ambient kubeconfig or in-cluster environment.
pub async fn client() -> Result<Client> {
    let client = Client::try_default().await.context("building kube client")?;
    info!("kubehub: client ready");
    Ok(client)
}

/// Map an API error onto the sync error taxonomy.
///
/// 404 only reaches here on writes (reads use `get_opt`), where it means the
/// object vanished under us: a conflict, the whole sync must re-run.
pub fn classify(err: kube::Error) -> SyncError {
    match err {
        kube::Error::Api(ae) => match ae.code {
            401 | 403 => SyncError::NotPermitted(ae.message),
            404 | 409 => SyncError::Conflict(ae.message),
            422 if ae.message.contains("immutable") => SyncError::Immutable(ae.message),
            422 => SyncError::Mutation(format!("invalid: {}", ae.message)),
            code => SyncError::Transport(format!("{} ({}): {}", ae.reason, code, ae.message)),
        },
        other => SyncError::Transport(other.to_string()),
    }
}

/// [`ObjectStore`] over the Kubernetes API. `update` is a `replace` carrying
/// the expected resource version, which the API server checks.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Managed>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: Managed>(&self, key: &ObjectKey) -> SyncResult<Option<K>> {
        self.api::<K>(&key.namespace).get_opt(&key.name).await.map_err(classify)
    }

    async fn create<K: Managed>(&self, obj: &K) -> SyncResult<K> {
        let key = ObjectKey::of(obj);
        let created = self.api::<K>(&key.namespace).create(&PostParams::default(), obj).await.map_err(classify)?;
        debug!(kind = %K::kind(&()), key = %key, "store: created");
        Ok(created)
    }

    async fn update<K: Managed>(&self, obj: &K, expected_version: &str) -> SyncResult<K> {
        let key = ObjectKey::of(obj);
        let mut obj = obj.clone();
        obj.meta_mut().resource_version = Some(expected_version.to_string());
        let updated = self
            .api::<K>(&key.namespace)
            .replace(&key.name, &PostParams::default(), &obj)
            .await
            .map_err(classify)?;
        debug!(kind = %K::kind(&()), key = %key, rv = ?updated.meta().resource_version, "store: updated");
        Ok(updated)
    }
}
