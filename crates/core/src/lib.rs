//! Droplet core types: object identity, owner references, sync outcomes and the
//! error taxonomy shared by the store, the syncer and the reconciliation driver.

#![forbid(unsafe_code)]

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub mod labels;

pub mod prelude {
    pub use super::{ErrorKind, Managed, ObjectKey, OwnerRef, SyncError, SyncOutcome, SyncResult};
}

/// A namespaced object kind the engine can fetch, mutate, compare and write.
pub trait Managed:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + PartialEq
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> Managed for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + fmt::Debug
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Identity of a managed object within one kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    /// Key of a stub or live object. Missing namespace maps to `default`.
    pub fn of<K: Resource>(obj: &K) -> Self {
        let meta = obj.meta();
        Self {
            namespace: meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Back-reference from a managed object to the parent that caused it.
///
/// Only an identity record: the store's garbage collector resolves it, the
/// engine never dereferences it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub uid: String,
}

impl OwnerRef {
    /// Build from a live parent. Returns `None` until the parent has a uid.
    pub fn from_resource<K: Resource<DynamicType = ()>>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        Some(Self {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            name: meta.name.clone()?,
            namespace: meta.namespace.clone(),
            uid: meta.uid.clone()?,
        })
    }

    /// Controlling owner reference (controller + block-owner-deletion).
    pub fn controller_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Reference used to attach events to the owner.
    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some(self.api_version.clone()),
            kind: Some(self.kind.clone()),
            name: Some(self.name.clone()),
            namespace: self.namespace.clone(),
            uid: Some(self.uid.clone()),
            ..Default::default()
        }
    }

    pub fn matches(&self, r: &OwnerReference) -> bool {
        r.uid == self.uid
    }
}

/// First owner reference flagged as controller, if any.
pub fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller.unwrap_or(false))
}

/// True for stubs that have not been persisted yet.
pub fn is_new(meta: &ObjectMeta) -> bool {
    meta.creation_timestamp.is_none()
}

/// Outcome of one sync call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
    Failed(String),
}

impl SyncOutcome {
    pub fn verb(&self) -> &'static str {
        match self {
            SyncOutcome::Created => "created",
            SyncOutcome::Updated => "updated",
            SyncOutcome::Unchanged => "unchanged",
            SyncOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, SyncOutcome::Created | SyncOutcome::Updated)
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Coarse error classes the driver branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Owner conflict or immutable field change. Wait for a spec change.
    Configuration,
    /// Optimistic concurrency loss. Re-run the whole sync.
    Concurrency,
    /// Store unreachable or timed out. Retry with backoff.
    Transport,
    /// Desired-state builder failed. Wait for a spec change.
    MutationFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Concurrency => "concurrency",
            ErrorKind::Transport => "transport",
            ErrorKind::MutationFailure => "mutation",
        }
    }
}

/// Errors returned by the store and the syncer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum SyncError {
    #[error("not_permitted: {0}")]
    NotPermitted(String),
    #[error("immutable: {0}")]
    Immutable(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("mutation: {0}")]
    Mutation(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn mutation(e: impl fmt::Display) -> Self {
        SyncError::Mutation(e.to_string())
    }

    pub fn immutable(what: impl fmt::Display) -> Self {
        SyncError::Immutable(format!("{} is immutable", what))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::NotPermitted(_) | SyncError::Immutable(_) => ErrorKind::Configuration,
            SyncError::Conflict(_) => ErrorKind::Concurrency,
            SyncError::Transport(_) => ErrorKind::Transport,
            SyncError::Mutation(_) => ErrorKind::MutationFailure,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Concurrency | ErrorKind::Transport)
    }
}
