//! # Object Store
//!
//! The versioned declarative store the synchronizer writes against.
//!
//! [`KubeStore`] talks to the Kubernetes API server. Every write carries the
//! object's `resourceVersion`, so the server rejects stale writes with 409
//! and the error is surfaced as [`Error::Conflict`].

use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Debug;
use std::marker::PhantomData;

/// Object kinds the store can hold
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Versioned object store operations for one resource kind
#[async_trait]
pub trait ObjectStore<K: StoreObject>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<K>;

    /// Create a new object; fails with `AlreadyExists` if the name is taken
    async fn create(&self, obj: &K) -> Result<K>;

    /// Full update; fails with `Conflict` if the resourceVersion is stale
    async fn update(&self, obj: &K) -> Result<K>;

    /// Status-only update; same conflict semantics as [`ObjectStore::update`]
    async fn update_status(&self, obj: &K) -> Result<K>;

    /// Apply an RFC 7386 merge patch
    async fn patch(&self, namespace: &str, name: &str, patch: &Value) -> Result<K>;
}

/// Human readable `Kind ns/name` used in error messages and logs
pub fn describe<K: StoreObject>(namespace: &str, name: &str) -> String {
    format!("{} {namespace}/{name}", K::kind(&()))
}

/// [`ObjectStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> std::fmt::Debug for KubeStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl<K: StoreObject> KubeStore<K> {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn namespace_and_name<K: StoreObject>(obj: &K) -> Result<(String, String)> {
    let name = obj.meta().name.clone().ok_or_else(|| Error::Store {
        message: format!("{} without metadata.name", K::kind(&())),
        transient: false,
    })?;
    let namespace = obj.namespace().ok_or_else(|| Error::Store {
        message: format!("{} {name} without metadata.namespace", K::kind(&())),
        transient: false,
    })?;
    Ok((namespace, name))
}

#[async_trait]
impl<K: StoreObject> ObjectStore<K> for KubeStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, &describe::<K>(namespace, name)))
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let (namespace, name) = namespace_and_name(obj)?;
        self.api(&namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, &describe::<K>(&namespace, &name)))
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let (namespace, name) = namespace_and_name(obj)?;
        self.api(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, &describe::<K>(&namespace, &name)))
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let (namespace, name) = namespace_and_name(obj)?;
        // resourceVersion in the patch body makes the API server enforce
        // optimistic concurrency on the status subresource
        let value = serde_json::to_value(obj)?;
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": value.get("status").cloned().unwrap_or(Value::Null),
        });
        self.api(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, &describe::<K>(&namespace, &name)))
    }

    async fn patch(&self, namespace: &str, name: &str, patch: &Value) -> Result<K> {
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| Error::from_kube(e, &describe::<K>(namespace, name)))
    }
}
