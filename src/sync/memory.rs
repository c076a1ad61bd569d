//! # In-Memory Store
//!
//! [`ObjectStore`] implementation that keeps objects as JSON in a map and
//! enforces the same optimistic-concurrency rules as the API server.
//!
//! Besides backing the test suite it supports failure injection
//! ([`MemoryStore::fail_next_writes`]) and write accounting
//! ([`MemoryStore::write_count`]).

use super::merge_patch;
use super::store::{describe, ObjectStore, StoreObject};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<(String, String), Value>,
    next_version: u64,
    injected: VecDeque<Error>,
    writes: usize,
}

/// In-process versioned store for one resource kind
pub struct MemoryStore<K> {
    state: Mutex<State>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> std::fmt::Debug for MemoryStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl<K: StoreObject> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StoreObject> MemoryStore<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_version: 1,
                ..State::default()
            }),
            _kind: PhantomData,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue errors returned by the next write calls, in order
    pub fn fail_next_writes(&self, errors: impl IntoIterator<Item = Error>) {
        self.lock().injected.extend(errors);
    }

    /// Number of successful writes (create, update, update_status, patch)
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Request deletion the way the API server does
    ///
    /// Objects with finalizers only get a deletionTimestamp; they disappear once
    /// the last finalizer is removed by a later write.
    pub fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        let key = (namespace.to_string(), name.to_string());
        let Some(value) = state.objects.get(&key) else {
            return Err(Error::NotFound(describe::<K>(namespace, name)));
        };
        if has_finalizers(value) {
            let version = state.bump();
            if let Some(value) = state.objects.get_mut(&key) {
                merge_patch::apply(
                    value,
                    &json!({"metadata": {
                        "deletionTimestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                        "resourceVersion": version,
                    }}),
                );
            }
        } else {
            state.objects.remove(&key);
        }
        Ok(())
    }

    /// Insert or overwrite an object without version checks
    pub fn seed(&self, obj: &K) -> Result<K> {
        let (namespace, name) = key_of(obj)?;
        let mut value = serde_json::to_value(obj)?;
        let mut state = self.lock();
        let version = state.bump();
        set_meta(&mut value, "resourceVersion", json!(version));
        if value.pointer("/metadata/generation").is_none() {
            set_meta(&mut value, "generation", json!(1));
        }
        state.objects.insert((namespace, name), value.clone());
        Ok(serde_json::from_value(value)?)
    }
}

impl State {
    fn bump(&mut self) -> String {
        let version = self.next_version;
        self.next_version += 1;
        version.to_string()
    }

    fn take_injected(&mut self) -> Result<()> {
        match self.injected.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Store `value` under `key`, or drop it when deletion is complete
    fn commit(&mut self, key: (String, String), value: Value) -> Value {
        self.writes += 1;
        let deleting = value.pointer("/metadata/deletionTimestamp").is_some();
        if deleting && !has_finalizers(&value) {
            self.objects.remove(&key);
        } else {
            self.objects.insert(key, value.clone());
        }
        value
    }
}

fn key_of<K: StoreObject>(obj: &K) -> Result<(String, String)> {
    let meta = obj.meta();
    match (&meta.namespace, &meta.name) {
        (Some(ns), Some(name)) => Ok((ns.clone(), name.clone())),
        _ => Err(Error::Store {
            message: format!("{} without namespace or name", K::kind(&())),
            transient: false,
        }),
    }
}

fn set_meta(value: &mut Value, field: &str, v: Value) {
    merge_patch::apply(value, &json!({ "metadata": { field: v } }));
}

fn has_finalizers(value: &Value) -> bool {
    value
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

fn version_of(value: &Value) -> Option<&str> {
    value.pointer("/metadata/resourceVersion").and_then(Value::as_str)
}

fn generation_of(value: &Value) -> i64 {
    value
        .pointer("/metadata/generation")
        .and_then(Value::as_i64)
        .unwrap_or(1)
}

/// Everything except metadata and status, which is what bumps `generation`
fn payload(value: &Value) -> Value {
    let mut copy = value.clone();
    if let Value::Object(map) = &mut copy {
        map.remove("metadata");
        map.remove("status");
    }
    copy
}

#[async_trait]
impl<K: StoreObject> ObjectStore<K> for MemoryStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        let state = self.lock();
        let value = state
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::NotFound(describe::<K>(namespace, name)))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = key_of(obj)?;
        let mut state = self.lock();
        state.take_injected()?;
        if state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists(describe::<K>(&key.0, &key.1)));
        }
        let mut value = serde_json::to_value(obj)?;
        let version = state.bump();
        set_meta(&mut value, "resourceVersion", json!(version));
        set_meta(&mut value, "generation", json!(1));
        set_meta(&mut value, "uid", json!(format!("uid-{version}")));
        let stored = state.commit(key, value);
        Ok(serde_json::from_value(stored)?)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let key = key_of(obj)?;
        let mut state = self.lock();
        state.take_injected()?;
        let current = state
            .objects
            .get(&key)
            .ok_or_else(|| Error::NotFound(describe::<K>(&key.0, &key.1)))?
            .clone();
        if obj.meta().resource_version.as_deref() != version_of(&current) {
            return Err(Error::Conflict(describe::<K>(&key.0, &key.1)));
        }

        let mut value = serde_json::to_value(obj)?;
        // The main resource endpoint ignores status changes
        if let Value::Object(map) = &mut value {
            match current.get("status") {
                Some(status) => map.insert("status".to_string(), status.clone()),
                None => map.remove("status"),
            };
        }
        let mut generation = generation_of(&current);
        if payload(&value) != payload(&current) {
            generation += 1;
        }
        let version = state.bump();
        set_meta(&mut value, "resourceVersion", json!(version));
        set_meta(&mut value, "generation", json!(generation));
        let stored = state.commit(key, value);
        Ok(serde_json::from_value(stored)?)
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = key_of(obj)?;
        let mut state = self.lock();
        state.take_injected()?;
        let mut current = state
            .objects
            .get(&key)
            .ok_or_else(|| Error::NotFound(describe::<K>(&key.0, &key.1)))?
            .clone();
        if obj.meta().resource_version.as_deref() != version_of(&current) {
            return Err(Error::Conflict(describe::<K>(&key.0, &key.1)));
        }

        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);
        if let Value::Object(map) = &mut current {
            map.insert("status".to_string(), status);
        }
        let version = state.bump();
        set_meta(&mut current, "resourceVersion", json!(version));
        let stored = state.commit(key, current);
        Ok(serde_json::from_value(stored)?)
    }

    async fn patch(&self, namespace: &str, name: &str, patch: &Value) -> Result<K> {
        let key = (namespace.to_string(), name.to_string());
        let mut state = self.lock();
        state.take_injected()?;
        let mut current = state
            .objects
            .get(&key)
            .ok_or_else(|| Error::NotFound(describe::<K>(namespace, name)))?
            .clone();
        if let Some(expected) = patch.pointer("/metadata/resourceVersion").and_then(Value::as_str) {
            if Some(expected) != version_of(&current) {
                return Err(Error::Conflict(describe::<K>(namespace, name)));
            }
        }

        let before = payload(&current);
        merge_patch::apply(&mut current, patch);
        let mut generation = generation_of(&current);
        if payload(&current) != before {
            generation += 1;
        }
        let version = state.bump();
        set_meta(&mut current, "resourceVersion", json!(version));
        set_meta(&mut current, "generation", json!(generation));
        let stored = state.commit(key, current);
        Ok(serde_json::from_value(stored)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("demo".to_string()),
                ..ObjectMeta::default()
            },
            data: Some([("k".to_string(), "v".to_string())].into()),
            ..ConfigMap::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_version_and_rejects_duplicates() {
        let store = MemoryStore::<ConfigMap>::new();
        let created = store.create(&config_map("a")).await.unwrap();
        assert!(created.metadata.resource_version.is_some());
        let err = store.create(&config_map("a")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let store = MemoryStore::<ConfigMap>::new();
        let created = store.create(&config_map("a")).await.unwrap();
        let mut first = created.clone();
        first.data = Some([("k".to_string(), "1".to_string())].into());
        store.update(&first).await.unwrap();

        let mut stale = created;
        stale.data = Some([("k".to_string(), "2".to_string())].into());
        let err = store.update(&stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_patch_merges_into_existing_object() {
        let store = MemoryStore::<ConfigMap>::new();
        store.create(&config_map("a")).await.unwrap();
        let patched = store
            .patch("demo", "a", &json!({"data": {"extra": "x"}}))
            .await
            .unwrap();
        let data = patched.data.unwrap();
        assert_eq!(data.get("k").map(String::as_str), Some("v"));
        assert_eq!(data.get("extra").map(String::as_str), Some("x"));
    }

    #[tokio::test]
    async fn test_injected_errors_are_returned_in_order() {
        let store = MemoryStore::<ConfigMap>::new();
        store.fail_next_writes([Error::Store {
            message: "etcd leader changed".into(),
            transient: true,
        }]);
        assert!(store.create(&config_map("a")).await.is_err());
        assert!(store.create(&config_map("a")).await.is_ok());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let store = MemoryStore::<ConfigMap>::new();
        let mut cm = config_map("a");
        cm.metadata.finalizers = Some(vec!["example.dev/hold".to_string()]);
        store.create(&cm).await.unwrap();

        store.delete("demo", "a").unwrap();
        let mut pending = store.get("demo", "a").await.unwrap();
        assert!(pending.metadata.deletion_timestamp.is_some());

        pending.metadata.finalizers = Some(vec![]);
        store.update(&pending).await.unwrap();
        assert!(store.get("demo", "a").await.unwrap_err().is_not_found());
    }
}
