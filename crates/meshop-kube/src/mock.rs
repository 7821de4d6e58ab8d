//! In-memory cluster for testing
//!
//! Objects are stored by group, kind, namespace and name; the version part of
//! the apiVersion is ignored, as the API server serves one object under all of
//! its versions. Every call is recorded so tests can assert on ordering.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use meshop_core::{Gvk, K8sObject};

use crate::client::{ApplyAction, ClusterClient, ExecOutput, matches_selector, parse_selector};
use crate::error::{KubeError, Result};

type Key = (String, String, String, String);

/// One recorded client call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub verb: &'static str,
    /// `kind:namespace:name`, or `kind:namespace:selector` for lists
    pub target: String,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    pub applies: usize,
    pub gets: usize,
    pub updates: usize,
    pub deletes: usize,
    pub lists: usize,
    pub execs: usize,
}

/// In-memory [`ClusterClient`]
#[derive(Clone, Default)]
pub struct FakeClusterClient {
    store: Arc<RwLock<BTreeMap<Key, K8sObject>>>,
    calls: Arc<RwLock<Vec<Call>>>,
    operations: Arc<RwLock<OperationCounts>>,
    exec_outputs: Arc<RwLock<HashMap<(String, String), ExecOutput>>>,
    pending_conflicts: Arc<RwLock<usize>>,
    resource_version: Arc<RwLock<u64>>,
}

fn key(gvk: &Gvk, namespace: Option<&str>, name: &str) -> Key {
    (
        gvk.group.clone(),
        gvk.kind.clone(),
        namespace.unwrap_or("").to_string(),
        name.to_string(),
    )
}

fn object_key(obj: &K8sObject) -> Key {
    key(&obj.gvk, obj.namespace.as_deref(), &obj.name)
}

impl FakeClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the store, bypassing the call log
    pub fn with_objects(objects: Vec<K8sObject>) -> Self {
        let client = Self::new();
        for obj in objects {
            client.insert(obj);
        }
        client
    }

    pub fn insert(&self, obj: K8sObject) {
        let obj = self.stamp(obj);
        self.store.write().unwrap().insert(object_key(&obj), obj);
    }

    /// Register the output of `exec` for a pod and container
    pub fn set_exec_output(&self, pod: &str, container: &str, stdout: &str) {
        self.exec_outputs.write().unwrap().insert(
            (pod.to_string(), container.to_string()),
            ExecOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
    }

    /// Make the next `n` calls to `update` fail with a conflict
    pub fn fail_next_updates(&self, n: usize) {
        *self.pending_conflicts.write().unwrap() = n;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.read().unwrap().clone()
    }

    /// Targets of `apply` calls, in call order
    pub fn applied(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.verb == "apply")
            .map(|c| c.target)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().unwrap().clone()
    }

    pub fn objects(&self) -> Vec<K8sObject> {
        self.store.read().unwrap().values().cloned().collect()
    }

    /// Look up a stored object by kind, namespace and name
    pub fn find(&self, kind: &str, namespace: &str, name: &str) -> Option<K8sObject> {
        self.store
            .read()
            .unwrap()
            .values()
            .find(|o| o.kind() == kind && o.namespace.as_deref().unwrap_or("") == namespace && o.name == name)
            .cloned()
    }

    fn record(&self, verb: &'static str, target: String) {
        self.calls.write().unwrap().push(Call { verb, target });
    }

    fn next_resource_version(&self) -> String {
        let mut rv = self.resource_version.write().unwrap();
        *rv += 1;
        rv.to_string()
    }

    fn stamp(&self, mut obj: K8sObject) -> K8sObject {
        let rv = self.next_resource_version();
        if let Some(meta) = obj.body.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.insert("resourceVersion".into(), json!(rv));
        }
        obj
    }
}

fn resource_version(obj: &K8sObject) -> Option<&str> {
    obj.body.pointer("/metadata/resourceVersion").and_then(|v| v.as_str())
}

fn without_resource_version(obj: &K8sObject) -> serde_json::Value {
    let mut body = obj.body.clone();
    if let Some(meta) = body.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("resourceVersion");
    }
    body
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn apply(&self, namespace: &str, object: &K8sObject, dry_run: bool) -> Result<ApplyAction> {
        let mut obj = object.clone();
        obj.default_namespace(namespace);
        self.record("apply", obj.hash());
        self.operations.write().unwrap().applies += 1;

        let k = object_key(&obj);
        let existing = self.store.read().unwrap().get(&k).cloned();
        let action = if existing.is_some() {
            ApplyAction::Configured
        } else {
            ApplyAction::Created
        };
        if dry_run {
            return Ok(action);
        }

        // Status belongs to the server
        if let Some(status) = existing.as_ref().and_then(|e| e.body.get("status")) {
            obj.body["status"] = status.clone();
        }
        if obj.kind() == "CustomResourceDefinition" {
            obj.body["status"] = json!({"conditions": [{"type": "Established", "status": "True"}]});
        }
        // An unchanged body keeps its resourceVersion, as on a real server
        if let Some(current) = &existing {
            if without_resource_version(current) == without_resource_version(&obj) {
                return Ok(action);
            }
        }
        let obj = self.stamp(obj);
        self.store.write().unwrap().insert(k, obj);
        Ok(action)
    }

    async fn get(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Result<Option<K8sObject>> {
        self.record("get", format!("{}:{}:{}", gvk.kind, namespace.unwrap_or(""), name));
        self.operations.write().unwrap().gets += 1;
        Ok(self.store.read().unwrap().get(&key(gvk, namespace, name)).cloned())
    }

    async fn update(&self, object: &K8sObject) -> Result<K8sObject> {
        self.record("update", object.hash());
        self.operations.write().unwrap().updates += 1;

        {
            let mut pending = self.pending_conflicts.write().unwrap();
            if *pending > 0 {
                *pending -= 1;
                return Err(KubeError::Conflict {
                    kind: object.kind().to_string(),
                    name: object.name.clone(),
                    message: "injected conflict".into(),
                });
            }
        }

        let k = object_key(object);
        let stored = self
            .store
            .read()
            .unwrap()
            .get(&k)
            .cloned()
            .ok_or_else(|| KubeError::NotFound {
                kind: object.kind().to_string(),
                name: object.name.clone(),
            })?;
        if let Some(rv) = resource_version(object) {
            if Some(rv) != resource_version(&stored) {
                return Err(KubeError::Conflict {
                    kind: object.kind().to_string(),
                    name: object.name.clone(),
                    message: "the object has been modified".into(),
                });
            }
        }

        let mut obj = object.clone();
        match stored.body.get("status") {
            Some(status) => obj.body["status"] = status.clone(),
            None => {
                if let Some(m) = obj.body.as_object_mut() {
                    m.remove("status");
                }
            }
        }
        let obj = self.stamp(obj);
        self.store.write().unwrap().insert(k, obj.clone());
        Ok(obj)
    }

    async fn update_status(&self, object: &K8sObject) -> Result<K8sObject> {
        self.record("update_status", object.hash());
        self.operations.write().unwrap().updates += 1;

        let k = object_key(object);
        let mut stored = self
            .store
            .read()
            .unwrap()
            .get(&k)
            .cloned()
            .ok_or_else(|| KubeError::NotFound {
                kind: object.kind().to_string(),
                name: object.name.clone(),
            })?;
        stored.body["status"] = object.body.get("status").cloned().unwrap_or(json!({}));
        let stored = self.stamp(stored);
        self.store.write().unwrap().insert(k, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Result<()> {
        self.record("delete", format!("{}:{}:{}", gvk.kind, namespace.unwrap_or(""), name));
        self.operations.write().unwrap().deletes += 1;
        self.store.write().unwrap().remove(&key(gvk, namespace, name));
        Ok(())
    }

    async fn list_by_selector(&self, gvk: &Gvk, namespace: Option<&str>, selector: &str) -> Result<Vec<K8sObject>> {
        self.record("list", format!("{}:{}:{}", gvk.kind, namespace.unwrap_or(""), selector));
        self.operations.write().unwrap().lists += 1;
        let terms = parse_selector(selector)?;
        Ok(self
            .store
            .read()
            .unwrap()
            .values()
            .filter(|o| o.gvk.group == gvk.group && o.gvk.kind == gvk.kind)
            .filter(|o| namespace.is_none_or(|ns| o.namespace.as_deref() == Some(ns)))
            .filter(|o| matches_selector(o, &terms))
            .cloned()
            .collect())
    }

    async fn exec_in_pod(&self, pod: &str, namespace: &str, container: &str, command: &[String]) -> Result<ExecOutput> {
        self.record("exec", format!("Pod:{}:{}/{} {}", namespace, pod, container, command.join(" ")));
        self.operations.write().unwrap().execs += 1;
        self.exec_outputs
            .read()
            .unwrap()
            .get(&(pod.to_string(), container.to_string()))
            .cloned()
            .ok_or_else(|| KubeError::Exec {
                pod: pod.to_string(),
                message: format!("container {} not found", container),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(name: &str) -> K8sObject {
        K8sObject::from_yaml(&format!(
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: {}\n  labels:\n    app: {}\n",
            name, name
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let client = FakeClusterClient::new();
        let gvk = Gvk::new("", "v1", "Service");

        assert_eq!(client.apply("istio-system", &svc("pilot"), false).await.unwrap(), ApplyAction::Created);
        let first = client.get(&gvk, Some("istio-system"), "pilot").await.unwrap().unwrap();
        assert_eq!(client.apply("istio-system", &svc("pilot"), false).await.unwrap(), ApplyAction::Configured);
        assert_eq!(client.objects().len(), 1);

        let got = client.get(&gvk, Some("istio-system"), "pilot").await.unwrap().unwrap();
        assert_eq!(got.namespace.as_deref(), Some("istio-system"));
        assert_eq!(resource_version(&got), resource_version(&first));
        assert_eq!(got, first);
    }

    #[tokio::test]
    async fn test_changed_apply_bumps_resource_version() {
        let client = FakeClusterClient::new();
        let gvk = Gvk::new("", "v1", "Service");
        client.apply("ns", &svc("a"), false).await.unwrap();
        let first = client.get(&gvk, Some("ns"), "a").await.unwrap().unwrap();

        let mut changed = svc("a");
        changed.body["spec"] = json!({"ports": [{"port": 15010}]});
        client.apply("ns", &changed, false).await.unwrap();
        let second = client.get(&gvk, Some("ns"), "a").await.unwrap().unwrap();

        assert_ne!(resource_version(&second), resource_version(&first));
        assert_eq!(second.body["spec"]["ports"][0]["port"], json!(15010));
    }

    #[tokio::test]
    async fn test_dry_run_persists_nothing() {
        let client = FakeClusterClient::new();
        client.apply("ns", &svc("a"), true).await.unwrap();
        assert!(client.objects().is_empty());
        assert_eq!(client.applied(), vec!["Service:ns:a".to_string()]);
    }

    #[tokio::test]
    async fn test_update_conflicts_on_stale_version() {
        let client = FakeClusterClient::new();
        let gvk = Gvk::new("", "v1", "Service");
        client.apply("ns", &svc("a"), false).await.unwrap();
        let first = client.get(&gvk, Some("ns"), "a").await.unwrap().unwrap();

        client.update(&first).await.unwrap();
        let err = client.update(&first).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_list_by_selector_and_namespace() {
        let client = FakeClusterClient::new();
        client.apply("a", &svc("pilot"), false).await.unwrap();
        client.apply("b", &svc("pilot"), false).await.unwrap();
        client.apply("a", &svc("galley"), false).await.unwrap();
        let gvk = Gvk::new("", "v1", "Service");

        assert_eq!(client.list_by_selector(&gvk, None, "app=pilot").await.unwrap().len(), 2);
        assert_eq!(client.list_by_selector(&gvk, Some("a"), "").await.unwrap().len(), 2);
        assert_eq!(client.operation_counts().lists, 2);
    }
}
