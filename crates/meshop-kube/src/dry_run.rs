//! [`ClusterClient`] for dry runs
//!
//! Nothing leaves the process: mutating calls log the intended action and
//! record it, reads answer as if the cluster were empty.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

use meshop_core::{Gvk, K8sObject};

use crate::client::{ApplyAction, ClusterClient, ExecOutput};
use crate::error::{KubeError, Result};

/// One intended mutation, e.g. `apply Deployment:istio-system:istio-pilot`
pub type IntendedAction = String;

#[derive(Clone, Default)]
pub struct DryRunClusterClient {
    actions: Arc<Mutex<Vec<IntendedAction>>>,
}

impl DryRunClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything that would have been sent, in call order
    pub fn actions(&self) -> Vec<IntendedAction> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, verb: &str, target: String) {
        info!(verb, target = %target, "dry run mode: would be running this");
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{} {}", verb, target));
    }
}

fn target(kind: &str, namespace: Option<&str>, name: &str) -> String {
    format!("{}:{}:{}", kind, namespace.unwrap_or(""), name)
}

#[async_trait]
impl ClusterClient for DryRunClusterClient {
    async fn apply(&self, namespace: &str, object: &K8sObject, _dry_run: bool) -> Result<ApplyAction> {
        let ns = object.namespace.as_deref().unwrap_or(namespace);
        self.record("apply", target(object.kind(), Some(ns), &object.name));
        Ok(ApplyAction::Created)
    }

    async fn get(&self, _gvk: &Gvk, _namespace: Option<&str>, _name: &str) -> Result<Option<K8sObject>> {
        Ok(None)
    }

    async fn update(&self, object: &K8sObject) -> Result<K8sObject> {
        self.record("update", object.hash());
        Ok(object.clone())
    }

    async fn update_status(&self, object: &K8sObject) -> Result<K8sObject> {
        self.record("update status", object.hash());
        Ok(object.clone())
    }

    async fn delete(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Result<()> {
        self.record("delete", target(&gvk.kind, namespace, name));
        Ok(())
    }

    async fn list_by_selector(&self, _gvk: &Gvk, _namespace: Option<&str>, _selector: &str) -> Result<Vec<K8sObject>> {
        Ok(Vec::new())
    }

    async fn exec_in_pod(&self, pod: &str, _namespace: &str, _container: &str, _command: &[String]) -> Result<ExecOutput> {
        Err(KubeError::Exec {
            pod: pod.to_string(),
            message: "no cluster in dry run mode".to_string(),
        })
    }
}
