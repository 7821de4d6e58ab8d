//! Controller-mode reconciliation of one `IstioControlPlane` resource
//!
//! Each pass is level-triggered: read the resource, and depending on its state
//! either handle deletion, add the finalizer, or render, apply and prune, then
//! record the outcome in the resource status.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use meshop_core::{ConfigMerger, Gvk, K8sObject};
use meshop_engine::RendererProvider;

use crate::cancel::Cancellation;
use crate::client::ClusterClient;
use crate::error::{KubeError, Result};
use crate::executor::{ApplyContext, check_results};
use crate::install::render_and_apply;
use crate::markings::OwnerRef;
use crate::prune::prune;

pub const FINALIZER: &str = "istio-finalizer.install.istio.io";
/// Attempts at removing the finalizer when the resource keeps changing
pub const CONFLICT_RETRIES: usize = 10;

pub const CONTROL_PLANE_GROUP: &str = "install.istio.io";
pub const CONTROL_PLANE_VERSION: &str = "v1alpha2";
pub const CONTROL_PLANE_KIND: &str = "IstioControlPlane";

pub fn control_plane_gvk() -> Gvk {
    Gvk::new(CONTROL_PLANE_GROUP, CONTROL_PLANE_VERSION, CONTROL_PLANE_KIND)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallStatus {
    Unknown,
    Reconciling,
    Healthy,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub status: InstallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Written to `.status` of the custom resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneStatus {
    pub status: InstallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub component_status: BTreeMap<String, ComponentStatus>,
}

impl ControlPlaneStatus {
    fn reconciling() -> Self {
        Self {
            status: InstallStatus::Reconciling,
            message: None,
            component_status: BTreeMap::new(),
        }
    }
}

/// What a reconcile pass did
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    NotFound,
    /// Being deleted, and nothing of ours left to clean up
    Skipped,
    FinalizerAdded,
    Deleted { pruned: usize },
    Reconciled(ControlPlaneStatus),
}

pub struct Reconciler {
    client: Arc<dyn ClusterClient>,
    provider: Arc<dyn RendererProvider>,
    cancel: Cancellation,
    wait: bool,
}

impl Reconciler {
    pub fn new(client: Arc<dyn ClusterClient>, provider: Arc<dyn RendererProvider>) -> Self {
        Self {
            client,
            provider,
            cancel: Cancellation::new(),
            wait: false,
        }
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Wait for workloads to become ready on every pass
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// One reconcile pass over `namespace/name`
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        let gvk = control_plane_gvk();
        let Some(mut cr) = self.client.get(&gvk, Some(namespace), name).await? else {
            debug!(namespace, name, "control plane resource not found");
            return Ok(ReconcileOutcome::NotFound);
        };
        let owner = owner_ref(&cr);

        if is_deleting(&cr) {
            if !finalizers(&cr).iter().any(|f| f == FINALIZER) {
                return Ok(ReconcileOutcome::Skipped);
            }
            info!(namespace, name, "control plane deleted, removing owned resources");
            let report = prune(self.client.as_ref(), &owner, true).await?;
            self.remove_finalizer(namespace, name).await?;
            return Ok(ReconcileOutcome::Deleted {
                pruned: report.deleted.len(),
            });
        }

        if !finalizers(&cr).iter().any(|f| f == FINALIZER) {
            let mut list = finalizers(&cr);
            list.push(FINALIZER.to_string());
            cr.body["metadata"]["finalizers"] = json!(list);
            self.client.update(&cr).await?;
            info!(namespace, name, "added finalizer");
            return Ok(ReconcileOutcome::FinalizerAdded);
        }

        self.write_status(&cr, &ControlPlaneStatus::reconciling()).await?;
        let (status, result) = self.install(&cr, &owner).await;
        self.write_status(&cr, &status).await?;
        result.map(|()| ReconcileOutcome::Reconciled(status))
    }

    /// Reconcile every `interval` until cancelled. Errors of a pass are logged
    /// and retried on the next pass.
    pub async fn run(&self, namespace: &str, name: &str, interval: Duration) -> Result<()> {
        loop {
            match self.reconcile(namespace, name).await {
                Ok(outcome) => debug!(?outcome, "reconcile pass finished"),
                Err(KubeError::Cancelled) => return Err(KubeError::Cancelled),
                Err(e) => warn!(error = %e, "reconcile failed"),
            }
            self.cancel.sleep(interval).await?;
        }
    }

    async fn install(&self, cr: &K8sObject, owner: &OwnerRef) -> (ControlPlaneStatus, Result<()>) {
        let spec = cr.body.get("spec").cloned().unwrap_or(Value::Null);
        let merged = match ConfigMerger::new().generate_from_value(&spec, &[]) {
            Ok(merged) => merged,
            Err(e) => return (failed_status(e.to_string()), Err(e.into())),
        };

        let ctx = ApplyContext {
            owner: Some(owner.clone()),
            wait: self.wait,
            ..Default::default()
        };
        let report = match render_and_apply(
            Arc::clone(&self.client),
            &merged.spec,
            self.provider.as_ref(),
            &ctx,
            &self.cancel,
        )
        .await
        {
            Ok(report) => report,
            Err(e) => return (failed_status(e.to_string()), Err(e)),
        };

        let component_status = report
            .results
            .iter()
            .map(|(c, out)| {
                let status = ComponentStatus {
                    status: if out.is_success() {
                        InstallStatus::Healthy
                    } else {
                        InstallStatus::Error
                    },
                    error: out.error.clone(),
                };
                (c.to_string(), status)
            })
            .collect();

        // Only prune once everything applied, or a failed apply would remove
        // the objects it did not get to
        let result = match check_results(&report.results) {
            Ok(()) => prune(self.client.as_ref(), owner, false).await.map(|r| {
                if !r.deleted.is_empty() {
                    info!(count = r.deleted.len(), "pruned stale resources");
                }
            }),
            Err(e) => Err(e),
        };

        let status = ControlPlaneStatus {
            status: if result.is_ok() {
                InstallStatus::Healthy
            } else {
                InstallStatus::Error
            },
            message: result.as_ref().err().map(|e| e.to_string()),
            component_status,
        };
        (status, result)
    }

    async fn write_status(&self, cr: &K8sObject, status: &ControlPlaneStatus) -> Result<()> {
        let mut updated = cr.clone();
        updated.body["status"] = serde_json::to_value(status)?;
        // Status writes are unconditional
        if let Some(meta) = updated.body.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("resourceVersion");
        }
        self.client.update_status(&updated).await?;
        Ok(())
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<()> {
        let gvk = control_plane_gvk();
        for attempt in 1..=CONFLICT_RETRIES {
            let Some(mut cr) = self.client.get(&gvk, Some(namespace), name).await? else {
                return Ok(());
            };
            let remaining: Vec<String> = finalizers(&cr).into_iter().filter(|f| f != FINALIZER).collect();
            cr.body["metadata"]["finalizers"] = json!(remaining);
            match self.client.update(&cr).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() => {
                    debug!(attempt, "conflict removing finalizer, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(KubeError::Conflict {
            kind: CONTROL_PLANE_KIND.to_string(),
            name: name.to_string(),
            message: format!("finalizer not removed after {} attempts", CONFLICT_RETRIES),
        })
    }
}

/// Ownership record for everything installed on behalf of `cr`
pub fn owner_ref(cr: &K8sObject) -> OwnerRef {
    OwnerRef {
        name: cr.name.clone(),
        kind: cr.kind().to_string(),
        group: cr.gvk.group.clone(),
        generation: cr
            .body
            .pointer("/metadata/generation")
            .and_then(Value::as_i64)
            .unwrap_or(1),
    }
}

fn finalizers(cr: &K8sObject) -> Vec<String> {
    cr.body
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|f| f.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn is_deleting(cr: &K8sObject) -> bool {
    cr.body
        .pointer("/metadata/deletionTimestamp")
        .is_some_and(|v| !v.is_null())
}

fn failed_status(message: String) -> ControlPlaneStatus {
    ControlPlaneStatus {
        status: InstallStatus::Error,
        message: Some(message),
        component_status: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markings::{OWNER_GENERATION_KEY, mark};
    use crate::mock::FakeClusterClient;
    use crate::testutil::StaticProvider;
    use meshop_core::ComponentName;

    const PILOT: &str = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: istio-pilot\n";
    const BASE: &str = "apiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: istio-reader\n";

    fn control_plane(generation: i64, finalizers: &[&str], deleting: bool) -> K8sObject {
        let mut body = json!({
            "apiVersion": "install.istio.io/v1alpha2",
            "kind": "IstioControlPlane",
            "metadata": {
                "name": "example-istiocontrolplane",
                "namespace": "istio-operator",
                "generation": generation,
                "finalizers": finalizers,
            },
            "spec": {"profile": "minimal"},
        });
        if deleting {
            body["metadata"]["deletionTimestamp"] = json!("2026-10-19T10:00:00Z");
        }
        K8sObject::from_value(body).unwrap()
    }

    fn reconciler(client: &FakeClusterClient, provider: StaticProvider) -> Reconciler {
        Reconciler::new(Arc::new(client.clone()), Arc::new(provider))
    }

    fn provider() -> StaticProvider {
        StaticProvider::default()
            .with(ComponentName::Base, BASE)
            .with(ComponentName::Pilot, PILOT)
    }

    fn stored_status(client: &FakeClusterClient) -> ControlPlaneStatus {
        let cr = client
            .find("IstioControlPlane", "istio-operator", "example-istiocontrolplane")
            .unwrap();
        serde_json::from_value(cr.body["status"].clone()).unwrap()
    }

    #[tokio::test]
    async fn test_not_found() {
        let client = FakeClusterClient::new();
        let outcome = reconciler(&client, provider())
            .reconcile("istio-operator", "missing")
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_finalizer_added_first() {
        let client = FakeClusterClient::with_objects(vec![control_plane(1, &[], false)]);
        let outcome = reconciler(&client, provider())
            .reconcile("istio-operator", "example-istiocontrolplane")
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::FinalizerAdded);
        assert!(client.applied().is_empty());

        let cr = client
            .find("IstioControlPlane", "istio-operator", "example-istiocontrolplane")
            .unwrap();
        assert_eq!(finalizers(&cr), vec![FINALIZER.to_string()]);
    }

    #[tokio::test]
    async fn test_reconcile_applies_and_prunes_stale() {
        let mut stale = K8sObject::from_yaml("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: old-config\n").unwrap();
        stale.default_namespace("istio-system");
        let old_owner = OwnerRef {
            generation: 1,
            ..owner_ref(&control_plane(1, &[], false))
        };
        mark(&mut stale, ComponentName::Pilot, "1.2.0", Some(&old_owner));

        let client = FakeClusterClient::with_objects(vec![control_plane(2, &[FINALIZER], false), stale]);
        let outcome = reconciler(&client, provider())
            .reconcile("istio-operator", "example-istiocontrolplane")
            .await
            .unwrap();

        let ReconcileOutcome::Reconciled(status) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(status.status, InstallStatus::Healthy);
        assert_eq!(status.component_status["Pilot"].status, InstallStatus::Healthy);
        assert_eq!(stored_status(&client), status);

        let pilot = client.find("Deployment", "istio-system", "istio-pilot").unwrap();
        assert_eq!(pilot.annotation(OWNER_GENERATION_KEY), Some("2"));
        assert!(client.find("ConfigMap", "istio-system", "old-config").is_none());
    }

    #[tokio::test]
    async fn test_apply_failure_recorded_in_status() {
        let client = FakeClusterClient::with_objects(vec![control_plane(1, &[FINALIZER], false)]);
        let provider = provider().with(ComponentName::Pilot, "kind: [unclosed");

        let err = reconciler(&client, provider)
            .reconcile("istio-operator", "example-istiocontrolplane")
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::ComponentsFailed(_)));

        let status = stored_status(&client);
        assert_eq!(status.status, InstallStatus::Error);
        assert_eq!(status.component_status["Pilot"].status, InstallStatus::Error);
        assert_eq!(status.component_status["Base"].status, InstallStatus::Healthy);
        assert!(status.message.unwrap().contains("Pilot"));
    }

    #[tokio::test]
    async fn test_deletion_prunes_and_retries_finalizer_removal() {
        let client = FakeClusterClient::with_objects(vec![control_plane(1, &[FINALIZER], false)]);
        let r = reconciler(&client, provider());
        r.reconcile("istio-operator", "example-istiocontrolplane").await.unwrap();
        assert!(client.find("Deployment", "istio-system", "istio-pilot").is_some());

        let mut cr = client
            .find("IstioControlPlane", "istio-operator", "example-istiocontrolplane")
            .unwrap();
        cr.body["metadata"]["deletionTimestamp"] = json!("2026-10-19T10:00:00Z");
        client.insert(cr);
        client.fail_next_updates(3);

        let outcome = r.reconcile("istio-operator", "example-istiocontrolplane").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Deleted { pruned: 2 });
        assert!(client.find("Deployment", "istio-system", "istio-pilot").is_none());

        let cr = client
            .find("IstioControlPlane", "istio-operator", "example-istiocontrolplane")
            .unwrap();
        assert!(finalizers(&cr).is_empty());
    }

    #[tokio::test]
    async fn test_deleting_without_finalizer_is_skipped() {
        let client = FakeClusterClient::with_objects(vec![control_plane(1, &[], true)]);
        let outcome = reconciler(&client, provider())
            .reconcile("istio-operator", "example-istiocontrolplane")
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Skipped);
        assert_eq!(client.operation_counts().deletes, 0);
    }
}
