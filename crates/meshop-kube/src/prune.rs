//! Removal of objects an owner no longer renders
//!
//! Every object applied on behalf of an owner carries the owner labels and the
//! owner generation it was applied at. After a successful apply at generation
//! N, any owned object still stamped with another generation is stale.

use meshop_core::Gvk;
use tracing::{debug, info};

use crate::client::ClusterClient;
use crate::error::{KubeError, Result};
use crate::markings::{OwnerRef, owner_generation};

/// Namespaced kinds searched for owned objects, in deletion order
pub const NAMESPACED_PRUNE_KINDS: &[(&str, &str, &str)] = &[
    ("autoscaling", "v2", "HorizontalPodAutoscaler"),
    ("policy", "v1", "PodDisruptionBudget"),
    ("apps", "v1", "Deployment"),
    ("apps", "v1", "StatefulSet"),
    ("batch", "v1", "Job"),
    ("apps", "v1", "DaemonSet"),
    ("networking.k8s.io", "v1", "Ingress"),
    ("", "v1", "Service"),
    ("", "v1", "Endpoints"),
    ("", "v1", "ConfigMap"),
    ("", "v1", "PersistentVolumeClaim"),
    ("", "v1", "Pod"),
    ("", "v1", "Secret"),
    ("", "v1", "ServiceAccount"),
    ("rbac.authorization.k8s.io", "v1", "RoleBinding"),
    ("rbac.authorization.k8s.io", "v1", "Role"),
    ("authentication.istio.io", "v1alpha1", "Policy"),
    ("config.istio.io", "v1alpha2", "adapter"),
    ("config.istio.io", "v1alpha2", "attributemanifest"),
    ("config.istio.io", "v1alpha2", "handler"),
    ("config.istio.io", "v1alpha2", "instance"),
    ("config.istio.io", "v1alpha2", "rule"),
    ("config.istio.io", "v1alpha2", "template"),
    ("networking.istio.io", "v1alpha3", "DestinationRule"),
    ("networking.istio.io", "v1alpha3", "EnvoyFilter"),
    ("networking.istio.io", "v1alpha3", "Gateway"),
    ("networking.istio.io", "v1alpha3", "VirtualService"),
];

/// Cluster-scoped kinds searched for owned objects, in deletion order
pub const CLUSTER_PRUNE_KINDS: &[(&str, &str, &str)] = &[
    ("admissionregistration.k8s.io", "v1", "MutatingWebhookConfiguration"),
    ("admissionregistration.k8s.io", "v1", "ValidatingWebhookConfiguration"),
    ("certmanager.k8s.io", "v1alpha1", "ClusterIssuer"),
    ("rbac.authorization.k8s.io", "v1", "ClusterRole"),
    ("rbac.authorization.k8s.io", "v1", "ClusterRoleBinding"),
    ("authentication.istio.io", "v1alpha1", "MeshPolicy"),
];

/// What a prune pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// `kind:namespace:name` of every deleted object
    pub deleted: Vec<String>,
}

/// Delete objects owned by `owner` that were not applied at its current
/// generation, or every owned object when `all` is set. Kinds the cluster does
/// not serve are skipped. Failures are collected and reported together.
pub async fn prune(client: &dyn ClusterClient, owner: &OwnerRef, all: bool) -> Result<PruneReport> {
    let selector = owner.selector();
    let mut report = PruneReport::default();
    let mut errors = Vec::new();

    for &(group, version, kind) in NAMESPACED_PRUNE_KINDS.iter().chain(CLUSTER_PRUNE_KINDS) {
        let gvk = Gvk::new(group, version, kind);
        let objects = match client.list_by_selector(&gvk, None, &selector).await {
            Ok(objects) => objects,
            Err(KubeError::UnknownResource { .. }) => {
                debug!(kind, "kind not served, skipping");
                continue;
            }
            Err(e) => {
                errors.push(format!("list {}: {}", kind, e));
                continue;
            }
        };

        for obj in objects {
            // Objects without a generation were not applied by a reconcile
            let Some(generation) = owner_generation(&obj) else {
                continue;
            };
            if !all && generation == owner.generation {
                continue;
            }
            match client.delete(&obj.gvk, obj.namespace.as_deref(), &obj.name).await {
                Ok(()) => {
                    info!(object = %obj.hash(), generation, "pruned");
                    report.deleted.push(obj.hash());
                }
                Err(e) => errors.push(format!("delete {}: {}", obj.hash(), e)),
            }
        }
    }

    if errors.is_empty() {
        Ok(report)
    } else {
        Err(KubeError::PruneFailed(errors))
    }
}
