//! Render a merged spec and apply it in one step

use std::collections::BTreeMap;
use std::sync::Arc;

use meshop_core::{ComponentName, ControlPlaneSpec};
use meshop_engine::translate::component_namespace;
use meshop_engine::{ControlPlaneRenderer, ManifestMap, RendererProvider};
use tracing::info;

use crate::cancel::Cancellation;
use crate::client::ClusterClient;
use crate::error::Result;
use crate::executor::{ApplyContext, ApplyResults, DependencyGraphExecutor};

/// Rendered manifests and what applying them did
#[derive(Debug)]
pub struct InstallReport {
    pub manifests: ManifestMap,
    pub results: ApplyResults,
}

impl InstallReport {
    pub fn failed(&self) -> Vec<ComponentName> {
        self.results
            .iter()
            .filter(|(_, out)| !out.is_success())
            .map(|(c, _)| *c)
            .collect()
    }
}

/// Target namespace of every component under `spec`
pub fn component_namespaces(spec: &ControlPlaneSpec) -> BTreeMap<ComponentName, String> {
    ComponentName::ALL
        .iter()
        .map(|c| (*c, component_namespace(spec, *c, spec.component(*c))))
        .collect()
}

/// Render every component of `spec` and apply the result. Render errors abort
/// before anything reaches the cluster; apply errors are left in the report.
pub async fn render_and_apply(
    client: Arc<dyn ClusterClient>,
    spec: &ControlPlaneSpec,
    provider: &dyn RendererProvider,
    ctx: &ApplyContext,
    cancel: &Cancellation,
) -> Result<InstallReport> {
    let manifests = ControlPlaneRenderer::new(spec, provider).render()?;
    info!(components = manifests.len(), dry_run = ctx.dry_run, "rendered control plane");

    let ctx = ApplyContext {
        namespaces: component_namespaces(spec),
        default_namespace: spec.default_namespace().to_string(),
        ..ctx.clone()
    };
    let results = DependencyGraphExecutor::new(client)
        .with_cancellation(cancel.clone())
        .execute(&manifests, &ctx)
        .await;

    Ok(InstallReport { manifests, results })
}
