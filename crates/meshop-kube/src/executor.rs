//! Applies component manifests in dependency order
//!
//! Every component with content gets its own task. A task waits until all of
//! its parents have finished, whether they succeeded or not, then applies its
//! objects: CRDs first (waiting until they are established), then the rest in
//! kind order. Failures are recorded per component and never stop siblings or
//! children.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use meshop_core::object::objects_to_manifest;
use meshop_core::{ComponentName, K8sObject, parse_manifest};
use meshop_engine::ManifestMap;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::cancel::Cancellation;
use crate::client::ClusterClient;
use crate::crd::{CRD_POLL_INTERVAL, CRD_WAIT_TIMEOUT, wait_for_crds};
use crate::error::{KubeError, Result};
use crate::markings::{OwnerRef, mark};
use crate::order::{partition_crds, sort_for_apply};
use crate::readiness::wait_for_workloads;

pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(300);

/// Parent/child relation between components
#[derive(Debug, Clone)]
pub struct DependencyTree {
    parents: BTreeMap<ComponentName, Vec<ComponentName>>,
}

impl DependencyTree {
    /// Build from `(parent, child)` edges, rejecting cycles
    pub fn new(edges: impl IntoIterator<Item = (ComponentName, ComponentName)>) -> Result<Self> {
        let mut parents: BTreeMap<ComponentName, Vec<ComponentName>> = BTreeMap::new();
        for (parent, child) in edges {
            let list = parents.entry(child).or_default();
            if !list.contains(&parent) {
                list.push(parent);
            }
        }
        let tree = Self { parents };
        tree.check_acyclic()?;
        Ok(tree)
    }

    /// Base is the parent of every other component
    pub fn istio() -> Self {
        let parents = ComponentName::ALL
            .iter()
            .filter(|c| **c != ComponentName::Base)
            .map(|c| (*c, vec![ComponentName::Base]))
            .collect();
        Self { parents }
    }

    pub fn parents(&self, component: ComponentName) -> &[ComponentName] {
        self.parents.get(&component).map(Vec::as_slice).unwrap_or(&[])
    }

    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            tree: &DependencyTree,
            c: ComponentName,
            marks: &mut BTreeMap<ComponentName, Mark>,
        ) -> Result<()> {
            match marks.get(&c) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(KubeError::DependencyCycle(c)),
                None => {}
            }
            marks.insert(c, Mark::Visiting);
            for p in tree.parents(c) {
                visit(tree, *p, marks)?;
            }
            marks.insert(c, Mark::Done);
            Ok(())
        }

        let mut marks = BTreeMap::new();
        for c in self.parents.keys() {
            visit(self, *c, &mut marks)?;
        }
        Ok(())
    }
}

impl Default for DependencyTree {
    fn default() -> Self {
        Self::istio()
    }
}

/// Lifecycle of one component during an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    Pending,
    WaitingOnParent,
    Applying,
    Applied,
    Failed,
}

/// What happened when a component was applied
#[derive(Debug, Clone)]
pub struct ComponentApplyOutput {
    pub state: ApplyState,
    /// One line per object, `Kind/name created|configured`
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    /// The objects as sent to the cluster, markings included
    pub manifest: String,
}

impl ComponentApplyOutput {
    fn failed(error: String) -> Self {
        Self {
            state: ApplyState::Failed,
            stdout: String::new(),
            stderr: error.clone(),
            error: Some(error),
            manifest: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Settings shared by every component in one execution
#[derive(Debug, Clone)]
pub struct ApplyContext {
    pub version: String,
    pub owner: Option<OwnerRef>,
    /// Target namespace per component; others use `default_namespace`
    pub namespaces: BTreeMap<ComponentName, String>,
    pub default_namespace: String,
    pub dry_run: bool,
    /// Wait for workloads to become ready after applying
    pub wait: bool,
    pub readiness_timeout: Duration,
    pub crd_interval: Duration,
    pub crd_timeout: Duration,
}

impl Default for ApplyContext {
    fn default() -> Self {
        Self {
            version: meshop_core::version::OPERATOR_VERSION.to_string(),
            owner: None,
            namespaces: BTreeMap::new(),
            default_namespace: meshop_core::spec::DEFAULT_NAMESPACE.to_string(),
            dry_run: false,
            wait: false,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            crd_interval: CRD_POLL_INTERVAL,
            crd_timeout: CRD_WAIT_TIMEOUT,
        }
    }
}

impl ApplyContext {
    pub fn namespace_for(&self, component: ComponentName) -> &str {
        self.namespaces
            .get(&component)
            .map(String::as_str)
            .unwrap_or(&self.default_namespace)
    }
}

pub type ApplyResults = BTreeMap<ComponentName, ComponentApplyOutput>;

/// Runs component applies concurrently, gated by the dependency tree
pub struct DependencyGraphExecutor {
    client: Arc<dyn ClusterClient>,
    tree: DependencyTree,
    cancel: Cancellation,
}

impl DependencyGraphExecutor {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            tree: DependencyTree::istio(),
            cancel: Cancellation::new(),
        }
    }

    pub fn with_tree(mut self, tree: DependencyTree) -> Self {
        self.tree = tree;
        self
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Apply every component that has content. Components whose manifest holds
    /// no objects are skipped and absent from the result.
    pub async fn execute(&self, manifests: &ManifestMap, ctx: &ApplyContext) -> ApplyResults {
        let active: Vec<ComponentName> = manifests
            .iter()
            .filter(|(_, m)| has_content(m))
            .map(|(c, _)| *c)
            .collect();

        let mut senders = BTreeMap::new();
        let mut receivers = BTreeMap::new();
        for c in &active {
            let (tx, rx) = watch::channel(false);
            senders.insert(*c, tx);
            receivers.insert(*c, rx);
        }

        let ctx = Arc::new(ctx.clone());
        let results: Arc<Mutex<ApplyResults>> = Arc::new(Mutex::new(BTreeMap::new()));

        let mut handles = Vec::with_capacity(active.len());
        for (component, done) in senders {
            // Parents with nothing to apply are treated as already finished
            let parents: Vec<watch::Receiver<bool>> = self
                .tree
                .parents(component)
                .iter()
                .filter_map(|p| receivers.get(p).cloned())
                .collect();
            let manifest = manifests.get(&component).cloned().unwrap_or_default();
            let client = Arc::clone(&self.client);
            let cancel = self.cancel.clone();
            let ctx = Arc::clone(&ctx);
            let results = Arc::clone(&results);

            let handle = tokio::spawn(async move {
                debug!(component = %component, state = ?ApplyState::WaitingOnParent, parents = parents.len());
                for mut rx in parents {
                    tokio::select! {
                        _ = rx.wait_for(|finished| *finished) => {}
                        _ = cancel.cancelled() => break,
                    }
                }

                let output = if cancel.is_cancelled() {
                    ComponentApplyOutput::failed(KubeError::Cancelled.to_string())
                } else {
                    info!(component = %component, state = ?ApplyState::Applying, "applying component");
                    apply_component(client.as_ref(), component, &manifest, &ctx, &cancel).await
                };

                match &output.error {
                    Some(err) => warn!(component = %component, error = %err, "component failed"),
                    None => debug!(component = %component, "component applied"),
                }
                results.lock().await.insert(component, output);
                done.send_replace(true);
            });
            handles.push((component, handle));
        }

        let (components, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        for (component, joined) in components.into_iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                results
                    .lock()
                    .await
                    .insert(component, ComponentApplyOutput::failed(format!("apply task failed: {}", e)));
            }
        }

        let mut guard = results.lock().await;
        std::mem::take(&mut *guard)
    }
}

/// Collect per-component failures into one error
pub fn check_results(results: &ApplyResults) -> Result<()> {
    let failed: Vec<(ComponentName, String)> = results
        .iter()
        .filter_map(|(c, out)| out.error.clone().map(|e| (*c, e)))
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(KubeError::ComponentsFailed(failed))
    }
}

fn has_content(manifest: &str) -> bool {
    // Unparseable manifests count as content so the parse error is reported
    parse_manifest(manifest).map(|o| !o.is_empty()).unwrap_or(true)
}

/// Apply one component's manifest. Errors on individual objects are collected
/// and the remaining objects are still applied.
pub async fn apply_component(
    client: &dyn ClusterClient,
    component: ComponentName,
    manifest: &str,
    ctx: &ApplyContext,
    cancel: &Cancellation,
) -> ComponentApplyOutput {
    let mut objects = match parse_manifest(manifest) {
        Ok(objects) => objects,
        Err(e) => return ComponentApplyOutput::failed(e.to_string()),
    };
    let namespace = ctx.namespace_for(component);
    for obj in &mut objects {
        obj.default_namespace(namespace);
        mark(obj, component, &ctx.version, ctx.owner.as_ref());
    }
    sort_for_apply(&mut objects);
    let applied_manifest = objects_to_manifest(&objects).unwrap_or_default();
    let (crds, rest) = partition_crds(objects);

    let mut stdout = Vec::new();
    let mut errors = Vec::new();

    apply_all(client, namespace, &crds, ctx.dry_run, &mut stdout, &mut errors).await;
    if !ctx.dry_run && !crds.is_empty() {
        let names: Vec<String> = crds.iter().map(|c| c.name.clone()).collect();
        if let Err(e) = wait_for_crds(client, &names, ctx.crd_interval, ctx.crd_timeout, cancel).await {
            errors.push(e.to_string());
        }
    }
    apply_all(client, namespace, &rest, ctx.dry_run, &mut stdout, &mut errors).await;

    if ctx.wait && !ctx.dry_run && errors.is_empty() {
        if let Err(e) = wait_for_workloads(client, &rest, ctx.readiness_timeout, cancel).await {
            errors.push(e.to_string());
        }
    }

    let error = (!errors.is_empty()).then(|| errors.join("\n"));
    ComponentApplyOutput {
        state: if error.is_some() {
            ApplyState::Failed
        } else {
            ApplyState::Applied
        },
        stdout: stdout.join("\n"),
        stderr: errors.join("\n"),
        error,
        manifest: applied_manifest,
    }
}

async fn apply_all(
    client: &dyn ClusterClient,
    namespace: &str,
    objects: &[K8sObject],
    dry_run: bool,
    stdout: &mut Vec<String>,
    errors: &mut Vec<String>,
) {
    let suffix = if dry_run { " (dry run)" } else { "" };
    for obj in objects {
        match client.apply(namespace, obj, dry_run).await {
            Ok(action) => stdout.push(format!("{}/{} {}{}", obj.kind(), obj.name, action.as_str(), suffix)),
            Err(e) => errors.push(e.to_string()),
        }
    }
}
