//! In-place upgrade of a running control plane
//!
//! The running version is read from the control plane pods themselves, the
//! running values from the sidecar injector ConfigMap. Both are checked against
//! the target before anything is applied.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use semver::Version;
use serde::Deserialize;
use serde_json::Value;
use similar::TextDiff;
use tracing::{debug, info, warn};

use meshop_core::merge::overlay_all;
use meshop_core::version::operator_version;
use meshop_core::{Gvk, MergedSpec, tag_to_version};
use meshop_engine::{ControlPlaneRenderer, RendererProvider};

use crate::cancel::Cancellation;
use crate::client::ClusterClient;
use crate::error::{KubeError, Result};
use crate::executor::{ApplyContext, ApplyResults, check_results};
use crate::hooks::{HookContext, HookPhase, HookResult, UpgradeHook, default_hooks, run_hooks};
use crate::install::render_and_apply;
use crate::versions::{DEFAULT_VERSIONS_URL, RemoteDocumentFetcher, load_versions_map};

pub const WAIT_INTERVAL: Duration = Duration::from_secs(10);
pub const WAIT_MAX_ATTEMPTS: usize = 60;

pub const INJECTOR_CONFIGMAP: &str = "istio-sidecar-injector";
pub const INJECTOR_SELECTOR: &str = "istio=sidecar-injector";

pub const UPGRADE_SIDECAR_MESSAGE: &str = "To upgrade the Istio data plane, you will need to re-inject it.\n\
If you're using automatic sidecar injection, you can upgrade the sidecar by doing a rolling update for all the pods:\n    \
kubectl rollout restart deployment --namespace <namespace with auto injection>\n\
If you're using manual injection, you can upgrade the sidecar by executing:\n    \
kubectl apply -f < (istioctl kube-inject -f <original application deployment yaml>)";

/// Binary and container to exec for the version of each kind of pod, keyed by
/// the pod's `istio` label
const VERSION_COMMANDS: &[(&str, &str, &str)] = &[
    ("pilot", "/usr/local/bin/pilot-discovery", "discovery"),
    ("citadel", "/usr/local/bin/istio_ca", "citadel"),
    ("galley", "/usr/local/bin/galley", "galley"),
    ("ingressgateway", "/usr/local/bin/pilot-agent", "istio-proxy"),
    ("egressgateway", "/usr/local/bin/pilot-agent", "istio-proxy"),
    ("ilbgateway", "/usr/local/bin/pilot-agent", "istio-proxy"),
    ("telemetry", "/usr/local/bin/mixs", "mixer"),
    ("policy", "/usr/local/bin/mixs", "mixer"),
    ("sidecar-injector", "/usr/local/bin/sidecar-injector", "sidecar-injector-webhook"),
];

/// Version reported by one running control plane pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentVersion {
    pub component: String,
    pub pod: String,
    pub version: String,
}

impl fmt::Display for ComponentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pod - {} - version: {}", self.component, self.pod, self.version)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionOutput {
    client_version: BuildInfo,
}

#[derive(Deserialize)]
struct BuildInfo {
    version: String,
}

/// Versions of every running control plane pod in `namespace`. Pods whose
/// version cannot be read are logged and left out.
pub async fn control_plane_versions(client: &dyn ClusterClient, namespace: &str) -> Result<Vec<ComponentVersion>> {
    let pods = client
        .list_by_selector(&Gvk::new("", "v1", "Pod"), Some(namespace), "istio")
        .await?;

    let mut versions = Vec::new();
    for pod in pods {
        if pod.body.pointer("/status/phase").and_then(Value::as_str) != Some("Running") {
            continue;
        }
        let component = match pod.label("istio") {
            Some("mixer") => pod.label("istio-mixer-type").unwrap_or("mixer"),
            Some(c) => c,
            None => continue,
        };
        let Some(&(_, binary, container)) = VERSION_COMMANDS.iter().find(|(label, _, _)| *label == component) else {
            continue;
        };

        let command = [binary, "version", "-o", "json"].map(str::to_string);
        let output = match client.exec_in_pod(&pod.name, namespace, container, &command).await {
            Ok(out) => out,
            Err(e) => {
                warn!(pod = %pod.name, container, error = %e, "failed to read component version");
                continue;
            }
        };
        match serde_json::from_str::<VersionOutput>(&output.stdout) {
            Ok(v) if !v.client_version.version.is_empty() => versions.push(ComponentVersion {
                component: component.to_string(),
                pod: pod.name.clone(),
                version: v.client_version.version,
            }),
            _ => warn!(pod = %pod.name, stdout = %output.stdout, "unparseable version output"),
        }
    }
    Ok(versions)
}

/// The single version all pods agree on
pub fn coalesce_versions(namespace: &str, versions: &[ComponentVersion]) -> Result<Version> {
    let Some(first) = versions.first() else {
        return Err(KubeError::ControlPlaneNotFound {
            namespace: namespace.to_string(),
        });
    };
    if versions.iter().any(|v| v.version != first.version) {
        return Err(KubeError::MixedVersions {
            versions: versions.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
        });
    }
    Ok(tag_to_version(&first.version)?)
}

/// Values of the running installation, from the sidecar injector ConfigMap
pub async fn current_values(client: &dyn ClusterClient, namespace: &str) -> Result<Value> {
    let maps = client
        .list_by_selector(&Gvk::new("", "v1", "ConfigMap"), Some(namespace), INJECTOR_SELECTOR)
        .await?;
    let raw = maps
        .iter()
        .filter(|cm| cm.name == INJECTOR_CONFIGMAP)
        .find_map(|cm| cm.body.pointer("/data/values").and_then(Value::as_str))
        .ok_or_else(|| KubeError::NotFound {
            kind: "ConfigMap".into(),
            name: format!("{}/{} values", namespace, INJECTOR_CONFIGMAP),
        })?;
    Ok(serde_json::from_str(raw)?)
}

/// Unified diff of two value trees; empty when they are equal
pub fn values_diff(current: &Value, target: &Value) -> Result<String> {
    if current == target {
        return Ok(String::new());
    }
    let a = serde_yaml::to_string(current)?;
    let b = serde_yaml::to_string(target)?;
    Ok(TextDiff::from_lines(&a, &b)
        .unified_diff()
        .header("current", "target")
        .to_string())
}

#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    pub versions_uri: String,
    pub skip_confirmation: bool,
    pub wait: bool,
    /// Skip the version and compatibility checks, and tolerate hook failures
    pub force: bool,
    pub dry_run: bool,
    pub operator_version: Version,
    pub wait_interval: Duration,
    pub wait_attempts: usize,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            versions_uri: DEFAULT_VERSIONS_URL.to_string(),
            skip_confirmation: false,
            wait: false,
            force: false,
            dry_run: false,
            operator_version: operator_version(),
            wait_interval: WAIT_INTERVAL,
            wait_attempts: WAIT_MAX_ATTEMPTS,
        }
    }
}

/// What is about to happen, shown before confirmation
#[derive(Debug, Clone)]
pub struct UpgradePlan {
    pub namespace: String,
    /// `None` when the checks were forced past an unreadable installation
    pub current_version: Option<Version>,
    pub target_version: Version,
    pub components: Vec<ComponentVersion>,
    /// Empty when the values are unchanged
    pub values_diff: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rollout {
    /// Applied, not waited for
    Submitted,
    Completed(Version),
}

#[derive(Debug)]
pub struct UpgradeReport {
    pub plan: UpgradePlan,
    pub results: ApplyResults,
    pub hooks: Vec<HookResult>,
    pub rollout: Rollout,
}

type ConfirmFn = Box<dyn Fn(&UpgradePlan) -> bool + Send + Sync>;

pub struct UpgradeOrchestrator {
    client: Arc<dyn ClusterClient>,
    fetcher: Arc<dyn RemoteDocumentFetcher>,
    hooks: Vec<Box<dyn UpgradeHook>>,
    confirm: ConfirmFn,
    cancel: Cancellation,
}

impl UpgradeOrchestrator {
    /// Uses the default hooks, and refuses to proceed unless confirmation is
    /// skipped or a confirmation callback is set
    pub fn new(client: Arc<dyn ClusterClient>, fetcher: Arc<dyn RemoteDocumentFetcher>) -> Self {
        Self {
            client,
            fetcher,
            hooks: default_hooks(),
            confirm: Box::new(|_| false),
            cancel: Cancellation::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Vec<Box<dyn UpgradeHook>>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_confirmation(mut self, confirm: impl Fn(&UpgradePlan) -> bool + Send + Sync + 'static) -> Self {
        self.confirm = Box::new(confirm);
        self
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Check, confirm, apply and optionally wait for the rollout of `target`
    pub async fn upgrade(
        &self,
        target: &MergedSpec,
        provider: &dyn RendererProvider,
        opts: &UpgradeOptions,
    ) -> Result<UpgradeReport> {
        let client = self.client.as_ref();
        let spec = &target.spec;
        let namespace = spec.default_namespace().to_string();

        let target_version = self.target_version(spec.tag.as_deref().unwrap_or(""), opts)?;
        info!(version = %target_version, "upgrade target version");

        let components = control_plane_versions(client, &namespace).await?;
        for c in &components {
            info!(%c, "control plane component");
        }
        let current_version = match coalesce_versions(&namespace, &components) {
            Ok(v) => Some(v),
            Err(e) if opts.force => {
                warn!(error = %e, "could not determine the current version, continuing (forced)");
                None
            }
            Err(e) => return Err(e),
        };

        let current = match current_values(client, &namespace).await {
            Ok(v) => v,
            Err(e) if opts.force => {
                warn!(error = %e, "could not read the current values, continuing (forced)");
                Value::Null
            }
            Err(e) => return Err(e),
        };

        if let Some(current_version) = &current_version {
            let map = load_versions_map(self.fetcher.as_ref(), &opts.versions_uri).await?;
            match map.check_upgrade(current_version, &target_version) {
                Ok(()) => {}
                Err(e) if opts.force => warn!(error = %e, "skipping compatibility check (forced)"),
                Err(e) => return Err(e.into()),
            }
        }

        let translated = ControlPlaneRenderer::new(spec, provider).translate()?;
        let target_values = overlay_all(std::iter::once(&translated.tree).chain(spec.values.as_ref()));
        let plan = UpgradePlan {
            namespace: namespace.clone(),
            current_version: current_version.clone(),
            target_version: target_version.clone(),
            components,
            values_diff: values_diff(&current, &target_values)?,
        };

        if !opts.skip_confirmation && !(self.confirm)(&plan) {
            return Err(KubeError::Aborted);
        }

        let unknown = Version::new(0, 0, 0);
        let hook_ctx = HookContext {
            client,
            namespace: &namespace,
            current_version: current_version.as_ref().unwrap_or(&unknown),
            target_version: &target_version,
            current_values: &current,
            target_values: &target_values,
            dry_run: opts.dry_run,
        };
        let mut hooks = self.run_phase(HookPhase::PreUpgrade, &hook_ctx, opts.force).await?;

        let ctx = ApplyContext {
            version: target_version.to_string(),
            dry_run: opts.dry_run,
            ..Default::default()
        };
        let install = render_and_apply(Arc::clone(&self.client), spec, provider, &ctx, &self.cancel).await?;
        check_results(&install.results)?;

        hooks.extend(self.run_phase(HookPhase::PostUpgrade, &hook_ctx, opts.force).await?);

        let rollout = if opts.wait && !opts.dry_run {
            Rollout::Completed(self.wait_for_rollout(&namespace, &target_version, opts).await?)
        } else {
            Rollout::Submitted
        };

        Ok(UpgradeReport {
            plan,
            results: install.results,
            hooks,
            rollout,
        })
    }

    fn target_version(&self, tag: &str, opts: &UpgradeOptions) -> Result<Version> {
        let version = match tag_to_version(tag) {
            Ok(v) => v,
            Err(e) if opts.force => {
                warn!(tag, error = %e, "invalid target tag, using the operator version (forced)");
                opts.operator_version.clone()
            }
            Err(e) => return Err(e.into()),
        };
        if version != opts.operator_version {
            if !opts.force {
                return Err(KubeError::VersionMismatch {
                    target: version.to_string(),
                    operator: opts.operator_version.to_string(),
                });
            }
            warn!(target = %version, operator = %opts.operator_version, "target version differs from the operator version");
        }
        Ok(version)
    }

    async fn run_phase(&self, phase: HookPhase, ctx: &HookContext<'_>, force: bool) -> Result<Vec<HookResult>> {
        match run_hooks(&self.hooks, phase, ctx).await {
            Ok(results) => Ok(results),
            Err(e) if force => {
                warn!(error = %e, "ignoring hook failure (forced)");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Poll until every pod reports `target`. On give-up the error carries what
    /// the last attempt saw.
    async fn wait_for_rollout(&self, namespace: &str, target: &Version, opts: &UpgradeOptions) -> Result<Version> {
        let client = self.client.as_ref();
        let mut last_state = String::from("no attempt made");
        for attempt in 1..=opts.wait_attempts {
            self.cancel.sleep(opts.wait_interval).await?;
            let versions = match control_plane_versions(client, namespace).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(attempt, error = %e, "failed to read control plane versions");
                    last_state = e.to_string();
                    continue;
                }
            };
            match coalesce_versions(namespace, &versions) {
                Ok(v) if &v == target => {
                    info!(version = %v, "upgrade rollout completed");
                    return Ok(v);
                }
                _ => {
                    for v in versions.iter().filter(|v| v.version != target.to_string()) {
                        debug!(attempt, %v, target = %target, "component not yet at the target version");
                    }
                    last_state = if versions.is_empty() {
                        format!("no running control plane pods in {}", namespace)
                    } else {
                        versions.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                    };
                }
            }
        }
        Err(KubeError::RolloutUnfinished { last_state })
    }
}
