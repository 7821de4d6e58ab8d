//! Checks run around an upgrade
//!
//! Hooks are plain trait objects registered with the orchestrator. A failing
//! pre-upgrade hook aborts the upgrade before anything is applied; a failing
//! post-upgrade hook fails the upgrade after the apply.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use semver::Version;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use meshop_core::Gvk;

use crate::client::ClusterClient;
use crate::error::{KubeError, Result};

/// When a hook runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPhase {
    PreUpgrade,
    PostUpgrade,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookPhase::PreUpgrade => "pre-upgrade",
            HookPhase::PostUpgrade => "post-upgrade",
        })
    }
}

/// What a hook gets to look at
pub struct HookContext<'a> {
    pub client: &'a dyn ClusterClient,
    pub namespace: &'a str,
    pub current_version: &'a Version,
    pub target_version: &'a Version,
    pub current_values: &'a Value,
    pub target_values: &'a Value,
    pub dry_run: bool,
}

#[async_trait]
pub trait UpgradeHook: Send + Sync {
    fn name(&self) -> &str;

    fn phase(&self) -> HookPhase;

    /// `Err` carries the reason the upgrade must not continue
    async fn run(&self, ctx: &HookContext<'_>) -> std::result::Result<(), String>;
}

/// Result of executing a hook
#[derive(Debug, Clone, Serialize)]
pub struct HookResult {
    pub name: String,
    pub phase: HookPhase,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl HookResult {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Run every hook registered for `phase`, in order, stopping at the first
/// failure
pub async fn run_hooks(
    hooks: &[Box<dyn UpgradeHook>],
    phase: HookPhase,
    ctx: &HookContext<'_>,
) -> Result<Vec<HookResult>> {
    let mut results = Vec::new();
    for hook in hooks.iter().filter(|h| h.phase() == phase) {
        let started_at = Utc::now();
        info!(hook = hook.name(), %phase, "running hook");
        let outcome = hook.run(ctx).await;
        let result = HookResult {
            name: hook.name().to_string(),
            phase,
            error: outcome.as_ref().err().cloned(),
            started_at,
            completed_at: Utc::now(),
        };
        results.push(result);

        if let Err(message) = outcome {
            warn!(hook = hook.name(), %phase, error = %message, "hook failed");
            return Err(KubeError::HookFailed {
                hook: hook.name().to_string(),
                phase: phase.to_string(),
                message,
            });
        }
    }
    Ok(results)
}

/// Refuses to upgrade while the CRD install job of an earlier release is still
/// present in the namespace
pub struct InitCrdJobCheck;

pub const INIT_CRD_POD_MARKER: &str = "istio-init-crd";

#[async_trait]
impl UpgradeHook for InitCrdJobCheck {
    fn name(&self) -> &str {
        "init-crd-job-check"
    }

    fn phase(&self) -> HookPhase {
        HookPhase::PreUpgrade
    }

    async fn run(&self, ctx: &HookContext<'_>) -> std::result::Result<(), String> {
        let pods = ctx
            .client
            .list_by_selector(&Gvk::new("", "v1", "Pod"), Some(ctx.namespace), "")
            .await
            .map_err(|e| e.to_string())?;
        match pods.iter().find(|p| p.name.contains(INIT_CRD_POD_MARKER)) {
            Some(pod) => Err(format!(
                "pod {} from the istio-init chart is still present in {}; \
                 remove the istio-init release before upgrading",
                pod.name, ctx.namespace
            )),
            None => Ok(()),
        }
    }
}

/// Hooks every upgrade runs
pub fn default_hooks() -> Vec<Box<dyn UpgradeHook>> {
    vec![Box::new(InitCrdJobCheck)]
}
