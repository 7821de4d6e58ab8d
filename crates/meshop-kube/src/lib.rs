//! meshop Kube - cluster side of meshop
//!
//! This crate provides:
//! - **Cluster client**: a small trait over the API server, with a live `kube`
//!   implementation, a dry-run stand-in that never leaves the process and an
//!   in-memory fake for tests
//! - **Dependency graph executor**: components applied concurrently, children
//!   only after their parents
//! - **Reconcile loop**: control plane resources driven to their desired state,
//!   with ownership markings and generation-based prune
//! - **Upgrades**: version discovery, compatibility checks, hooks and rollout wait
//! - **Manifest diff**: object-level comparison of two manifest sets

pub mod cancel;
pub mod client;
pub mod crd;
pub mod diff;
pub mod dry_run;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod install;
pub mod kube_client;
pub mod markings;
pub mod mock;
pub mod order;
pub mod prune;
pub mod readiness;
pub mod reconcile;
pub mod upgrade;
pub mod versions;

pub use cancel::Cancellation;
pub use client::{ApplyAction, ClusterClient, ExecOutput};
pub use diff::{DiffOptions, ObjectSelector, diff_manifests, diff_paths, read_manifests};
pub use dry_run::DryRunClusterClient;
pub use error::{KubeError, Result};
pub use executor::{
    ApplyContext, ApplyResults, ApplyState, ComponentApplyOutput, DependencyGraphExecutor,
    DependencyTree, check_results,
};
pub use hooks::{HookContext, HookPhase, HookResult, UpgradeHook, default_hooks};
pub use install::{InstallReport, render_and_apply};
pub use kube_client::KubeClusterClient;
pub use markings::OwnerRef;
pub use mock::{FakeClusterClient, OperationCounts};
pub use prune::{PruneReport, prune};
pub use reconcile::{ControlPlaneStatus, InstallStatus, ReconcileOutcome, Reconciler};
pub use upgrade::{
    Rollout, UpgradeOptions, UpgradeOrchestrator, UpgradePlan, UpgradeReport, values_diff,
};
pub use versions::{DefaultFetcher, RemoteDocumentFetcher, load_versions_map};
