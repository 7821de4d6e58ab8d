//! CLI commands

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use meshop_core::{ConfigMerger, MergedSpec};
use meshop_engine::ChartRendererProvider;
use meshop_kube::{ClusterClient, KubeClusterClient};

use crate::error::{CliError, Result};
use crate::{ClusterArgs, SpecArgs};

pub mod manifest;
pub mod operator;
pub mod profile;
pub mod upgrade;

/// Profile, overlay file and `--set` entries merged and validated
pub fn merged_spec(args: &SpecArgs) -> Result<MergedSpec> {
    Ok(ConfigMerger::new().generate(args.filename.as_deref(), &args.set)?)
}

/// Charts come from the spec's `installPackagePath`, else from `--charts`
pub fn chart_provider(merged: &MergedSpec, charts: Option<&Path>) -> Result<ChartRendererProvider> {
    let provider = match merged.spec.install_package_path.as_deref().filter(|p| !p.is_empty()) {
        Some(path) => ChartRendererProvider::from_install_package_path(path)?,
        None => charts_dir(charts)?,
    };
    debug!(root = %provider.root().display(), "using install package");
    Ok(provider)
}

pub fn charts_dir(charts: Option<&Path>) -> Result<ChartRendererProvider> {
    let path = charts.map(|p| p.to_string_lossy().to_string()).unwrap_or_default();
    Ok(ChartRendererProvider::from_install_package_path(&path)?)
}

pub async fn connect(cluster: &ClusterArgs) -> Result<Arc<dyn ClusterClient>> {
    let client = KubeClusterClient::connect(cluster.kubeconfig.as_deref(), cluster.context.as_deref())
        .await
        .map_err(|e| CliError::Cluster {
            message: format!("failed to connect to the cluster: {}", e),
        })?;
    Ok(Arc::new(client))
}
