//! Manifest commands - generate, apply and diff

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use console::style;

use meshop_core::version::OPERATOR_VERSION;
use meshop_engine::ControlPlaneRenderer;
use meshop_kube::{
    ApplyContext, Cancellation, ClusterClient, DiffOptions, DryRunClusterClient, check_results, diff_paths,
    render_and_apply,
};

use crate::commands::{chart_provider, connect, merged_spec};
use crate::display;
use crate::error::Result;
use crate::{ClusterArgs, SpecArgs};

pub fn generate(args: &SpecArgs, output: Option<&Path>) -> Result<()> {
    let merged = merged_spec(args)?;
    let provider = chart_provider(&merged, args.charts.as_deref())?;
    let manifests = ControlPlaneRenderer::new(&merged.spec, &provider).render()?;

    let mut sorted: Vec<(String, &String)> = manifests.iter().map(|(c, m)| (c.to_string(), m)).collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    match output {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            for (component, manifest) in &sorted {
                fs::write(dir.join(format!("{}.yaml", component)), manifest)?;
            }
            eprintln!(
                "{} Wrote {} manifests to {}",
                style("✓").green().bold(),
                sorted.len(),
                style(dir.display()).cyan()
            );
        }
        None => {
            for (_, manifest) in &sorted {
                println!("{}", manifest.trim_end());
            }
        }
    }
    Ok(())
}

pub async fn apply(
    args: &SpecArgs,
    cluster: &ClusterArgs,
    dry_run: bool,
    verbose: bool,
    wait: bool,
    readiness_timeout: Duration,
) -> Result<()> {
    let merged = merged_spec(args)?;
    let provider = chart_provider(&merged, args.charts.as_deref())?;
    // a dry run never talks to the cluster, so it needs no kubeconfig either
    let client: Arc<dyn ClusterClient> = if dry_run {
        Arc::new(DryRunClusterClient::new())
    } else {
        connect(cluster).await?
    };

    let ctx = ApplyContext {
        version: OPERATOR_VERSION.to_string(),
        dry_run,
        wait,
        readiness_timeout,
        ..Default::default()
    };
    let cancel = Cancellation::new();
    let report = render_and_apply(client, &merged.spec, &provider, &ctx, &cancel).await?;

    display::apply_results(&report.results, verbose);
    check_results(&report.results)?;
    Ok(())
}

/// Print the differences between two manifest sets. `true` when identical.
pub fn diff(a: &Path, b: &Path, recursive: bool, opts: &DiffOptions) -> Result<bool> {
    let diff = diff_paths(a, b, recursive, opts)?;
    if diff.is_empty() {
        println!("Manifests are identical");
        Ok(true)
    } else {
        println!("Difference of manifests are:\n{}", diff);
        Ok(false)
    }
}
