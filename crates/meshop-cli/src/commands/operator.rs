//! Operator command - reconcile one control plane resource

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use console::style;
use tracing::info;

use meshop_kube::{Cancellation, KubeError, Reconciler};

use crate::commands::{charts_dir, connect};
use crate::display;
use crate::error::Result;
use crate::ClusterArgs;

pub async fn run(
    cluster: &ClusterArgs,
    charts: Option<&Path>,
    namespace: &str,
    name: &str,
    interval: Duration,
    once: bool,
    wait: bool,
) -> Result<()> {
    let provider = charts_dir(charts)?;
    let client = connect(cluster).await?;

    let cancel = Cancellation::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, stopping after the current step");
            on_signal.cancel();
        }
    });

    let reconciler = Reconciler::new(client, Arc::new(provider))
        .with_cancellation(cancel)
        .with_wait(wait);

    if once {
        let outcome = reconciler.reconcile(namespace, name).await?;
        display::reconcile_outcome(namespace, name, &outcome);
        return Ok(());
    }

    println!(
        "{} Reconciling {} every {}",
        style("→").blue().bold(),
        style(format!("{}/{}", namespace, name)).cyan(),
        humantime::format_duration(interval)
    );
    match reconciler.run(namespace, name, interval).await {
        Ok(()) | Err(KubeError::Cancelled) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
