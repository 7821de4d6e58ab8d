//! Upgrade command - move a running control plane to this operator's version

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use console::style;

use meshop_core::version::OPERATOR_VERSION;
use meshop_kube::{DefaultFetcher, Rollout, UpgradeOptions, UpgradeOrchestrator, UpgradePlan};

use crate::commands::{chart_provider, connect, merged_spec};
use crate::display;
use crate::error::Result;
use crate::{ClusterArgs, SpecArgs};

const CONFIRM_PROMPT: &str = "Confirm to proceed [y/N]?";

/// Show the plan and ask on stdin. Anything but `y`/`yes` declines.
fn confirm(plan: &UpgradePlan) -> bool {
    display::upgrade_plan(plan);
    print!("{} ", CONFIRM_PROMPT);
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    is_yes(&answer)
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

pub async fn run(args: &SpecArgs, cluster: &ClusterArgs, opts: UpgradeOptions) -> Result<()> {
    println!("Client - meshop version: {}", style(OPERATOR_VERSION).yellow());

    let merged = merged_spec(args)?;
    let provider = chart_provider(&merged, args.charts.as_deref())?;
    let client = connect(cluster).await?;
    let fetcher = DefaultFetcher::new()?;

    let report = UpgradeOrchestrator::new(client, Arc::new(fetcher))
        .with_confirmation(confirm)
        .upgrade(&merged, &provider, &opts)
        .await?;

    if opts.skip_confirmation {
        display::upgrade_plan(&report.plan);
    }
    match report.rollout {
        Rollout::Submitted => {
            println!(
                "{} Upgrade submitted. Check the control plane pods to follow the rollout.",
                style("✓").green().bold()
            );
        }
        Rollout::Completed(version) => {
            println!(
                "{} Success. Now the Istio control plane is running at version {}.",
                style("✓").green().bold(),
                style(version).yellow()
            );
        }
    }
    display::sidecar_notice();
    Ok(())
}
