//! Display formatting for CLI output

use console::style;

use meshop_kube::upgrade::UPGRADE_SIDECAR_MESSAGE;
use meshop_kube::{ApplyResults, ControlPlaneStatus, InstallStatus, ReconcileOutcome, UpgradePlan};

/// Section title underlined to its own width
pub fn heading(title: &str) -> String {
    format!("{}\n{}", title, "=".repeat(title.chars().count()))
}

/// One `Output for component X:` block per component
pub fn apply_results(results: &ApplyResults, verbose: bool) {
    for (component, out) in results {
        println!("\n{}", heading(&format!("Output for component {}:", component)));
        if let Some(error) = &out.error {
            println!("{} {}", style("Error:").red().bold(), error);
        }
        if !out.stderr.trim().is_empty() && out.error.as_deref() != Some(out.stderr.as_str()) {
            println!("{}\n{}", style("Error detail:").red(), out.stderr);
        }
        if !out.stdout.trim().is_empty() {
            println!("Stdout:\n{}", out.stdout);
        }
        if verbose {
            println!("Manifest:\n\n{}", out.manifest);
        }
    }
}

/// What an upgrade is about to change
pub fn upgrade_plan(plan: &UpgradePlan) {
    for c in &plan.components {
        println!("Control Plane - {}", c);
    }
    println!();
    match &plan.current_version {
        Some(v) => println!(
            "Upgrade - current version: {}, target version: {}",
            style(v).yellow(),
            style(&plan.target_version).yellow()
        ),
        None => println!("Upgrade - target version: {}", style(&plan.target_version).yellow()),
    }
    if plan.values_diff.is_empty() {
        println!("Upgrade check: Values unchanged. The target values are identical to the current values.");
    } else {
        println!(
            "{} The following values will be changed as part of upgrade. \
             If you have not overridden these values, they will change in your cluster. \
             Please double check they are correct:\n{}",
            style("Upgrade check: Warning!!!").yellow().bold(),
            plan.values_diff
        );
    }
}

pub fn sidecar_notice() {
    println!("{}", UPGRADE_SIDECAR_MESSAGE);
}

fn status_style(status: InstallStatus) -> console::StyledObject<String> {
    let text = format!("{:?}", status).to_uppercase();
    match status {
        InstallStatus::Healthy => style(text).green(),
        InstallStatus::Error => style(text).red(),
        _ => style(text).yellow(),
    }
}

fn control_plane_status(status: &ControlPlaneStatus) {
    println!("Status: {}", status_style(status.status));
    for (component, s) in &status.component_status {
        match &s.error {
            Some(e) => println!("  {:<16} {} {}", component, status_style(s.status), e),
            None => println!("  {:<16} {}", component, status_style(s.status)),
        }
    }
}

pub fn reconcile_outcome(namespace: &str, name: &str, outcome: &ReconcileOutcome) {
    let target = style(format!("{}/{}", namespace, name)).cyan();
    match outcome {
        ReconcileOutcome::NotFound => println!("{} not found", target),
        ReconcileOutcome::Skipped => println!("{} is being deleted, nothing to do", target),
        ReconcileOutcome::FinalizerAdded => println!("{} finalizer added", target),
        ReconcileOutcome::Deleted { pruned } => {
            println!("{} deleted, {} resource(s) pruned", target, pruned)
        }
        ReconcileOutcome::Reconciled(status) => {
            println!("{} reconciled", target);
            control_plane_status(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_underline() {
        assert_eq!(heading("Output for component Base:"), "Output for component Base:\n==========================");
    }
}
