//! Workload readiness checks used by `--wait`

use std::time::Duration;

use meshop_core::K8sObject;
use tokio::time::Instant;
use tracing::debug;

use crate::cancel::Cancellation;
use crate::client::ClusterClient;
use crate::error::{KubeError, Result};

pub const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Kinds whose readiness is checked
pub fn is_workload(kind: &str) -> bool {
    matches!(kind, "Deployment" | "DaemonSet" | "StatefulSet")
}

/// Readiness of a workload from its live status. `Err` holds the reason it is
/// not ready yet.
pub fn workload_ready(obj: &K8sObject) -> std::result::Result<(), String> {
    let int = |ptr: &str| obj.body.pointer(ptr).and_then(|v| v.as_i64());
    match obj.kind() {
        "Deployment" | "StatefulSet" => {
            let want = int("/spec/replicas").unwrap_or(1);
            let ready = int("/status/readyReplicas").unwrap_or(0);
            if ready >= want {
                Ok(())
            } else {
                Err(format!("{}/{} replicas ready", ready, want))
            }
        }
        "DaemonSet" => {
            let want = int("/status/desiredNumberScheduled").unwrap_or(0);
            let ready = int("/status/numberReady").unwrap_or(0);
            if ready >= want {
                Ok(())
            } else {
                Err(format!("{}/{} pods ready", ready, want))
            }
        }
        _ => Ok(()),
    }
}

/// Poll each workload in `objects` until ready or `timeout` passes
pub async fn wait_for_workloads(
    client: &dyn ClusterClient,
    objects: &[K8sObject],
    timeout: Duration,
    cancel: &Cancellation,
) -> Result<()> {
    let start = Instant::now();
    for obj in objects.iter().filter(|o| is_workload(o.kind())) {
        loop {
            let last_state = match client.get(&obj.gvk, obj.namespace.as_deref(), &obj.name).await? {
                Some(live) => match workload_ready(&live) {
                    Ok(()) => break,
                    Err(reason) => reason,
                },
                None => "not found".to_string(),
            };
            if start.elapsed() >= timeout {
                return Err(KubeError::PollTimeout {
                    what: format!("{}/{}", obj.kind(), obj.name),
                    seconds: timeout.as_secs(),
                    last_state,
                });
            }
            debug!(object = %obj.hash(), state = %last_state, "waiting for readiness");
            cancel.sleep(READINESS_POLL_INTERVAL.min(timeout)).await?;
        }
    }
    Ok(())
}
