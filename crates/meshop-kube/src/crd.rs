//! Waiting for CustomResourceDefinitions to be served

use std::time::Duration;

use meshop_core::{Gvk, K8sObject};
use tokio::time::Instant;
use tracing::debug;

use crate::cancel::Cancellation;
use crate::client::ClusterClient;
use crate::error::{KubeError, Result};

pub const CRD_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const CRD_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

pub fn crd_gvk() -> Gvk {
    Gvk::new("apiextensions.k8s.io", "v1", "CustomResourceDefinition")
}

/// True when the CRD reports `Established=True`
pub fn is_crd_established(crd: &K8sObject) -> bool {
    crd.body
        .pointer("/status/conditions")
        .and_then(|c| c.as_array())
        .is_some_and(|conds| {
            conds.iter().any(|c| {
                c.get("type").and_then(|t| t.as_str()) == Some("Established")
                    && c.get("status").and_then(|s| s.as_str()) == Some("True")
            })
        })
}

/// Poll until every named CRD is established
pub async fn wait_for_crds(
    client: &dyn ClusterClient,
    names: &[String],
    interval: Duration,
    timeout: Duration,
    cancel: &Cancellation,
) -> Result<()> {
    let start = Instant::now();
    let gvk = crd_gvk();

    for name in names {
        loop {
            let state = match client.get(&gvk, None, name).await? {
                Some(crd) if is_crd_established(&crd) => break,
                Some(_) => "not established",
                None => "not found",
            };
            if start.elapsed() >= timeout {
                return Err(KubeError::PollTimeout {
                    what: format!("CRD {}", name),
                    seconds: timeout.as_secs(),
                    last_state: state.to_string(),
                });
            }
            debug!(crd = %name, state, "waiting for CRD");
            cancel.sleep(interval).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FakeClusterClient;

    fn crd(name: &str) -> K8sObject {
        K8sObject::from_yaml(&format!(
            "apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: {}\n",
            name
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_established_after_apply() {
        let client = FakeClusterClient::new();
        client.apply("", &crd("gateways.networking.istio.io"), false).await.unwrap();
        wait_for_crds(
            &client,
            &["gateways.networking.istio.io".to_string()],
            Duration::from_millis(1),
            Duration::from_secs(1),
            &Cancellation::new(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_timeout_reports_last_state() {
        let client = FakeClusterClient::with_objects(vec![crd("rules.config.istio.io")]);
        let err = wait_for_crds(
            &client,
            &["rules.config.istio.io".to_string()],
            Duration::from_millis(1),
            Duration::from_millis(5),
            &Cancellation::new(),
        )
        .await
        .unwrap_err();
        match err {
            KubeError::PollTimeout { last_state, .. } => assert_eq!(last_state, "not established"),
            other => panic!("unexpected error {}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_wait() {
        let client = FakeClusterClient::new();
        let cancel = Cancellation::new();
        cancel.cancel();
        let err = wait_for_crds(&client, &["x".to_string()], CRD_POLL_INTERVAL, CRD_WAIT_TIMEOUT, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::Cancelled));
    }
}
