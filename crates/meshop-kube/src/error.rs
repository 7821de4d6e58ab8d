//! Error types for meshop-kube

use meshop_core::{ComponentName, CoreError};
use meshop_engine::EngineError;
use thiserror::Error;

/// Result type for meshop-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur during cluster operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("conflict updating {kind} {name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    #[error("unknown resource type: {api_version}/{kind}")]
    UnknownResource { api_version: String, kind: String },

    #[error("failed to apply {object}: {message}")]
    ApplyFailed { object: String, message: String },

    /// One entry per failed component
    #[error("failed to apply components:\n{}", format_component_errors(.0))]
    ComponentsFailed(Vec<(ComponentName, String)>),

    #[error("failed to prune resources:\n  {}", .0.join("\n  "))]
    PruneFailed(Vec<String>),

    #[error("dependency cycle involving {0}")]
    DependencyCycle(ComponentName),

    #[error("timed out waiting for {what} after {seconds}s (last observed: {last_state})")]
    PollTimeout {
        what: String,
        seconds: u64,
        last_state: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("exec in pod {pod} failed: {message}")]
    Exec { pod: String, message: String },

    #[error("istio control plane not found in namespace {namespace}")]
    ControlPlaneNotFound { namespace: String },

    #[error("different versions of Istio components found: {versions}")]
    MixedVersions { versions: String },

    #[error("the target version {target} does not match the operator version {operator}")]
    VersionMismatch { target: String, operator: String },

    /// `last_state` lists the pods seen on the final attempt, or why they could not be read
    #[error("upgrade rollout unfinished. Maximum number of attempts exceeded (last observed: {last_state})")]
    RolloutUnfinished { last_state: String },

    #[error("upgrade aborted")]
    Aborted,

    /// Hook execution failed
    #[error("hook '{hook}' failed during {phase}: {message}")]
    HookFailed {
        hook: String,
        phase: String,
        message: String,
    },

    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("invalid selector {selector:?}: {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_component_errors(errors: &[(ComponentName, String)]) -> String {
    errors
        .iter()
        .map(|(c, e)| format!("  {}: {}", c, e))
        .collect::<Vec<_>>()
        .join("\n")
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::NotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        match self {
            KubeError::Conflict { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let nf = KubeError::NotFound {
            kind: "Deployment".into(),
            name: "x".into(),
        };
        assert!(nf.is_not_found());
        assert!(!nf.is_conflict());

        let c = KubeError::Conflict {
            kind: "IstioControlPlane".into(),
            name: "x".into(),
            message: "stale resourceVersion".into(),
        };
        assert!(c.is_conflict());
    }

    #[test]
    fn test_component_errors_display() {
        let e = KubeError::ComponentsFailed(vec![
            (ComponentName::Pilot, "boom".into()),
            (ComponentName::Galley, "bang".into()),
        ]);
        assert_eq!(e.to_string(), "failed to apply components:\n  Pilot: boom\n  Galley: bang");
    }
}
