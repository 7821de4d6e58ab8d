//! The cluster operations meshop needs
//!
//! Everything above this trait works on [`K8sObject`]s, so the reconcile loop,
//! executor and upgrade logic run unchanged against a live cluster
//! ([`crate::KubeClusterClient`]) or the in-memory [`crate::FakeClusterClient`].

use async_trait::async_trait;
use meshop_core::{Gvk, K8sObject};

use crate::error::Result;

/// What an apply did to the object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
    Created,
    Configured,
}

impl ApplyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyAction::Created => "created",
            ApplyAction::Configured => "configured",
        }
    }
}

/// Output of a command run inside a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create or update `object`. Namespaced objects without a namespace land in
    /// `namespace`. With `dry_run` nothing is sent; the intended action is
    /// logged and reported as a create.
    async fn apply(&self, namespace: &str, object: &K8sObject, dry_run: bool) -> Result<ApplyAction>;

    async fn get(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Result<Option<K8sObject>>;

    /// Replace the object; fails with a conflict if its resourceVersion is stale
    async fn update(&self, object: &K8sObject) -> Result<K8sObject>;

    /// Replace the object's status subresource
    async fn update_status(&self, object: &K8sObject) -> Result<K8sObject>;

    /// Delete the object. Deleting an absent object succeeds.
    async fn delete(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Result<()>;

    /// List objects of `gvk` matching a label selector (`a=b,c`).
    /// `namespace` of `None` lists across all namespaces.
    async fn list_by_selector(&self, gvk: &Gvk, namespace: Option<&str>, selector: &str) -> Result<Vec<K8sObject>>;

    async fn exec_in_pod(&self, pod: &str, namespace: &str, container: &str, command: &[String]) -> Result<ExecOutput>;
}

/// One selector term: `key=value`, or a bare `key` that must merely exist
pub type SelectorTerm = (String, Option<String>);

/// Parse a label selector (`a=b,c==d,e`). Empty means "everything".
pub fn parse_selector(selector: &str) -> Result<Vec<SelectorTerm>> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|term| {
            let (key, value) = match term.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim_start_matches('=').trim().to_string())),
                None => (term, None),
            };
            if key.is_empty() {
                return Err(crate::KubeError::InvalidSelector {
                    selector: selector.to_string(),
                    message: format!("term {:?} has no key", term),
                });
            }
            Ok((key.to_string(), value))
        })
        .collect()
}

/// True when `object` satisfies every term
pub fn matches_selector(object: &K8sObject, terms: &[SelectorTerm]) -> bool {
    terms.iter().all(|(k, v)| match v {
        Some(v) => object.label(k) == Some(v.as_str()),
        None => object.label(k).is_some(),
    })
}
