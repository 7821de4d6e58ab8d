//! Kubernetes objects inside rendered manifests

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// Group, version and kind of an object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Split an apiVersion: `apps/v1` has group `apps`, `v1` is the core group
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.rsplit_once('/') {
            Some((g, v)) => Self::new(g, v, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// One object from a manifest, with its identifying fields pulled out
#[derive(Debug, Clone, PartialEq)]
pub struct K8sObject {
    pub gvk: Gvk,
    pub name: String,
    pub namespace: Option<String>,
    pub body: Value,
}

impl K8sObject {
    pub fn from_value(body: Value) -> Result<Self> {
        let invalid = |message: &str| CoreError::InvalidManifest {
            message: message.to_string(),
        };
        if !body.is_object() {
            return Err(invalid("object is not a map"));
        }
        let api_version = body
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("object has no apiVersion"))?;
        let kind = body
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("object has no kind"))?;
        let metadata = body.get("metadata");
        let name = metadata
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::InvalidManifest {
                message: format!("{} has no metadata.name", kind),
            })?
            .to_string();
        let namespace = metadata
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);

        Ok(Self {
            gvk: Gvk::from_api_version(api_version, kind),
            name,
            namespace,
            body,
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_value(serde_yaml::from_str(yaml)?)
    }

    pub fn kind(&self) -> &str {
        &self.gvk.kind
    }

    /// Identity used for matching and diffing: `kind:namespace:name`
    pub fn hash(&self) -> String {
        object_hash(&self.gvk.kind, self.namespace.as_deref().unwrap_or(""), &self.name)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.body)?)
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map("labels")
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.string_map("annotations")
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.body.pointer(&format!("/metadata/labels/{}", escape_pointer(key)))?.as_str()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.body
            .pointer(&format!("/metadata/annotations/{}", escape_pointer(key)))?
            .as_str()
    }

    pub fn set_label(&mut self, key: &str, value: &str) {
        self.metadata_map("labels").insert(key.to_string(), Value::String(value.to_string()));
    }

    pub fn set_annotation(&mut self, key: &str, value: &str) {
        self.metadata_map("annotations")
            .insert(key.to_string(), Value::String(value.to_string()));
    }

    /// Fill in `metadata.namespace` for namespaced objects that have none
    pub fn default_namespace(&mut self, namespace: &str) {
        if self.namespace.is_none() && !namespace.is_empty() && !is_cluster_scoped(self.kind()) {
            self.namespace = Some(namespace.to_string());
            self.metadata_mut()
                .insert("namespace".into(), Value::String(namespace.to_string()));
        }
    }

    fn string_map(&self, field: &str) -> BTreeMap<String, String> {
        self.body
            .get("metadata")
            .and_then(|m| m.get(field))
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        let root = ensure_map(&mut self.body);
        ensure_map(root.entry("metadata").or_insert_with(|| Value::Object(Map::new())))
    }

    fn metadata_map(&mut self, field: &str) -> &mut Map<String, Value> {
        ensure_map(
            self.metadata_mut()
                .entry(field)
                .or_insert_with(|| Value::Object(Map::new())),
        )
    }
}

fn ensure_map(v: &mut Value) -> &mut Map<String, Value> {
    if !v.is_object() {
        *v = Value::Object(Map::new());
    }
    match v {
        Value::Object(m) => m,
        _ => unreachable!("value was just replaced with a map"),
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// `kind:namespace:name`
pub fn object_hash(kind: &str, namespace: &str, name: &str) -> String {
    format!("{}:{}:{}", kind, namespace, name)
}

/// Kinds that are never namespaced
pub fn is_cluster_scoped(kind: &str) -> bool {
    matches!(
        kind,
        "CustomResourceDefinition"
            | "Namespace"
            | "ClusterRole"
            | "ClusterRoleBinding"
            | "MutatingWebhookConfiguration"
            | "ValidatingWebhookConfiguration"
            | "PodSecurityPolicy"
            | "PriorityClass"
            | "StorageClass"
            | "MeshPolicy"
    )
}

/// Split a multi-document manifest into objects.
///
/// Documents are separated by `---` lines. Empty and comment-only documents
/// (such as the disabled-component marker) are skipped.
pub fn parse_manifest(manifest: &str) -> Result<Vec<K8sObject>> {
    let mut objects = Vec::new();

    for (index, doc) in split_documents(manifest).into_iter().enumerate() {
        if doc
            .lines()
            .all(|l| l.trim().is_empty() || l.trim().starts_with('#'))
        {
            continue;
        }

        let value: Value = serde_yaml::from_str(&doc).map_err(|e| CoreError::InvalidManifest {
            message: format!("document {}: {}", index, e),
        })?;
        if value.is_null() {
            continue;
        }
        // List kinds carry their objects in `items`
        if value.get("kind").and_then(Value::as_str).is_some_and(|k| k.ends_with("List")) {
            if let Some(items) = value.get("items").and_then(Value::as_array) {
                for item in items {
                    objects.push(K8sObject::from_value(item.clone())?);
                }
                continue;
            }
        }
        objects.push(K8sObject::from_value(value)?);
    }

    Ok(objects)
}

fn split_documents(manifest: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();
    for line in manifest.lines() {
        if line.trim_end() == "---" || line.starts_with("--- ") {
            docs.push(std::mem::take(&mut current));
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    docs.push(current);
    docs
}

/// Serialize objects back to one manifest, each document ending in `---`
pub fn objects_to_manifest(objects: &[K8sObject]) -> Result<String> {
    let mut out = String::new();
    for obj in objects {
        out.push_str(&obj.to_yaml()?);
        out.push_str("---\n");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"# Source: pilot
apiVersion: apps/v1
kind: Deployment
metadata:
  name: istio-pilot
  namespace: istio-system
  labels:
    app: pilot
---
# a comment-only document
---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: istio-pilot-service-account
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: with-dashes
data:
  script: |
    echo ---not a separator
"#;

    #[test]
    fn test_parse_manifest() {
        let objects = parse_manifest(MANIFEST).unwrap();
        assert_eq!(objects.len(), 3);

        assert_eq!(objects[0].gvk, Gvk::new("apps", "v1", "Deployment"));
        assert_eq!(objects[0].hash(), "Deployment:istio-system:istio-pilot");
        assert_eq!(objects[0].label("app"), Some("pilot"));

        assert_eq!(objects[1].gvk.api_version(), "v1");
        assert_eq!(objects[1].hash(), "ServiceAccount::istio-pilot-service-account");

        assert!(objects[2].body["data"]["script"].as_str().unwrap().contains("---not"));
    }

    #[test]
    fn test_disabled_marker_parses_to_nothing() {
        assert!(parse_manifest("# Pilot component is disabled.\n").unwrap().is_empty());
        assert!(parse_manifest("").unwrap().is_empty());
    }

    #[test]
    fn test_missing_name_is_an_error() {
        let err = parse_manifest("apiVersion: v1\nkind: Service\nmetadata: {}\n").unwrap_err();
        assert_eq!(err.to_string(), "invalid manifest: Service has no metadata.name");
    }

    #[test]
    fn test_list_kinds_are_flattened() {
        let objects = parse_manifest(
            r#"
apiVersion: v1
kind: List
items:
  - apiVersion: v1
    kind: Service
    metadata: {name: a}
  - apiVersion: v1
    kind: Service
    metadata: {name: b}
"#,
        )
        .unwrap();
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn test_labels_and_namespace_defaulting() {
        let mut obj = K8sObject::from_yaml("apiVersion: v1\nkind: Service\nmetadata:\n  name: s\n").unwrap();
        obj.set_label("operator.istio.io/component", "Pilot");
        obj.set_annotation("install.operator.istio.io/owner-generation", "3");
        obj.default_namespace("istio-system");

        assert_eq!(obj.label("operator.istio.io/component"), Some("Pilot"));
        assert_eq!(obj.annotation("install.operator.istio.io/owner-generation"), Some("3"));
        assert_eq!(obj.namespace.as_deref(), Some("istio-system"));
        assert_eq!(obj.body["metadata"]["namespace"], "istio-system");

        let mut crd = K8sObject::from_yaml(
            "apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: x\n",
        )
        .unwrap();
        crd.default_namespace("istio-system");
        assert!(crd.namespace.is_none());
    }

    #[test]
    fn test_objects_to_manifest_roundtrip() {
        let objects = parse_manifest(MANIFEST).unwrap();
        let again = parse_manifest(&objects_to_manifest(&objects).unwrap()).unwrap();
        assert_eq!(objects, again);
    }
}
