//! Ownership labels and annotations on everything the operator creates

use std::collections::BTreeMap;

use meshop_core::{ComponentName, K8sObject};

/// Prefix of the ownership metadata keys
pub const METADATA_NAMESPACE: &str = "install.operator.istio.io";

pub const OWNER_NAME_KEY: &str = "install.operator.istio.io/owner-name";
pub const OWNER_KIND_KEY: &str = "install.operator.istio.io/owner-kind";
pub const OWNER_GROUP_KEY: &str = "install.operator.istio.io/owner-group";
pub const CHART_OWNER_KEY: &str = "install.operator.istio.io/chart-owner";
/// Annotation holding the owner generation the object was last applied at
pub const OWNER_GENERATION_KEY: &str = "install.operator.istio.io/owner-generation";

pub const MANAGED_KEY: &str = "operator.istio.io/managed";
pub const MANAGED_VALUE: &str = "Reconcile";
pub const COMPONENT_KEY: &str = "operator.istio.io/component";
pub const VERSION_KEY: &str = "operator.istio.io/version";

/// The custom resource that owns installed objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRef {
    pub name: String,
    pub kind: String,
    pub group: String,
    pub generation: i64,
}

impl OwnerRef {
    /// Labels identifying everything this owner installed
    pub fn labels(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            (OWNER_NAME_KEY, self.name.clone()),
            (OWNER_KIND_KEY, self.kind.clone()),
            (OWNER_GROUP_KEY, self.group.clone()),
        ])
    }

    /// Equality selector over [`OwnerRef::labels`]
    pub fn selector(&self) -> String {
        self.labels()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Stamp the operator labels, plus the owner markings when there is an owner
pub fn mark(obj: &mut K8sObject, component: ComponentName, version: &str, owner: Option<&OwnerRef>) {
    obj.set_label(MANAGED_KEY, MANAGED_VALUE);
    obj.set_label(COMPONENT_KEY, component.as_str());
    obj.set_label(VERSION_KEY, version);

    if let Some(owner) = owner {
        for (k, v) in owner.labels() {
            obj.set_label(k, &v);
        }
        obj.set_label(CHART_OWNER_KEY, component.as_str());
        obj.set_annotation(OWNER_GENERATION_KEY, &owner.generation.to_string());
    }
}

/// The owner generation recorded on `obj`, if any
pub fn owner_generation(obj: &K8sObject) -> Option<i64> {
    obj.annotation(OWNER_GENERATION_KEY)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerRef {
        OwnerRef {
            name: "example-istiocontrolplane".into(),
            kind: "IstioControlPlane".into(),
            group: "install.istio.io".into(),
            generation: 4,
        }
    }

    #[test]
    fn test_mark_with_owner() {
        let mut obj = K8sObject::from_yaml("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: istio\n").unwrap();
        mark(&mut obj, ComponentName::Pilot, "1.3.0", Some(&owner()));

        assert_eq!(obj.label(MANAGED_KEY), Some("Reconcile"));
        assert_eq!(obj.label(COMPONENT_KEY), Some("Pilot"));
        assert_eq!(obj.label(VERSION_KEY), Some("1.3.0"));
        assert_eq!(obj.label(OWNER_NAME_KEY), Some("example-istiocontrolplane"));
        assert_eq!(obj.label(CHART_OWNER_KEY), Some("Pilot"));
        assert_eq!(owner_generation(&obj), Some(4));
    }

    #[test]
    fn test_mark_without_owner() {
        let mut obj = K8sObject::from_yaml("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: istio\n").unwrap();
        mark(&mut obj, ComponentName::Galley, "1.3.0", None);
        assert!(obj.label(OWNER_NAME_KEY).is_none());
        assert_eq!(owner_generation(&obj), None);
    }

    #[test]
    fn test_selector() {
        assert_eq!(
            owner().selector(),
            "install.operator.istio.io/owner-group=install.istio.io,\
             install.operator.istio.io/owner-kind=IstioControlPlane,\
             install.operator.istio.io/owner-name=example-istiocontrolplane"
        );
    }
}
