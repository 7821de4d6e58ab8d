//! Typed control plane specification
//!
//! Every field is optional so that partial documents (a user overlay, a single
//! `--set` entry) parse on their own. Unknown fields are rejected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};
use crate::names::{ComponentName, FeatureName};

/// The `spec` of an IstioControlPlane resource, and the document profiles and
/// overlays are written in
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ControlPlaneSpec {
    /// Builtin profile name or path to a profile file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Root directory holding the component charts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_package_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<FeatureSpec<BaseComponents>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_management: Option<FeatureSpec<TrafficManagementComponents>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<FeatureSpec<PolicyComponents>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<FeatureSpec<TelemetryComponents>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<FeatureSpec<SecurityComponents>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_management: Option<FeatureSpec<ConfigManagementComponents>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_injection: Option<FeatureSpec<AutoInjectionComponents>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateways: Option<FeatureSpec<GatewayComponents>>,

    /// Chart values, checked against the validation table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<JsonValue>,

    /// Chart values passed through unchecked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unvalidated_values: Option<JsonValue>,
}

/// A feature group: one enablement flag and its components
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FeatureSpec<C> {
    #[serde(default, deserialize_with = "lenient::opt_bool", skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<C>,
}

macro_rules! feature_components {
    ($(#[$meta:meta])* $name:ident { $($field:ident),* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase", deny_unknown_fields)]
        pub struct $name {
            /// Namespace shared by every component of the feature
            #[serde(default, skip_serializing_if = "Option::is_none")]
            pub namespace: Option<String>,
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<ComponentSpec>,
            )*
        }
    };
}

feature_components!(BaseComponents { crds });
feature_components!(TrafficManagementComponents { pilot });
feature_components!(PolicyComponents { policy });
feature_components!(TelemetryComponents { telemetry });
feature_components!(SecurityComponents { citadel, cert_manager, node_agent });
feature_components!(ConfigManagementComponents { galley });
feature_components!(AutoInjectionComponents { injector });

/// Gateways are named lists, one entry per deployed gateway
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GatewayComponents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_gateway: Option<Vec<ComponentSpec>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_gateway: Option<Vec<ComponentSpec>>,
}

/// Settings for one installable unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ComponentSpec {
    /// Instance name, used by gateway entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Unset defers to the feature flag
    #[serde(default, deserialize_with = "lenient::opt_bool", skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s: Option<KubernetesResourceSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unvalidated_values: Option<JsonValue>,
}

/// Kubernetes settings of a component's workload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KubernetesResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<JsonValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hpa_spec: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_disruption_budget: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_annotations: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<JsonValue>,

    #[serde(default, deserialize_with = "lenient::opt_u32", skip_serializing_if = "Option::is_none")]
    pub replica_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<JsonValue>,

    /// Patches applied to rendered objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlays: Option<Vec<K8sObjectOverlay>>,
}

/// Patches for one rendered object, addressed by kind and name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct K8sObjectOverlay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub patches: Vec<OverlayPatch>,
}

/// Set `value` at `path`; a null or missing value deletes the field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverlayPatch {
    pub path: String,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub value: JsonValue,
}

/// One renderable instance of a component
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentInstance<'a> {
    pub component: ComponentName,
    /// Gateway entry name, `None` for singleton components
    pub instance: Option<String>,
    pub spec: Option<&'a ComponentSpec>,
}

/// Typed scalars that also accept their string form, as written by `--set`
mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar<T> {
        Typed(T),
        Text(String),
    }

    fn parse<'de, D, T>(d: D, what: &str) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + std::str::FromStr,
    {
        match Option::<Scalar<T>>::deserialize(d)? {
            None => Ok(None),
            Some(Scalar::Typed(v)) => Ok(Some(v)),
            Some(Scalar::Text(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("invalid {} {:?}", what, s))),
        }
    }

    pub fn opt_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        parse(d, "boolean")
    }

    pub fn opt_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
        parse(d, "integer")
    }
}

impl ControlPlaneSpec {
    /// Parse a spec document, rejecting unknown fields
    pub fn from_value(value: &JsonValue) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone()).map_err(|e| CoreError::InvalidSpec {
            message: e.to_string(),
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = if yaml.trim().is_empty() {
            JsonValue::Null
        } else {
            serde_yaml::from_str(yaml)?
        };
        Self::from_value(&value)
    }

    pub fn to_value(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Namespace used for anything that sets none, `istio-system` when unset
    pub fn default_namespace(&self) -> &str {
        self.default_namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// The feature's `enabled` flag as written
    pub fn feature_enabled(&self, feature: FeatureName) -> Option<bool> {
        match feature {
            FeatureName::Base => self.base.as_ref().and_then(|f| f.enabled),
            FeatureName::TrafficManagement => self.traffic_management.as_ref().and_then(|f| f.enabled),
            FeatureName::Policy => self.policy.as_ref().and_then(|f| f.enabled),
            FeatureName::Telemetry => self.telemetry.as_ref().and_then(|f| f.enabled),
            FeatureName::Security => self.security.as_ref().and_then(|f| f.enabled),
            FeatureName::ConfigManagement => self.config_management.as_ref().and_then(|f| f.enabled),
            FeatureName::AutoInjection => self.auto_injection.as_ref().and_then(|f| f.enabled),
            FeatureName::Gateways => self.gateways.as_ref().and_then(|f| f.enabled),
        }
    }

    /// The feature's `components.namespace` as written
    pub fn feature_namespace(&self, feature: FeatureName) -> Option<&str> {
        fn ns<C>(f: &Option<FeatureSpec<C>>, get: impl Fn(&C) -> &Option<String>) -> Option<&str> {
            f.as_ref()?.components.as_ref().and_then(|c| get(c).as_deref())
        }
        match feature {
            FeatureName::Base => ns(&self.base, |c| &c.namespace),
            FeatureName::TrafficManagement => ns(&self.traffic_management, |c| &c.namespace),
            FeatureName::Policy => ns(&self.policy, |c| &c.namespace),
            FeatureName::Telemetry => ns(&self.telemetry, |c| &c.namespace),
            FeatureName::Security => ns(&self.security, |c| &c.namespace),
            FeatureName::ConfigManagement => ns(&self.config_management, |c| &c.namespace),
            FeatureName::AutoInjection => ns(&self.auto_injection, |c| &c.namespace),
            FeatureName::Gateways => ns(&self.gateways, |c| &c.namespace),
        }
    }

    /// Settings of a singleton component. Gateways return `None`; use
    /// [`ControlPlaneSpec::gateways`] for those.
    pub fn component(&self, component: ComponentName) -> Option<&ComponentSpec> {
        fn comp<C>(
            f: &Option<FeatureSpec<C>>,
            get: impl Fn(&C) -> &Option<ComponentSpec>,
        ) -> Option<&ComponentSpec> {
            f.as_ref()?.components.as_ref().and_then(|c| get(c).as_ref())
        }
        match component {
            ComponentName::Base => comp(&self.base, |c| &c.crds),
            ComponentName::Pilot => comp(&self.traffic_management, |c| &c.pilot),
            ComponentName::Policy => comp(&self.policy, |c| &c.policy),
            ComponentName::Telemetry => comp(&self.telemetry, |c| &c.telemetry),
            ComponentName::Citadel => comp(&self.security, |c| &c.citadel),
            ComponentName::CertManager => comp(&self.security, |c| &c.cert_manager),
            ComponentName::NodeAgent => comp(&self.security, |c| &c.node_agent),
            ComponentName::Galley => comp(&self.config_management, |c| &c.galley),
            ComponentName::SidecarInjector => comp(&self.auto_injection, |c| &c.injector),
            ComponentName::IngressGateway | ComponentName::EgressGateway => None,
        }
    }

    /// Gateway entries of one kind, in declaration order
    pub fn gateways(&self, component: ComponentName) -> &[ComponentSpec] {
        let Some(components) = self.gateways.as_ref().and_then(|g| g.components.as_ref()) else {
            return &[];
        };
        let list = match component {
            ComponentName::IngressGateway => &components.ingress_gateway,
            ComponentName::EgressGateway => &components.egress_gateway,
            _ => return &[],
        };
        list.as_deref().unwrap_or(&[])
    }

    /// Every instance to render, in render order.
    ///
    /// Singletons always yield one instance, configured or not. Gateway kinds
    /// yield one instance per entry.
    pub fn instances(&self) -> Vec<ComponentInstance<'_>> {
        let mut out = Vec::new();
        for component in ComponentName::ALL {
            if component.is_gateway() {
                for gw in self.gateways(component) {
                    let name = gw
                        .name
                        .clone()
                        .or_else(|| component.default_instance_name().map(str::to_string));
                    out.push(ComponentInstance {
                        component,
                        instance: name,
                        spec: Some(gw),
                    });
                }
            } else {
                out.push(ComponentInstance {
                    component,
                    instance: None,
                    spec: self.component(component),
                });
            }
        }
        out
    }
}

/// Namespace used when the spec sets none
pub const DEFAULT_NAMESPACE: &str = "istio-system";

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"
hub: docker.io/istio
tag: 1.3.0
trafficManagement:
  enabled: true
  components:
    namespace: istio-control
    pilot:
      k8s:
        replicaCount: 2
security:
  enabled: false
  components:
    nodeAgent:
      enabled: true
gateways:
  enabled: true
  components:
    ingressGateway:
      - name: istio-ingressgateway
      - name: ilb-gateway
        namespace: internal
    egressGateway:
      - enabled: false
"#;

    #[test]
    fn test_parse_and_accessors() {
        let spec = ControlPlaneSpec::from_yaml(SPEC).unwrap();

        assert_eq!(spec.feature_enabled(FeatureName::TrafficManagement), Some(true));
        assert_eq!(spec.feature_enabled(FeatureName::Policy), None);
        assert_eq!(spec.feature_namespace(FeatureName::TrafficManagement), Some("istio-control"));
        assert_eq!(
            spec.component(ComponentName::Pilot)
                .and_then(|c| c.k8s.as_ref())
                .and_then(|k| k.replica_count),
            Some(2)
        );
        assert_eq!(
            spec.component(ComponentName::NodeAgent).and_then(|c| c.enabled),
            Some(true)
        );
        assert_eq!(spec.gateways(ComponentName::IngressGateway).len(), 2);
        assert_eq!(spec.default_namespace(), DEFAULT_NAMESPACE);
    }

    #[test]
    fn test_instances_expand_gateways() {
        let spec = ControlPlaneSpec::from_yaml(SPEC).unwrap();
        let instances = spec.instances();

        let gateways: Vec<_> = instances
            .iter()
            .filter(|i| i.component.is_gateway())
            .map(|i| (i.component, i.instance.clone().unwrap_or_default()))
            .collect();
        assert_eq!(
            gateways,
            vec![
                (ComponentName::IngressGateway, "istio-ingressgateway".to_string()),
                (ComponentName::IngressGateway, "ilb-gateway".to_string()),
                (ComponentName::EgressGateway, "istio-egressgateway".to_string()),
            ]
        );
        // nine singletons plus three gateway entries
        assert_eq!(instances.len(), 12);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = ControlPlaneSpec::from_yaml("trafficManagement:\n  enabeld: true\n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidSpec { .. }));
        assert!(err.to_string().contains("enabeld"));
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(ControlPlaneSpec::from_yaml("").unwrap(), ControlPlaneSpec::default());
        assert_eq!(ControlPlaneSpec::from_yaml("~").unwrap(), ControlPlaneSpec::default());
    }

    #[test]
    fn test_serialization_skips_unset_fields() {
        let spec = ControlPlaneSpec::from_yaml("tag: 1.3.0\npolicy:\n  enabled: false\n").unwrap();
        assert_eq!(
            spec.to_value().unwrap(),
            serde_json::json!({"tag": "1.3.0", "policy": {"enabled": false}})
        );
    }

    #[test]
    fn test_string_scalars_accepted() {
        let spec = ControlPlaneSpec::from_value(&serde_json::json!({
            "policy": {"enabled": "false"},
            "trafficManagement": {"components": {"pilot": {
                "enabled": "true",
                "k8s": {"replicaCount": "3"}
            }}}
        }))
        .unwrap();

        assert_eq!(spec.feature_enabled(FeatureName::Policy), Some(false));
        let pilot = spec.component(ComponentName::Pilot).unwrap();
        assert_eq!(pilot.enabled, Some(true));
        assert_eq!(pilot.k8s.as_ref().and_then(|k| k.replica_count), Some(3));

        // typed on the way back out
        assert_eq!(spec.to_value().unwrap()["policy"]["enabled"], serde_json::json!(false));

        let err = ControlPlaneSpec::from_value(&serde_json::json!({"policy": {"enabled": "maybe"}})).unwrap_err();
        assert!(err.to_string().contains("invalid boolean"), "{}", err);
    }
}
