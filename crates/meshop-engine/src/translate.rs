//! Spec to chart values translation
//!
//! Each supported minor version has a [`Translator`]: a set of path mapping
//! tables from the spec document to the values tree the charts read. Paths in
//! the tables may contain these placeholders, filled in per component instance:
//!
//! - `{{.FeatureName}}`: the feature key in the spec (`trafficManagement`)
//! - `{{.ComponentName}}`: the component key under `components` (`pilot`)
//! - `{{.ValueComponentName}}`: the component's values root (`pilot`,
//!   `mixer.policy`, `gateways.<instance>`)

use serde_json::{Map, Value, json};
use tracing::debug;

use meshop_core::{ComponentName, ComponentSpec, ControlPlaneSpec, FeatureName, MinorVersion, Path, tree};

use crate::error::{EngineError, Result};

const FEATURE_NAME: &str = "{{.FeatureName}}";
const COMPONENT_NAME: &str = "{{.ComponentName}}";
const VALUE_COMPONENT_NAME: &str = "{{.ValueComponentName}}";

/// How a mapped spec value is written into the values tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Copy the value as is
    Copy,
    /// HPA spec to `autoscaleEnabled`/`autoscaleMin`/`autoscaleMax` under the target
    Autoscale,
}

/// One `from -> to` path mapping
#[derive(Debug, Clone, Copy)]
pub struct Mapping {
    pub from: &'static str,
    pub to: &'static str,
    pub transform: Transform,
}

const fn copy(from: &'static str, to: &'static str) -> Mapping {
    Mapping {
        from,
        to,
        transform: Transform::Copy,
    }
}

/// Mapping tables for one minor version
#[derive(Debug)]
pub struct Translator {
    pub version: MinorVersion,
    /// Top-level spec fields to global values
    pub global: &'static [Mapping],
    /// Resolved feature namespaces to global values
    pub namespaces: &'static [(FeatureName, &'static str)],
    /// Per-component workload settings
    pub k8s: &'static [Mapping],
    /// Where a component's computed enablement is written
    pub enablement: &'static str,
}

static GLOBAL_MAPPINGS: &[Mapping] = &[
    copy("hub", "global.hub"),
    copy("tag", "global.tag"),
    copy("defaultNamespace", "global.istioNamespace"),
];

static NAMESPACE_MAPPINGS: &[(FeatureName, &str)] = &[
    (FeatureName::Telemetry, "global.telemetryNamespace"),
    (FeatureName::Policy, "global.policyNamespace"),
    (FeatureName::ConfigManagement, "global.configNamespace"),
    (FeatureName::Security, "global.istioNamespace"),
];

macro_rules! k8s_mappings {
    (@t) => { Transform::Copy };
    (@t $t:ident) => { Transform::$t };
    ($($field:literal => $value:literal $(as $transform:ident)?),* $(,)?) => {
        &[$(Mapping {
            from: concat!("{{.FeatureName}}.components.{{.ComponentName}}.k8s.", $field),
            to: concat!("{{.ValueComponentName}}", $value),
            transform: k8s_mappings!(@t $($transform)?),
        }),*]
    };
}

static K8S_MAPPINGS: &[Mapping] = k8s_mappings! {
    "affinity" => ".podAntiAffinityLabelSelector",
    "env" => ".env",
    "hpaSpec" => "" as Autoscale,
    "imagePullPolicy" => ".imagePullPolicy",
    "nodeSelector" => ".nodeSelector",
    "podDisruptionBudget" => ".podDisruptionBudget",
    "podAnnotations" => ".podAnnotations",
    "priorityClassName" => ".priorityClassName",
    "readinessProbe" => ".readinessProbe",
    "replicaCount" => ".replicaCount",
    "resources" => ".resources",
};

static TRANSLATORS: &[Translator] = &[
    Translator {
        version: MinorVersion::new(1, 2),
        global: GLOBAL_MAPPINGS,
        namespaces: NAMESPACE_MAPPINGS,
        k8s: K8S_MAPPINGS,
        enablement: "{{.ValueComponentName}}.enabled",
    },
    Translator {
        version: MinorVersion::new(1, 3),
        global: GLOBAL_MAPPINGS,
        namespaces: NAMESPACE_MAPPINGS,
        k8s: K8S_MAPPINGS,
        enablement: "{{.ValueComponentName}}.enabled",
    },
];

/// Versions a translator exists for
pub fn supported_versions() -> Vec<MinorVersion> {
    TRANSLATORS.iter().map(|t| t.version).collect()
}

/// Translated values of one component instance
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceValues {
    pub component: ComponentName,
    pub instance: Option<String>,
    /// Dotted values root, e.g. `mixer.policy`
    pub values_root: String,
    /// The subtree at `values_root`
    pub values: Value,
    pub namespace: String,
    pub enabled: bool,
}

/// Output of [`Translator::translate`]
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedValues {
    /// The complete values tree, globals and every component
    pub tree: Value,
    pub instances: Vec<InstanceValues>,
}

impl TranslatedValues {
    pub fn instance(&self, component: ComponentName, instance: Option<&str>) -> Option<&InstanceValues> {
        self.instances
            .iter()
            .find(|i| i.component == component && i.instance.as_deref() == instance)
    }
}

impl Translator {
    /// Translator for `version`, `unsupported version` error otherwise
    pub fn for_version(version: MinorVersion) -> Result<&'static Translator> {
        TRANSLATORS
            .iter()
            .find(|t| t.version == version)
            .ok_or_else(|| EngineError::UnsupportedVersion {
                version: version.to_string(),
            })
    }

    pub fn translate(&self, spec: &ControlPlaneSpec) -> Result<TranslatedValues> {
        let spec_tree = spec.to_value()?;
        let mut out = Value::Object(Map::new());

        for m in self.global {
            if let Some(v) = lookup(&spec_tree, m.from)? {
                write(&mut out, m.to, v.clone())?;
            }
        }
        for (feature, to) in self.namespaces {
            let ns = spec.feature_namespace(*feature).unwrap_or(spec.default_namespace());
            write(&mut out, to, json!(ns))?;
        }

        let mut instances = Vec::new();
        for inst in spec.instances() {
            let component = inst.component;
            let root = component.values_root_for(inst.instance.as_deref());
            let fill = |template: &str| {
                template
                    .replace(FEATURE_NAME, component.feature().spec_key())
                    .replace(COMPONENT_NAME, component.spec_key())
                    .replace(VALUE_COMPONENT_NAME, &root)
            };

            // The instance's settings under the same paths the table uses, so
            // list-valued gateway entries resolve like singletons
            let settings = serde_json::to_value(inst.spec)?;
            let instance_tree = json!({
                (component.feature().spec_key()): {
                    "components": { (component.spec_key()): settings }
                }
            });
            for m in self.k8s {
                let Some(v) = lookup(&instance_tree, &fill(m.from))? else {
                    continue;
                };
                apply_transform(&mut out, &fill(m.to), m.transform, v)?;
            }

            let enabled = is_component_enabled(spec, component, inst.spec);
            write(&mut out, &fill(self.enablement), json!(enabled))?;
            let namespace = component_namespace(spec, component, inst.spec);
            debug!(component = %component, instance = ?inst.instance, enabled, namespace = %namespace, "translated");

            instances.push(InstanceValues {
                component,
                instance: inst.instance.clone(),
                values_root: root,
                values: Value::Null,
                namespace,
                enabled,
            });
        }

        for inst in &mut instances {
            inst.values = lookup(&out, &inst.values_root)?.cloned().unwrap_or(Value::Null);
        }

        Ok(TranslatedValues { tree: out, instances })
    }
}

/// Feature flag absent or false disables; otherwise an explicit component flag
/// decides; otherwise enabled.
pub fn is_component_enabled(spec: &ControlPlaneSpec, component: ComponentName, settings: Option<&ComponentSpec>) -> bool {
    if spec.feature_enabled(component.feature()) != Some(true) {
        return false;
    }
    settings.and_then(|s| s.enabled).unwrap_or(true)
}

/// Component override, then the feature's namespace, then the default
pub fn component_namespace(spec: &ControlPlaneSpec, component: ComponentName, settings: Option<&ComponentSpec>) -> String {
    settings
        .and_then(|s| s.namespace.as_deref())
        .or_else(|| spec.feature_namespace(component.feature()))
        .unwrap_or(spec.default_namespace())
        .to_string()
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Result<Option<&'a Value>> {
    let found = tree::get(doc, &Path::parse(path)?)?;
    Ok(found.filter(|v| !v.is_null()))
}

fn write(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    tree::set(doc, &Path::parse(path)?, value, true)?;
    Ok(())
}

fn apply_transform(out: &mut Value, to: &str, transform: Transform, v: &Value) -> Result<()> {
    match transform {
        Transform::Copy => write(out, to, v.clone()),
        Transform::Autoscale => {
            write(out, &format!("{}.autoscaleEnabled", to), json!(true))?;
            if let Some(min) = v.get("minReplicas") {
                write(out, &format!("{}.autoscaleMin", to), min.clone())?;
            }
            if let Some(max) = v.get("maxReplicas") {
                write(out, &format!("{}.autoscaleMax", to), max.clone())?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(yaml: &str) -> ControlPlaneSpec {
        ControlPlaneSpec::from_yaml(yaml).unwrap()
    }

    fn v13() -> &'static Translator {
        Translator::for_version(MinorVersion::new(1, 3)).unwrap()
    }

    #[test]
    fn test_unsupported_version() {
        let err = Translator::for_version(MinorVersion::new(1, 9)).unwrap_err();
        assert!(err.to_string().starts_with("unsupported version 1.9"), "{}", err);
        assert_eq!(supported_versions(), vec![MinorVersion::new(1, 2), MinorVersion::new(1, 3)]);
    }

    #[test]
    fn test_enablement_truth_table() {
        // (feature flag, component flag) -> enabled
        let cases = [
            (false, None, false),
            (false, Some(true), false),
            (false, Some(false), false),
            (true, None, true),
            (true, Some(true), true),
            (true, Some(false), false),
        ];
        for (feature, component, want) in cases {
            let mut doc = json!({"trafficManagement": {"enabled": feature, "components": {"pilot": {}}}});
            if let Some(c) = component {
                doc["trafficManagement"]["components"]["pilot"]["enabled"] = json!(c);
            }
            let s = ControlPlaneSpec::from_value(&doc).unwrap();
            assert_eq!(
                is_component_enabled(&s, ComponentName::Pilot, s.component(ComponentName::Pilot)),
                want,
                "feature={} component={:?}",
                feature,
                component
            );
        }
        // absent feature flag disables
        assert!(!is_component_enabled(&ControlPlaneSpec::default(), ComponentName::Pilot, None));
    }

    #[test]
    fn test_namespace_resolution() {
        let s = spec(
            r#"
defaultNamespace: istio-control
policy:
  enabled: true
  components:
    namespace: istio-policy
security:
  enabled: true
  components:
    citadel:
      namespace: istio-certs
"#,
        );
        assert_eq!(component_namespace(&s, ComponentName::Policy, s.component(ComponentName::Policy)), "istio-policy");
        assert_eq!(component_namespace(&s, ComponentName::Citadel, s.component(ComponentName::Citadel)), "istio-certs");
        assert_eq!(component_namespace(&s, ComponentName::Galley, None), "istio-control");
    }

    #[test]
    fn test_translate_globals_and_k8s() {
        let s = spec(
            r#"
hub: docker.io/istio
tag: 1.3.0
defaultNamespace: istio-system
telemetry:
  enabled: true
  components:
    namespace: istio-telemetry
trafficManagement:
  enabled: true
  components:
    pilot:
      k8s:
        replicaCount: 2
        hpaSpec:
          minReplicas: 1
          maxReplicas: 5
        nodeSelector:
          disk: ssd
policy:
  enabled: false
  components:
    policy:
      k8s:
        resources:
          requests:
            cpu: 10m
"#,
        );
        let t = v13().translate(&s).unwrap();

        assert_eq!(t.tree["global"]["hub"], "docker.io/istio");
        assert_eq!(t.tree["global"]["tag"], "1.3.0");
        assert_eq!(t.tree["global"]["istioNamespace"], "istio-system");
        assert_eq!(t.tree["global"]["telemetryNamespace"], "istio-telemetry");
        assert_eq!(t.tree["global"]["policyNamespace"], "istio-system");

        let pilot = t.instance(ComponentName::Pilot, None).unwrap();
        assert!(pilot.enabled);
        assert_eq!(
            pilot.values,
            json!({
                "replicaCount": 2,
                "autoscaleEnabled": true,
                "autoscaleMin": 1,
                "autoscaleMax": 5,
                "nodeSelector": {"disk": "ssd"},
                "enabled": true,
            })
        );

        let policy = t.instance(ComponentName::Policy, None).unwrap();
        assert!(!policy.enabled);
        assert_eq!(t.tree["mixer"]["policy"]["resources"]["requests"]["cpu"], "10m");
        assert_eq!(t.tree["mixer"]["policy"]["enabled"], false);
    }

    #[test]
    fn test_gateway_instances() {
        let s = spec(
            r#"
gateways:
  enabled: true
  components:
    namespace: istio-gateways
    ingressGateway:
      - name: istio-ingressgateway
        k8s:
          replicaCount: 3
      - name: internal-ingress
        enabled: false
"#,
        );
        let t = v13().translate(&s).unwrap();

        let main = t.instance(ComponentName::IngressGateway, Some("istio-ingressgateway")).unwrap();
        assert_eq!(main.values_root, "gateways.istio-ingressgateway");
        assert_eq!(main.namespace, "istio-gateways");
        assert!(main.enabled);
        assert_eq!(main.values["replicaCount"], 3);

        let internal = t.instance(ComponentName::IngressGateway, Some("internal-ingress")).unwrap();
        assert!(!internal.enabled);
        assert_eq!(t.tree["gateways"]["internal-ingress"]["enabled"], false);
    }
}
