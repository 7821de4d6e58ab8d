//! Rendering of a single component instance

use serde_json::Value;
use tracing::{debug, info};

use meshop_core::{ComponentInstance, ControlPlaneSpec, Values, merge};

use crate::error::Result;
use crate::overlay::apply_overlays;
use crate::renderer::RendererProvider;
use crate::translate::{InstanceValues, TranslatedValues};

/// Renders component instances of one spec
pub struct ComponentRenderer<'a> {
    spec: &'a ControlPlaneSpec,
    translated: &'a TranslatedValues,
    provider: &'a dyn RendererProvider,
}

impl<'a> ComponentRenderer<'a> {
    pub fn new(spec: &'a ControlPlaneSpec, translated: &'a TranslatedValues, provider: &'a dyn RendererProvider) -> Self {
        Self {
            spec,
            translated,
            provider,
        }
    }

    /// Manifest of one instance. A disabled instance renders to its one-line
    /// comment marker, without touching the chart.
    pub fn render(&self, inst: &ComponentInstance<'_>) -> Result<String> {
        let component = inst.component;
        let Some(translated) = self.translated.instance(component, inst.instance.as_deref()) else {
            return Ok(component.disabled_manifest());
        };
        if !translated.enabled {
            debug!(component = %component, instance = ?inst.instance, "component disabled");
            return Ok(component.disabled_manifest());
        }

        let values = self.values_for(inst, translated)?;
        let renderer = self.provider.renderer(component, &translated.namespace)?;
        info!(component = %component, instance = ?inst.instance, namespace = %translated.namespace, "rendering");

        let mut manifest = renderer.render(&serde_yaml::to_string(&values)?)?;
        manifest.push_str("---\n");

        let overlays = inst
            .spec
            .and_then(|s| s.k8s.as_ref())
            .and_then(|k| k.overlays.as_deref())
            .unwrap_or(&[]);
        apply_overlays(&manifest, overlays)
    }

    /// Template input of an instance: the translated tree, then the spec-wide
    /// `unvalidatedValues` and `values`, then the component's own
    /// `unvalidatedValues` and `values` under its values root. Validated values
    /// are applied last at each level.
    pub fn values_for(&self, inst: &ComponentInstance<'_>, translated: &InstanceValues) -> Result<Value> {
        let root = translated.values_root.as_str();
        let nested = |v: Option<&Value>| -> Result<Value> {
            match v {
                Some(v) if !v.is_null() => Ok(Values(v.clone()).nest_under(root)?.into_inner()),
                _ => Ok(Value::Null),
            }
        };
        let component_unvalidated = nested(inst.spec.and_then(|s| s.unvalidated_values.as_ref()))?;
        let component_values = nested(inst.spec.and_then(|s| s.values.as_ref()))?;

        let mut base = self.translated.tree.clone();
        if inst.component.is_gateway() {
            self.drop_other_gateways(&mut base, translated);
        }

        let null = Value::Null;
        Ok(merge::overlay_all([
            &base,
            self.spec.unvalidated_values.as_ref().unwrap_or(&null),
            self.spec.values.as_ref().unwrap_or(&null),
            &component_unvalidated,
            &component_values,
        ]))
    }

    /// Gateway charts render every entry under `gateways`; keep only this one
    fn drop_other_gateways(&self, tree: &mut Value, this: &InstanceValues) {
        let Some(gateways) = tree.get_mut("gateways").and_then(Value::as_object_mut) else {
            return;
        };
        for other in &self.translated.instances {
            if other.component.is_gateway() && other.values_root != this.values_root {
                if let Some(name) = other.instance.as_deref() {
                    gateways.remove(name);
                }
            }
        }
    }
}
