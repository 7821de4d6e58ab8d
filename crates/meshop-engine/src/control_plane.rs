//! Whole control plane rendering

use std::collections::BTreeMap;

use tracing::{info, warn};

use meshop_core::version::operator_version;
use meshop_core::{ComponentName, ControlPlaneSpec, FeatureName, MinorVersion};

use crate::component::ComponentRenderer;
use crate::error::{EngineError, RenderErrors, Result};
use crate::renderer::RendererProvider;
use crate::translate::{TranslatedValues, Translator};

/// Rendered manifest text per component, iterated in render order
pub type ManifestMap = BTreeMap<ComponentName, String>;

/// Renders every feature and component of a spec
pub struct ControlPlaneRenderer<'a> {
    spec: &'a ControlPlaneSpec,
    provider: &'a dyn RendererProvider,
    version: MinorVersion,
}

impl<'a> ControlPlaneRenderer<'a> {
    /// Renderer using the translation tables of this operator's version
    pub fn new(spec: &'a ControlPlaneSpec, provider: &'a dyn RendererProvider) -> Self {
        Self {
            spec,
            provider,
            version: MinorVersion::from(&operator_version()),
        }
    }

    pub fn with_version(mut self, version: MinorVersion) -> Self {
        self.version = version;
        self
    }

    pub fn translate(&self) -> Result<TranslatedValues> {
        Translator::for_version(self.version)?.translate(self.spec)
    }

    /// Render all components. Failures do not stop the others; if any failed
    /// the aggregate is returned instead of the map.
    pub fn render(&self) -> Result<ManifestMap> {
        let translated = self.translate()?;
        let components = ComponentRenderer::new(self.spec, &translated, self.provider);

        let mut manifests = ManifestMap::new();
        let mut errors = RenderErrors::new();
        for feature in FeatureName::ALL {
            for &component in feature.components() {
                match self.render_component(&components, component) {
                    Ok(text) => {
                        manifests.insert(component, text);
                    }
                    Err(e) => {
                        warn!(component = %component, error = %e, "render failed");
                        errors.push(component, e);
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(EngineError::Render(errors));
        }
        info!(components = manifests.len(), "rendered control plane");
        Ok(manifests)
    }

    /// Components of one feature, concatenated in fixed order
    pub fn render_feature(&self, feature: FeatureName) -> Result<String> {
        let translated = self.translate()?;
        let components = ComponentRenderer::new(self.spec, &translated, self.provider);
        let mut out = String::new();
        for &component in feature.components() {
            out.push_str(&self.render_component(&components, component)?);
        }
        Ok(out)
    }

    /// Gateway kinds render each entry in list order; a kind with no entries
    /// renders as disabled
    fn render_component(&self, renderer: &ComponentRenderer<'_>, component: ComponentName) -> Result<String> {
        let instances: Vec<_> = self
            .spec
            .instances()
            .into_iter()
            .filter(|i| i.component == component)
            .collect();
        if instances.is_empty() {
            return Ok(component.disabled_manifest());
        }
        let mut out = String::new();
        for inst in &instances {
            out.push_str(&renderer.render(inst)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::StaticProvider;
    use meshop_core::ConfigMerger;

    const DEPLOYMENT: &str = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {{ values.name | default('x') }}\n  namespace: {{ release.namespace }}\n";

    fn provider() -> StaticProvider {
        let mut p = StaticProvider::default();
        for c in ComponentName::ALL {
            p = p.with(c, DEPLOYMENT);
        }
        p
    }

    #[test]
    fn test_render_is_deterministic() {
        let merged = ConfigMerger::new().generate(None, &[]).unwrap();
        let p = provider();
        let a = ControlPlaneRenderer::new(&merged.spec, &p).render().unwrap();
        let b = ControlPlaneRenderer::new(&merged.spec, &p).render().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), ComponentName::ALL.len());
        assert_eq!(a.keys().next(), Some(&ComponentName::Base));
    }

    #[test]
    fn test_minimal_profile_with_pilot_disabled() {
        let merged = ConfigMerger::new()
            .generate_from_value(
                &serde_json::json!({"profile": "minimal"}),
                &["trafficManagement.components.pilot.enabled=false".to_string()],
            )
            .unwrap();
        let p = provider();
        let manifests = ControlPlaneRenderer::new(&merged.spec, &p).render().unwrap();

        assert_eq!(manifests[&ComponentName::Pilot], "# Pilot component is disabled.\n");
        assert_eq!(manifests[&ComponentName::Galley], "# Galley component is disabled.\n");
        assert_eq!(manifests[&ComponentName::IngressGateway], "# IngressGateway component is disabled.\n");
        assert!(manifests[&ComponentName::Base].contains("kind: Deployment"));

        let summary: Vec<String> = manifests
            .iter()
            .map(|(c, m)| format!("{}: {}", c, if m.starts_with('#') { "disabled" } else { "rendered" }))
            .collect();
        insta::assert_snapshot!(summary.join("\n"), @r"
        Base: rendered
        Pilot: disabled
        Policy: disabled
        Telemetry: disabled
        Citadel: disabled
        CertManager: disabled
        NodeAgent: disabled
        Galley: disabled
        SidecarInjector: disabled
        IngressGateway: disabled
        EgressGateway: disabled
        ");
    }

    #[test]
    fn test_errors_are_aggregated_per_component() {
        let merged = ConfigMerger::new().generate(None, &[]).unwrap();
        let p = provider()
            .with(ComponentName::Pilot, "{{ values.pilot.nope | required('pilot broken') }}")
            .with(ComponentName::Galley, "{% if %}");
        let err = ControlPlaneRenderer::new(&merged.spec, &p).render().unwrap_err();
        match err {
            EngineError::Render(errs) => {
                let failed: Vec<_> = errs.components().collect();
                assert_eq!(failed, vec![ComponentName::Pilot, ComponentName::Galley]);
            }
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn test_feature_concatenates_gateway_instances_in_order() {
        let merged = ConfigMerger::new()
            .generate_from_value(
                &serde_json::json!({
                    "gateways": {"components": {"ingressGateway": [
                        {"name": "b-gw", "enabled": true},
                        {"name": "a-gw", "enabled": true},
                    ]}}
                }),
                &[],
            )
            .unwrap();
        let p = StaticProvider::default().with(
            ComponentName::IngressGateway,
            "{% for name, gw in values.gateways|items %}{% if gw.enabled %}gw: {{ name }}{% endif %}{% endfor %}",
        );
        let out = ControlPlaneRenderer::new(&merged.spec, &p)
            .render_feature(FeatureName::Gateways)
            .unwrap();
        let b = out.find("gw: b-gw").unwrap();
        let a = out.find("gw: a-gw").unwrap();
        assert!(b < a, "{}", out);
        assert!(out.ends_with("# EgressGateway component is disabled.\n"), "{}", out);
    }
}
