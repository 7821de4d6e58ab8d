//! Post-render patches on individual objects

use meshop_core::object::objects_to_manifest;
use meshop_core::{K8sObject, K8sObjectOverlay, Path, parse_manifest, tree};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Apply `overlays` in order to the objects of `manifest`.
///
/// Each overlay addresses one object by kind and name (and apiVersion when
/// given). Patch paths use the path syntax, so list items can be selected with
/// `[key:value]`. A null value deletes the field. An overlay whose object is not
/// in the manifest is an error.
pub fn apply_overlays(manifest: &str, overlays: &[K8sObjectOverlay]) -> Result<String> {
    if overlays.is_empty() {
        return Ok(manifest.to_string());
    }

    let mut objects = parse_manifest(manifest)?;
    for overlay in overlays {
        let err = |message: String| EngineError::Overlay {
            kind: overlay.kind.clone(),
            name: overlay.name.clone(),
            message,
        };
        let target = objects
            .iter_mut()
            .find(|o| {
                o.kind() == overlay.kind
                    && o.name == overlay.name
                    && overlay.api_version.as_deref().is_none_or(|av| o.gvk.api_version() == av)
            })
            .ok_or_else(|| err("object not found in rendered manifest".to_string()))?;

        let mut body = target.body.clone();
        for patch in &overlay.patches {
            let path = Path::parse(&patch.path).map_err(|e| err(e.to_string()))?;
            tree::set(&mut body, &path, patch.value.clone(), true).map_err(|e| err(e.to_string()))?;
        }
        *target = K8sObject::from_value(body).map_err(|e| err(e.to_string()))?;
        debug!(kind = %overlay.kind, name = %overlay.name, patches = overlay.patches.len(), "applied overlay");
    }

    Ok(objects_to_manifest(&objects)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshop_core::OverlayPatch;
    use serde_json::json;

    const MANIFEST: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: istio-pilot
spec:
  template:
    spec:
      containers:
        - name: discovery
          image: pilot:1.3.0
        - name: istio-proxy
          image: proxy:1.3.0
---
apiVersion: v1
kind: Service
metadata:
  name: istio-pilot
  labels:
    app: pilot
"#;

    fn overlay(kind: &str, patches: Vec<(&str, serde_json::Value)>) -> K8sObjectOverlay {
        K8sObjectOverlay {
            api_version: None,
            kind: kind.into(),
            name: "istio-pilot".into(),
            patches: patches
                .into_iter()
                .map(|(path, value)| OverlayPatch { path: path.into(), value })
                .collect(),
        }
    }

    #[test]
    fn test_patch_set_and_delete() {
        let out = apply_overlays(
            MANIFEST,
            &[
                overlay(
                    "Deployment",
                    vec![
                        ("spec.template.spec.containers.[name:discovery].image", json!("pilot:debug")),
                        ("spec.replicas", json!(2)),
                    ],
                ),
                overlay("Service", vec![("metadata.labels.app", serde_json::Value::Null)]),
            ],
        )
        .unwrap();

        let objects = parse_manifest(&out).unwrap();
        assert_eq!(objects[0].body["spec"]["replicas"], 2);
        assert_eq!(objects[0].body["spec"]["template"]["spec"]["containers"][0]["image"], "pilot:debug");
        assert_eq!(objects[0].body["spec"]["template"]["spec"]["containers"][1]["image"], "proxy:1.3.0");
        assert!(objects[1].label("app").is_none());
    }

    #[test]
    fn test_missing_target_is_an_error() {
        let mut o = overlay("ConfigMap", vec![("data.x", json!("y"))]);
        o.name = "nope".into();
        let err = apply_overlays(MANIFEST, &[o]).unwrap_err();
        assert_eq!(err.to_string(), "overlay for ConfigMap/nope: object not found in rendered manifest");
    }

    #[test]
    fn test_no_overlays_keeps_text() {
        assert_eq!(apply_overlays(MANIFEST, &[]).unwrap(), MANIFEST);
    }
}
