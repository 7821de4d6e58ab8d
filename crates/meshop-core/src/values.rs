//! Values documents and `--set` overrides

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path as FsPath;

use crate::error::{CoreError, Result};
use crate::merge;
use crate::path::Path;
use crate::tree;

/// An untyped configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Load values from a YAML file
    pub fn from_file<P: AsRef<FsPath>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse values from a YAML string. Blank input and `null` give an empty map.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::new());
        }
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(if value.is_null() { Self::new() } else { Self(value) })
    }

    /// Parse values from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self(value))
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }

    /// Overlay another document on top of this one
    pub fn merge(&mut self, overlay: &Values) {
        merge::overlay(&mut self.0, &overlay.0);
    }

    /// Write a value at a path, creating intermediate maps
    pub fn set(&mut self, path: &str, value: JsonValue) -> Result<()> {
        tree::set(&mut self.0, &Path::parse(path)?, value, true)
    }

    /// Get a value by path. Lookup errors read as absent.
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let path = Path::parse(path).ok()?;
        tree::get(&self.0, &path).ok().flatten()
    }

    /// The subtree at `path` as its own document, empty when absent
    pub fn subtree(&self, path: &str) -> Result<Values> {
        let path = Path::parse(path)?;
        Ok(match tree::get(&self.0, &path)? {
            Some(v) => Values(v.clone()),
            None => Values::new(),
        })
    }

    /// Wrap this document under `path` in a new root
    pub fn nest_under(self, path: &str) -> Result<Values> {
        let mut out = Values::new();
        if !self.is_empty() {
            tree::set(&mut out.0, &Path::parse(path)?, self.0, true)?;
        }
        Ok(out)
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Convert to JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }
}

impl From<JsonValue> for Values {
    fn from(v: JsonValue) -> Self {
        Values(v)
    }
}

/// Split one `--set` entry at the first `=`
pub fn split_set_argument(arg: &str) -> Result<(&str, &str)> {
    match arg.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key, val)),
        _ => Err(CoreError::BadSetArgument {
            arg: arg.to_string(),
        }),
    }
}

/// Parse --set arguments (key=value format) into one document. Values are
/// written as strings; typed spec fields accept the string form on parse.
/// Later entries overwrite earlier ones at the same path.
pub fn parse_set_values(set_args: &[String]) -> Result<Values> {
    let mut values = Values::new();

    for arg in set_args {
        let (key, val) = split_set_argument(arg)?;
        values.set(key, JsonValue::String(val.to_string()))?;
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge() {
        let mut base = Values::from_yaml(
            r#"
pilot:
  image: pilot
  replicaCount: 1
"#,
        )
        .unwrap();

        let overlay = Values::from_yaml(
            r#"
pilot:
  replicaCount: 3
  traceSampling: 1.0
"#,
        )
        .unwrap();

        base.merge(&overlay);

        assert_eq!(base.get("pilot.image").unwrap(), "pilot");
        assert_eq!(base.get("pilot.replicaCount").unwrap(), 3);
        assert_eq!(base.get("pilot.traceSampling").unwrap(), 1.0);
    }

    #[test]
    fn test_set_and_get() {
        let mut values = Values::new();
        values.set("global.hub", json!("docker.io/istio")).unwrap();
        values.set("global.tag", json!("1.3.0")).unwrap();

        assert_eq!(values.get("global.hub").unwrap(), "docker.io/istio");
        assert_eq!(values.get("global.tag").unwrap(), "1.3.0");
        assert!(values.get("global.missing").is_none());
    }

    #[test]
    fn test_parse_set_values_last_write_wins() {
        let values =
            parse_set_values(&["a.b=1".to_string(), "a.b=2".to_string()]).unwrap();
        assert_eq!(values.get("a.b").unwrap(), &json!("2"));
    }

    #[test]
    fn test_parse_set_values_are_strings() {
        let values = parse_set_values(&[
            "flag=true".to_string(),
            "off=false".to_string(),
            "count=3".to_string(),
            "tag=1.3.0".to_string(),
            "empty=".to_string(),
        ])
        .unwrap();

        assert_eq!(values.get("flag").unwrap(), &json!("true"));
        assert_eq!(values.get("off").unwrap(), &json!("false"));
        assert_eq!(values.get("count").unwrap(), &json!("3"));
        assert_eq!(values.get("tag").unwrap(), &json!("1.3.0"));
        assert_eq!(values.get("empty").unwrap(), &json!(""));
    }

    #[test]
    fn test_parse_set_values_keeps_equals_in_value() {
        let values = parse_set_values(&["values.global.x=a=b".to_string()]).unwrap();
        assert_eq!(values.get("values.global.x").unwrap(), "a=b");
    }

    #[test]
    fn test_parse_set_values_rejects_missing_equals() {
        let err = parse_set_values(&["novalue".to_string()]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "bad argument novalue: expect format key=value"
        );
    }

    #[test]
    fn test_subtree_and_nest_under() {
        let values = Values::from_yaml("mixer:\n  policy:\n    enabled: true\n").unwrap();
        let sub = values.subtree("mixer.policy").unwrap();
        assert_eq!(sub.0, json!({"enabled": true}));

        let nested = sub.nest_under("a.b").unwrap();
        assert_eq!(nested.0, json!({"a": {"b": {"enabled": true}}}));

        assert!(values.subtree("mixer.telemetry").unwrap().is_empty());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.yaml");
        std::fs::write(&path, "hub: example.com\n").unwrap();

        let values = Values::from_file(&path).unwrap();
        assert_eq!(values.get("hub").unwrap(), "example.com");

        let missing = Values::from_file(dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(CoreError::ReadFile { .. })));
    }
}
