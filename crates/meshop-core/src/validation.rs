//! Static validation table over spec documents
//!
//! Validators are registered per path pattern. The whole tree is walked once and
//! every node whose path matches a pattern is checked; failures from all nodes
//! are collected into one [`ValidationErrors`].
//!
//! Pattern segments: a literal key, `*` for any map key, `[*]` for any list item.

use std::collections::HashSet;
use std::net::IpAddr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{Result, ValidationErrors};
use crate::spec::ControlPlaneSpec;

type Validator = fn(&str, &Value, &mut ValidationErrors);

/// Path pattern to validator. Keep patterns in sync with the spec types.
static VALIDATIONS: &[(&str, Validator)] = &[
    ("hub", validate_hub),
    ("tag", validate_tag),
    ("defaultNamespace", validate_namespace),
    ("*.components.namespace", validate_namespace),
    ("*.components.*.namespace", validate_namespace),
    ("gateways.components.*.[*].namespace", validate_namespace),
    ("gateways.components.ingressGateway", validate_gateway_list),
    ("gateways.components.egressGateway", validate_gateway_list),
    ("values.global.proxy.includeIPRanges", validate_cidr_list),
    ("values.global.proxy.excludeIPRanges", validate_cidr_list),
    ("values.global.proxy.includeInboundPorts", validate_port_list),
    ("values.global.proxy.excludeInboundPorts", validate_port_list),
];

static DNS1123_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));

static DOCKER_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid regex"));

/// Check a spec document against the validation table
pub fn validate_tree(tree: &Value) -> ValidationErrors {
    let mut errs = ValidationErrors::new();
    walk(tree, &mut Vec::new(), &mut errs);
    errs
}

/// Check a typed spec
pub fn validate_spec(spec: &ControlPlaneSpec) -> Result<()> {
    validate_tree(&spec.to_value()?).into_result()
}

fn walk(node: &Value, path: &mut Vec<String>, errs: &mut ValidationErrors) {
    if !path.is_empty() {
        let joined = path.join(".");
        for (pattern, validator) in VALIDATIONS {
            if pattern_matches(pattern, path) {
                validator(&joined, node, errs);
            }
        }
    }

    match node {
        Value::Object(map) => {
            for (k, v) in map {
                path.push(k.clone());
                walk(v, path, errs);
                path.pop();
            }
        }
        Value::Array(list) => {
            for (i, v) in list.iter().enumerate() {
                path.push(format!("[{}]", i));
                walk(v, path, errs);
                path.pop();
            }
        }
        _ => {}
    }
}

fn pattern_matches(pattern: &str, path: &[String]) -> bool {
    let segments: Vec<&str> = pattern.split('.').collect();
    segments.len() == path.len()
        && segments.iter().zip(path).all(|(pat, seg)| match *pat {
            "*" => !seg.starts_with('['),
            "[*]" => seg.starts_with('['),
            lit => lit == seg,
        })
}

fn validate_hub(path: &str, v: &Value, errs: &mut ValidationErrors) {
    match v.as_str() {
        Some(s) if !s.is_empty() && !s.chars().any(char::is_whitespace) => {}
        Some(s) => errs.push(path, format!("invalid image hub {:?}", s)),
        None => errs.push(path, "image hub must be a string"),
    }
}

fn validate_tag(path: &str, v: &Value, errs: &mut ValidationErrors) {
    match v.as_str() {
        Some(s) if DOCKER_TAG.is_match(s) => {}
        Some(s) => errs.push(path, format!("invalid image tag {:?}", s)),
        None => errs.push(path, "image tag must be a string"),
    }
}

fn validate_namespace(path: &str, v: &Value, errs: &mut ValidationErrors) {
    match v.as_str() {
        Some(s) if is_dns1123_label(s) => {}
        Some(s) => errs.push(
            path,
            format!("{:?} is not a valid namespace (DNS-1123 label)", s),
        ),
        None => errs.push(path, "namespace must be a string"),
    }
}

fn validate_gateway_list(path: &str, v: &Value, errs: &mut ValidationErrors) {
    let Some(list) = v.as_array() else {
        errs.push(path, "gateways must be a list");
        return;
    };
    let mut seen = HashSet::new();
    for (i, gw) in list.iter().enumerate() {
        let Some(name) = gw.get("name").and_then(Value::as_str) else {
            // an unnamed entry takes the default gateway name
            if list.len() > 1 {
                errs.push(format!("{}.[{}]", path, i), "gateway needs a name when more than one is declared");
            }
            continue;
        };
        if !is_dns1123_label(name) {
            errs.push(
                format!("{}.[{}].name", path, i),
                format!("{:?} is not a valid gateway name (DNS-1123 label)", name),
            );
        }
        if !seen.insert(name) {
            errs.push(
                format!("{}.[{}].name", path, i),
                format!("duplicate gateway name {:?}", name),
            );
        }
    }
}

fn validate_cidr_list(path: &str, v: &Value, errs: &mut ValidationErrors) {
    for item in string_list(path, v, errs) {
        if item != "*" && !is_cidr(&item) {
            errs.push(path, format!("{:?} is not a valid CIDR", item));
        }
    }
}

fn validate_port_list(path: &str, v: &Value, errs: &mut ValidationErrors) {
    for item in string_list(path, v, errs) {
        if item == "*" {
            continue;
        }
        match item.parse::<u32>() {
            Ok(port) if (1..=65535).contains(&port) => {}
            _ => errs.push(path, format!("{:?} is not a valid port number", item)),
        }
    }
}

/// A comma separated string, a YAML list or a single number, trimmed with blanks dropped
fn string_list(path: &str, v: &Value, errs: &mut ValidationErrors) -> Vec<String> {
    let raw: Vec<String> = match v {
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        Value::Number(n) => vec![n.to_string()],
        Value::Array(items) => items
            .iter()
            .map(|i| match i {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        _ => {
            errs.push(path, "expected a comma separated list");
            return Vec::new();
        }
    };
    raw.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn is_dns1123_label(s: &str) -> bool {
    s.len() <= 63 && DNS1123_LABEL.is_match(s)
}

pub fn is_cidr(s: &str) -> bool {
    let Some((addr, prefix)) = s.split_once('/') else {
        return false;
    };
    let Ok(addr) = addr.parse::<IpAddr>() else {
        return false;
    };
    let max = if addr.is_ipv4() { 32 } else { 128 };
    prefix.parse::<u8>().is_ok_and(|p| p <= max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn errors_for(yaml: &str) -> Vec<String> {
        let tree: Value = serde_yaml::from_str(yaml).unwrap();
        validate_tree(&tree).iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_valid_document() {
        let errs = errors_for(
            r#"
hub: docker.io/istio
tag: 1.3.0
defaultNamespace: istio-system
security:
  components:
    namespace: istio-security
    citadel:
      namespace: citadel-ns
values:
  global:
    proxy:
      includeIPRanges: "10.0.0.0/8, 172.16.0.0/12"
      excludeIPRanges: ""
      includeInboundPorts: "*"
      excludeInboundPorts: "15020,15090"
"#,
        );
        assert!(errs.is_empty(), "{:?}", errs);
    }

    #[test]
    fn test_errors_are_aggregated() {
        let errs = errors_for(
            r#"
hub: ""
tag: "bad tag"
defaultNamespace: Istio_System
telemetry:
  components:
    namespace: -bad
values:
  global:
    proxy:
      includeIPRanges: "10.0.0.0/33,1.2.3.4"
      excludeInboundPorts: [80, 70000]
"#,
        );
        assert_eq!(errs.len(), 7, "{:#?}", errs);
        assert!(errs.iter().any(|e| e.starts_with("hub:")));
        assert!(errs.iter().any(|e| e.starts_with("telemetry.components.namespace:")));
        assert!(errs.iter().any(|e| e.contains("\"70000\" is not a valid port number")));
    }

    #[test]
    fn test_gateway_names() {
        let errs = errors_for(
            r#"
gateways:
  components:
    ingressGateway:
      - name: istio-ingressgateway
      - name: istio-ingressgateway
      - namespace: x
"#,
        );
        assert_eq!(errs.len(), 2, "{:#?}", errs);
        assert!(errs[0].contains("duplicate gateway name") || errs[1].contains("duplicate gateway name"));
    }

    #[test]
    fn test_pattern_matching() {
        let path: Vec<String> = ["gateways", "components", "ingressGateway", "[0]", "namespace"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(pattern_matches("gateways.components.*.[*].namespace", &path));
        assert!(!pattern_matches("*.components.*.namespace", &path));
    }

    #[test]
    fn test_cidr() {
        assert!(is_cidr("10.0.0.0/8"));
        assert!(is_cidr("fd00::/8"));
        assert!(!is_cidr("10.0.0.0"));
        assert!(!is_cidr("10.0.0.0/40"));
        assert!(!is_cidr("nope/8"));
    }

    #[test]
    fn test_validate_spec() {
        let spec = ControlPlaneSpec::from_value(&json!({"hub": "has space"})).unwrap();
        assert!(validate_spec(&spec).is_err());
    }
}
