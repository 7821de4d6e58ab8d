//! Structural overlay of configuration trees
//!
//! Rules:
//! - Maps: overlay keys win, matching keys recurse, a `null` overlay value removes the key
//! - Lists: map items are joined by key field and merged in place, every other
//!   overlay item is appended after the base items
//! - Scalars and mismatched kinds: overlay replaces base

use serde_json::Value;

use crate::error::Result;
use crate::tree::scalar_string;

/// Field tried first when joining list items
const PREFERRED_MERGE_KEY: &str = "name";

/// Overlay `overlay` onto `base` in place
pub fn overlay(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                if overlay_value.is_null() {
                    base_map.remove(key);
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(base_value) => self::overlay(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (Value::Array(base_list), Value::Array(overlay_list)) => {
            merge_lists(base_list, overlay_list);
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

/// Overlay a sequence of documents left to right onto an empty map
pub fn overlay_all<'a>(docs: impl IntoIterator<Item = &'a Value>) -> Value {
    let mut out = Value::Object(serde_json::Map::new());
    for doc in docs {
        if !doc.is_null() {
            overlay(&mut out, doc);
        }
    }
    out
}

/// Overlay two YAML documents and return the merged YAML
pub fn overlay_yaml(base: &str, overlay_doc: &str) -> Result<String> {
    let mut base: Value = parse_or_empty(base)?;
    let over: Value = parse_or_empty(overlay_doc)?;
    overlay(&mut base, &over);
    Ok(serde_yaml::to_string(&base)?)
}

fn parse_or_empty(yaml: &str) -> Result<Value> {
    if yaml.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    let v: Value = serde_yaml::from_str(yaml)?;
    Ok(if v.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        v
    })
}

fn merge_lists(base: &mut Vec<Value>, overlay: &[Value]) {
    let base_len = base.len();
    let mut joined = vec![false; base_len];

    for item in overlay {
        let target = (0..base_len).find(|&i| !joined[i] && same_key(&base[i], item));
        match target {
            Some(i) => {
                joined[i] = true;
                self::overlay(&mut base[i], item);
            }
            None => base.push(item.clone()),
        }
    }
}

/// Two map items join when the first key field they share has equal scalar values.
/// `name` is tried first, then the overlay item's fields in order.
fn same_key(base: &Value, overlay: &Value) -> bool {
    let (Some(b), Some(o)) = (base.as_object(), overlay.as_object()) else {
        return false;
    };

    let candidates = std::iter::once(PREFERRED_MERGE_KEY)
        .chain(o.keys().map(String::as_str).filter(|k| *k != PREFERRED_MERGE_KEY));

    for key in candidates {
        let (Some(bv), Some(ov)) = (b.get(key), o.get(key)) else {
            continue;
        };
        return match (scalar_string(bv), scalar_string(ov)) {
            (Some(bs), Some(os)) => bs == os,
            _ => false,
        };
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_overlay_maps() {
        let mut base = yaml(
            r#"
image:
  repository: proxy
  tag: "1.0"
replicas: 1
"#,
        );
        overlay(
            &mut base,
            &yaml(
                r#"
image:
  tag: "2.0"
  pullPolicy: Always
replicas: 3
"#,
            ),
        );

        assert_eq!(base["image"]["repository"], "proxy");
        assert_eq!(base["image"]["tag"], "2.0");
        assert_eq!(base["image"]["pullPolicy"], "Always");
        assert_eq!(base["replicas"], 3);
    }

    #[test]
    fn test_null_removes_key() {
        let mut base = json!({"a": 1, "b": 2});
        overlay(&mut base, &json!({"a": null}));
        assert_eq!(base, json!({"b": 2}));
    }

    #[test]
    fn test_list_items_joined_by_name() {
        let mut base = yaml(
            r#"
gateways:
  - name: ingress
    replicas: 1
    ports: [80]
  - name: egress
    replicas: 1
"#,
        );
        overlay(
            &mut base,
            &yaml(
                r#"
gateways:
  - name: egress
    replicas: 4
  - name: ilb
    replicas: 2
"#,
            ),
        );

        assert_eq!(
            base["gateways"],
            json!([
                {"name": "ingress", "replicas": 1, "ports": [80]},
                {"name": "egress", "replicas": 4},
                {"name": "ilb", "replicas": 2},
            ])
        );
    }

    #[test]
    fn test_list_items_joined_by_first_shared_field() {
        let mut base = json!([{"port": 80, "target": 8080}, {"port": 443, "target": 8443}]);
        overlay(&mut base, &json!([{"port": 443, "target": 9443}]));
        assert_eq!(base, json!([{"port": 80, "target": 8080}, {"port": 443, "target": 9443}]));
    }

    #[test]
    fn test_scalar_lists_concatenate() {
        let mut base = json!({"hosts": ["a"]});
        overlay(&mut base, &json!({"hosts": ["a", "b"]}));
        assert_eq!(base, json!({"hosts": ["a", "a", "b"]}));
    }

    #[test]
    fn test_mismatched_kinds_replace() {
        let mut base = json!({"a": {"b": 1}});
        overlay(&mut base, &json!({"a": "flat"}));
        assert_eq!(base, json!({"a": "flat"}));
    }

    #[test]
    fn test_disjoint_overlays_commute() {
        let base = yaml("x: {a: 1}\ny: [1]\n");
        let o1 = yaml("x: {b: 2}\n");
        let o2 = yaml("z: {c: 3}\ny: [2]\n");

        let ab = overlay_all([&base, &o1, &o2]);
        let ba = overlay_all([&base, &o2, &o1]);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_overlapping_overlays_last_wins() {
        let o1 = yaml("a: {b: 1, c: 1}\n");
        let o2 = yaml("a: {c: 2, b: 2}\n");
        assert_eq!(overlay_all([&o1, &o2]), json!({"a": {"b": 2, "c": 2}}));
        assert_eq!(overlay_all([&o2, &o1]), json!({"a": {"b": 1, "c": 1}}));
    }

    #[test]
    fn test_overlay_yaml_empty_inputs() {
        let merged = overlay_yaml("", "a: 1\n").unwrap();
        assert_eq!(merged, "a: 1\n");
        let merged = overlay_yaml("a: 1\n", "").unwrap();
        assert_eq!(merged, "a: 1\n");
    }
}
