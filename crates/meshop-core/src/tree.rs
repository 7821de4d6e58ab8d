//! Get, set and delete nodes in an untyped document by [`Path`]

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};
use crate::path::{Path, PathElement};

/// Look up the node at `path`.
///
/// Returns `Ok(None)` when a map key along the way is absent. Traversing into a
/// scalar, an invalid matcher, or a list matcher that selects nothing are errors.
pub fn get<'a>(doc: &'a Value, path: &Path) -> Result<Option<&'a Value>> {
    let mut node = doc;

    for (i, el) in path.elements().iter().enumerate() {
        let here = || path.prefix(i + 1).to_string();
        node = match (el, node) {
            (PathElement::Key(k), Value::Object(map)) => match map.get(k) {
                Some(child) => child,
                None => return Ok(None),
            },
            (PathElement::Key(_), Value::Null) => return Ok(None),
            (_, Value::Array(list)) if el.is_matcher() => {
                let idx = find_element(list, el, &here())?;
                &list[idx]
            }
            (_, other) => {
                return Err(CoreError::NotTraversable {
                    path: here(),
                    found: kind_name(other),
                });
            }
        };
    }

    Ok(Some(node))
}

/// Write `value` at `path`.
///
/// With `create_missing`, absent intermediate map keys are created as empty maps
/// (lists are never created). Without it, an absent intermediate key fails with
/// [`CoreError::PathNotFound`]. Writing `Value::Null` deletes the addressed node:
/// a map key is removed, a list element is removed keeping the order of the rest.
pub fn set(doc: &mut Value, path: &Path, value: Value, create_missing: bool) -> Result<()> {
    let elements = path.elements();
    if elements.is_empty() {
        *doc = value;
        return Ok(());
    }
    set_at(doc, path, 0, value, create_missing)
}

/// Remove the node at `path`. Removing an absent map key is a no-op.
pub fn delete(doc: &mut Value, path: &Path) -> Result<()> {
    set(doc, path, Value::Null, false)
}

fn set_at(node: &mut Value, path: &Path, depth: usize, value: Value, create: bool) -> Result<()> {
    let el = &path.elements()[depth];
    let here = path.prefix(depth + 1).to_string();
    let is_leaf = depth + 1 == path.len();

    if node.is_null() && !el.is_matcher() && (create || is_leaf) && !value.is_null() {
        *node = Value::Object(Map::new());
    }

    match (el, node) {
        (PathElement::Key(k), Value::Object(map)) if is_leaf => {
            if value.is_null() {
                map.remove(k);
            } else {
                map.insert(k.clone(), value);
            }
            Ok(())
        }
        (PathElement::Key(k), Value::Object(map)) => {
            if !map.contains_key(k) {
                if !create {
                    return Err(CoreError::PathNotFound { path: here });
                }
                if value.is_null() {
                    return Ok(());
                }
                map.insert(k.clone(), Value::Object(Map::new()));
            }
            match map.get_mut(k) {
                Some(child) => set_at(child, path, depth + 1, value, create),
                None => Err(CoreError::PathNotFound { path: here }),
            }
        }
        (PathElement::Key(_), Value::Null) if value.is_null() => Ok(()),
        (PathElement::Key(_), Value::Null) => Err(CoreError::PathNotFound { path: here }),
        (_, Value::Array(list)) if el.is_matcher() => {
            let idx = find_element(list, el, &here)?;
            if !is_leaf {
                return set_at(&mut list[idx], path, depth + 1, value, create);
            }
            if value.is_null() {
                list.remove(idx);
            } else {
                list[idx] = value;
            }
            Ok(())
        }
        (_, other) => Err(CoreError::NotTraversable {
            path: here,
            found: kind_name(other),
        }),
    }
}

/// Index of the single list element selected by a matcher
fn find_element(list: &[Value], el: &PathElement, path: &str) -> Result<usize> {
    let matches: Vec<usize> = match el {
        PathElement::KeyMatch { key, value } => list
            .iter()
            .enumerate()
            .filter(|(_, item)| {
                item.as_object()
                    .and_then(|m| m.get(key))
                    .and_then(scalar_string)
                    .is_some_and(|s| s == *value)
            })
            .map(|(i, _)| i)
            .collect(),
        PathElement::ValueMatch(pattern) => {
            let re = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                CoreError::InvalidPath {
                    path: path.to_string(),
                    message: format!("bad matcher regex: {}", e),
                }
            })?;
            list.iter()
                .enumerate()
                .filter(|(_, item)| scalar_string(item).is_some_and(|s| re.is_match(&s)))
                .map(|(i, _)| i)
                .collect()
        }
        PathElement::Key(_) => Vec::new(),
    };

    match matches.as_slice() {
        [] => Err(CoreError::ElementNotFound {
            path: path.to_string(),
        }),
        [idx] => Ok(*idx),
        many => Err(CoreError::AmbiguousMatch {
            path: path.to_string(),
            count: many.len(),
        }),
    }
}

/// String form of a scalar node, `None` for maps, lists and null
pub fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    fn doc() -> Value {
        serde_yaml::from_str(
            r#"
a:
  b:
    c: 1
gateways:
  - name: ingress
    replicas: 1
  - name: egress
    replicas: 2
hosts:
  - foo.example.com
  - bar.example.com
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_get_map_keys() {
        let d = doc();
        assert_eq!(get(&d, &p("a.b.c")).unwrap(), Some(&json!(1)));
        assert_eq!(get(&d, &p("a.x")).unwrap(), None);
        assert_eq!(get(&d, &p("a.x.y")).unwrap(), None);
        assert_eq!(get(&d, &Path::root()).unwrap(), Some(&d));
    }

    #[test]
    fn test_get_list_matchers() {
        let d = doc();
        assert_eq!(
            get(&d, &p("gateways.[name:egress].replicas")).unwrap(),
            Some(&json!(2))
        );
        assert_eq!(
            get(&d, &p("hosts.[bar\\..*]")).unwrap(),
            Some(&json!("bar.example.com"))
        );
    }

    #[test]
    fn test_get_errors() {
        let d = doc();
        assert!(matches!(
            get(&d, &p("a.b.c.d")),
            Err(CoreError::NotTraversable { found: "number", .. })
        ));
        assert!(matches!(
            get(&d, &p("gateways.[name:missing]")),
            Err(CoreError::ElementNotFound { .. })
        ));
        assert!(matches!(
            get(&d, &p("hosts.[(]")),
            Err(CoreError::InvalidPath { .. })
        ));
        assert!(matches!(
            get(&d, &p("hosts.[.*example.*]")),
            Err(CoreError::AmbiguousMatch { count: 2, .. })
        ));
    }

    #[test]
    fn test_set_creates_missing_maps() {
        let mut d = json!({});
        set(&mut d, &p("x.y.z"), json!("v"), true).unwrap();
        assert_eq!(d, json!({"x": {"y": {"z": "v"}}}));
    }

    #[test]
    fn test_set_without_create_fails_on_missing_intermediate() {
        let mut d = doc();
        assert!(matches!(
            set(&mut d, &p("a.missing.c"), json!(1), false),
            Err(CoreError::PathNotFound { path }) if path == "a.missing"
        ));
        // a missing leaf key is still written
        set(&mut d, &p("a.b.new"), json!(true), false).unwrap();
        assert_eq!(get(&d, &p("a.b.new")).unwrap(), Some(&json!(true)));
    }

    #[test]
    fn test_set_inside_list_element() {
        let mut d = doc();
        set(&mut d, &p("gateways.[name:ingress].replicas"), json!(5), false).unwrap();
        assert_eq!(d["gateways"][0]["replicas"], json!(5));
        assert_eq!(d["gateways"][1]["replicas"], json!(2));
    }

    #[test]
    fn test_null_deletes() {
        let mut d = doc();
        set(&mut d, &p("a.b.c"), Value::Null, false).unwrap();
        assert_eq!(d["a"]["b"], json!({}));

        delete(&mut d, &p("gateways.[name:ingress]")).unwrap();
        assert_eq!(d["gateways"], json!([{"name": "egress", "replicas": 2}]));

        delete(&mut d, &p("hosts.[foo.*]")).unwrap();
        assert_eq!(d["hosts"], json!(["bar.example.com"]));

        // deleting an absent key is fine
        delete(&mut d, &p("a.nope")).unwrap();
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut d = doc();
        assert!(matches!(
            set(&mut d, &p("a.b.c.d"), json!(1), true),
            Err(CoreError::NotTraversable { .. })
        ));
    }

    #[test]
    fn test_set_root_replaces_document() {
        let mut d = doc();
        set(&mut d, &Path::root(), json!({"k": 1}), false).unwrap();
        assert_eq!(d, json!({"k": 1}));
    }
}
