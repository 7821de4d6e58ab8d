//! Structural comparison of configuration trees
//!
//! The diff is itself a tree shaped like the inputs. Each differing leaf holds a
//! string `"a -> b"`; a side that is absent is left empty (`"a ->"`, `"-> b"`).
//! Map key order never matters; list order does.

use glob::Pattern;
use serde_json::{Map, Value};

use crate::error::Result;

/// Diff two trees. `None` when they are equal once `ignore` paths are dropped.
///
/// Ignore patterns are globs over dotted paths, e.g. `metadata.annotations.*`
/// or `spec.template.**`. List items appear as `[i]` segments.
pub fn diff_trees(a: &Value, b: &Value, ignore: &[Pattern]) -> Option<Value> {
    diff_at(Some(a), Some(b), &mut Vec::new(), ignore)
}

/// Diff rendered as YAML, empty string when equal
pub fn diff_yaml(a: &Value, b: &Value, ignore: &[Pattern]) -> Result<String> {
    match diff_trees(a, b, ignore) {
        Some(d) => Ok(serde_yaml::to_string(&d)?),
        None => Ok(String::new()),
    }
}

/// Compile ignore patterns, skipping blanks
pub fn compile_patterns(patterns: &[String]) -> std::result::Result<Vec<Pattern>, glob::PatternError> {
    patterns
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(Pattern::new)
        .collect()
}

fn diff_at(
    a: Option<&Value>,
    b: Option<&Value>,
    path: &mut Vec<String>,
    ignore: &[Pattern],
) -> Option<Value> {
    if !path.is_empty() {
        let joined = path.join(".");
        if ignore.iter().any(|p| p.matches(&joined)) {
            return None;
        }
    }

    match (a, b) {
        (Some(Value::Object(am)), Some(Value::Object(bm))) => {
            let mut out = Map::new();
            let keys: std::collections::BTreeSet<&String> = am.keys().chain(bm.keys()).collect();
            for key in keys {
                path.push(key.clone());
                if let Some(d) = diff_at(am.get(key), bm.get(key), path, ignore) {
                    out.insert(key.clone(), d);
                }
                path.pop();
            }
            (!out.is_empty()).then_some(Value::Object(out))
        }
        (Some(Value::Array(al)), Some(Value::Array(bl))) => {
            let mut out = Map::new();
            for i in 0..al.len().max(bl.len()) {
                let seg = format!("[{}]", i);
                path.push(seg.clone());
                if let Some(d) = diff_at(al.get(i), bl.get(i), path, ignore) {
                    out.insert(seg, d);
                }
                path.pop();
            }
            (!out.is_empty()).then_some(Value::Object(out))
        }
        (a, b) if a == b => None,
        (a, b) => Some(Value::String(leaf(a, b))),
    }
}

fn leaf(a: Option<&Value>, b: Option<&Value>) -> String {
    match (a.map(render_leaf), b.map(render_leaf)) {
        (Some(a), Some(b)) => format!("{} -> {}", a, b),
        (Some(a), None) => format!("{} ->", a),
        (None, Some(b)) => format!("-> {}", b),
        (None, None) => String::new(),
    }
}

fn render_leaf(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_key_order_is_ignored() {
        let a = yaml("a: 1\nb:\n  c: x\n  d: y\n");
        let b = yaml("b:\n  d: y\n  c: x\na: 1\n");
        assert_eq!(diff_trees(&a, &b, &[]), None);
        assert_eq!(diff_yaml(&a, &b, &[]).unwrap(), "");
    }

    #[test]
    fn test_leaf_changes() {
        let a = yaml("a: 1\nb: gone\nl: [x, y]\n");
        let b = yaml("a: 2\nc: new\nl: [x, z]\n");
        let diff = diff_trees(&a, &b, &[]).unwrap();
        assert_eq!(
            diff,
            json!({
                "a": "1 -> 2",
                "b": "gone ->",
                "c": "-> new",
                "l": {"[1]": "y -> z"},
            })
        );
    }

    #[test]
    fn test_ignore_patterns() {
        let a = yaml("metadata:\n  annotations:\n    x: 1\n  name: a\n");
        let b = yaml("metadata:\n  annotations:\n    x: 2\n  name: a\n");
        let ignore = compile_patterns(&["metadata.annotations.*".to_string()]).unwrap();
        assert_eq!(diff_trees(&a, &b, &ignore), None);
        assert!(diff_trees(&a, &b, &[]).is_some());
    }

    #[test]
    fn test_subtree_vs_scalar() {
        let a = yaml("a:\n  b: 1\n");
        let b = yaml("a: flat\n");
        assert_eq!(
            diff_trees(&a, &b, &[]).unwrap(),
            json!({"a": "{\"b\":1} -> flat"})
        );
    }
}
