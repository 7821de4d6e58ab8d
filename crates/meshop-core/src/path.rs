//! Path addressing for configuration trees
//!
//! A path is a dotted string where each segment is either a map key or a list
//! matcher in brackets:
//!
//! - `a.b.c` addresses nested map keys
//! - `gateways.components.ingressGateway.[name:istio-ingressgateway].k8s`
//!   selects the list element whose `name` field is `istio-ingressgateway`
//! - `values.global.meshNetworks.[10\.0\..*]` selects the scalar list element
//!   matching the regex

use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// One segment of a [`Path`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathElement {
    /// A map key
    Key(String),
    /// `[value]`: the scalar list element whose string form matches `value` as a regex
    ValueMatch(String),
    /// `[key:value]`: the map list element whose `key` field equals `value`
    KeyMatch { key: String, value: String },
}

impl PathElement {
    pub fn key(key: impl Into<String>) -> Self {
        PathElement::Key(key.into())
    }

    pub fn is_matcher(&self) -> bool {
        !matches!(self, PathElement::Key(_))
    }

    fn parse(segment: &str, full: &str) -> Result<Self> {
        if segment.is_empty() {
            return Err(invalid(full, "empty path segment"));
        }

        let Some(inner) = segment.strip_prefix('[') else {
            if segment.contains(']') {
                return Err(invalid(full, format!("unexpected ']' in segment {:?}", segment)));
            }
            return Ok(PathElement::Key(segment.to_string()));
        };

        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| invalid(full, format!("unterminated matcher {:?}", segment)))?;

        if inner.is_empty() {
            return Err(invalid(full, "empty matcher []"));
        }

        match inner.split_once(':') {
            Some((key, _)) if key.is_empty() => {
                Err(invalid(full, format!("matcher {:?} has an empty key", segment)))
            }
            Some((key, value)) => Ok(PathElement::KeyMatch {
                key: key.to_string(),
                value: value.to_string(),
            }),
            None => Ok(PathElement::ValueMatch(inner.to_string())),
        }
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Key(k) => write!(f, "{}", k),
            PathElement::ValueMatch(v) => write!(f, "[{}]", v),
            PathElement::KeyMatch { key, value } => write!(f, "[{}:{}]", key, value),
        }
    }
}

/// An ordered sequence of [`PathElement`]s. The empty path addresses the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path(Vec<PathElement>);

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted path. Dots inside brackets do not split segments.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::root());
        }

        let mut elements = Vec::new();
        let mut current = String::new();
        let mut depth = 0usize;

        for c in s.chars() {
            match c {
                '[' => {
                    if depth > 0 {
                        return Err(invalid(s, "nested '[' is not allowed"));
                    }
                    depth += 1;
                    current.push(c);
                }
                ']' => {
                    if depth == 0 {
                        return Err(invalid(s, "unbalanced ']'"));
                    }
                    depth -= 1;
                    current.push(c);
                }
                '.' if depth == 0 => {
                    elements.push(PathElement::parse(&current, s)?);
                    current.clear();
                }
                _ => current.push(c),
            }
        }

        if depth != 0 {
            return Err(invalid(s, "unterminated '['"));
        }
        elements.push(PathElement::parse(&current, s)?);

        Ok(Self(elements))
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, element: PathElement) {
        self.0.push(element);
    }

    /// A new path with `element` appended
    pub fn join(&self, element: PathElement) -> Self {
        let mut out = self.clone();
        out.push(element);
        out
    }

    /// The first `n` elements
    pub fn prefix(&self, n: usize) -> Self {
        Self(self.0[..n.min(self.0.len())].to_vec())
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }
}

impl From<Vec<PathElement>> for Path {
    fn from(elements: Vec<PathElement>) -> Self {
        Self(elements)
    }
}

impl FromStr for Path {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, el) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", el)?;
        }
        Ok(())
    }
}

fn invalid(path: &str, message: impl Into<String>) -> CoreError {
    CoreError::InvalidPath {
        path: path.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keys_and_matchers() {
        let path = Path::parse("a.b.[k:v].c").unwrap();
        assert_eq!(
            path.elements(),
            &[
                PathElement::key("a"),
                PathElement::key("b"),
                PathElement::KeyMatch {
                    key: "k".into(),
                    value: "v".into()
                },
                PathElement::key("c"),
            ]
        );
        assert_eq!(path.to_string(), "a.b.[k:v].c");
    }

    #[test]
    fn test_parse_value_matcher() {
        let path = Path::parse("list.[foo]").unwrap();
        assert_eq!(path.elements()[1], PathElement::ValueMatch("foo".into()));
    }

    #[test]
    fn test_dots_inside_brackets_do_not_split() {
        let path = Path::parse("hosts.[10\\.0\\..*].x").unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.elements()[1], PathElement::ValueMatch("10\\.0\\..*".into()));

        let path = Path::parse("gw.[name:a.b]").unwrap();
        assert_eq!(
            path.elements()[1],
            PathElement::KeyMatch {
                key: "name".into(),
                value: "a.b".into()
            }
        );
    }

    #[test]
    fn test_value_may_contain_colon() {
        let path = Path::parse("[image:docker.io/istio:1.3]").unwrap();
        assert_eq!(
            path.elements()[0],
            PathElement::KeyMatch {
                key: "image".into(),
                value: "docker.io/istio:1.3".into()
            }
        );
    }

    #[test]
    fn test_empty_string_is_root() {
        assert!(Path::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["a.[]", "a..b", "a.[k:v", "a.b]", "a.[[x]]", "[:v]", "a."] {
            assert!(
                matches!(Path::parse(bad), Err(CoreError::InvalidPath { .. })),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_prefix_and_join() {
        let path = Path::parse("a.b.c").unwrap();
        assert_eq!(path.prefix(2).to_string(), "a.b");
        assert_eq!(path.prefix(10), path);
        assert_eq!(path.join(PathElement::key("d")).to_string(), "a.b.c.d");
    }
}
