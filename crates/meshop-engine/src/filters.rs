//! Template filters available to component charts
//!
//! Charts are written against Helm conventions, so the filters mirror the
//! Helm names charts expect (`toyaml`, `nindent`, `quote`, ...).

use base64::Engine as _;
use minijinja::{Environment, Error, ErrorKind, Value};

/// Register every chart filter on `env`
pub fn register(env: &mut Environment<'_>) {
    env.add_filter("toyaml", toyaml);
    env.add_filter("tojson", tojson);
    env.add_filter("b64encode", b64encode);
    env.add_filter("quote", quote);
    env.add_filter("indent", indent);
    env.add_filter("nindent", nindent);
    env.add_filter("required", required);
    env.add_filter("empty", empty);
}

fn to_json(value: &Value) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

/// `{{ values.resources | toyaml }}`, without document marker or trailing newline
pub fn toyaml(value: Value) -> Result<String, Error> {
    let json = to_json(&value)?;
    if json.as_object().is_some_and(|m| m.is_empty()) {
        return Ok("{}".to_string());
    }
    let yaml = serde_yaml::to_string(&json).map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

/// `{{ values.meshNetworks | tojson }}`
pub fn tojson(value: Value) -> Result<String, Error> {
    serde_json::to_string(&to_json(&value)?).map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

#[must_use]
pub fn b64encode(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

/// Double-quote a value, escaping backslashes and quotes
#[must_use]
pub fn quote(value: Value) -> String {
    let raw = match value.as_str() {
        Some(s) => s.to_string(),
        None if value.is_undefined() || value.is_none() => String::new(),
        None => value.to_string(),
    };
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Prefix every non-empty line with `spaces` spaces
#[must_use]
pub fn indent(value: String, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    value
        .lines()
        .map(|line| if line.is_empty() { String::new() } else { format!("{}{}", pad, line) })
        .collect::<Vec<_>>()
        .join("\n")
}

/// [`indent`] preceded by a newline, for use after a mapping key
#[must_use]
pub fn nindent(value: String, spaces: usize) -> String {
    format!("\n{}", indent(value, spaces))
}

/// Fail the render when the value is missing or an empty string
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    let missing = value.is_undefined() || value.is_none() || value.as_str().is_some_and(str::is_empty);
    if missing {
        let msg = message.unwrap_or_else(|| "required value is missing".to_string());
        return Err(Error::new(ErrorKind::InvalidOperation, msg));
    }
    Ok(value)
}

/// True for undefined, none, and zero-length strings or collections
pub fn empty(value: Value) -> bool {
    if value.is_undefined() || value.is_none() {
        return true;
    }
    match value.len() {
        Some(len) => len == 0,
        None => value.as_str().is_some_and(str::is_empty),
    }
}
