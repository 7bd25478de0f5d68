//! Step prompt interpolation
//!
//! `{{name}}` resolves, in order, to `project_id`, a ProcessRun input, or the
//! whole result of a completed step. `{{step.key}}` reaches one level into an
//! object result (or object input). Anything unresolved is left untouched so
//! the gap stays visible in the prompt.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Values a step template can reference
pub struct Bindings<'a> {
    pub project_id: &'a str,
    pub inputs: &'a Map<String, Value>,
    pub results: &'a HashMap<String, Value>,
}

impl Bindings<'_> {
    fn lookup(&self, key: &str) -> Option<String> {
        if key == "project_id" {
            return Some(self.project_id.to_string());
        }
        if let Some(value) = self.inputs.get(key).or_else(|| self.results.get(key)) {
            return Some(render_value(value));
        }
        let (head, field) = key.split_once('.')?;
        let container = self.results.get(head).or_else(|| self.inputs.get(head))?;
        container.as_object()?.get(field).map(render_value)
    }
}

/// Substitute every resolvable placeholder in `template`
pub fn interpolate(template: &str, bindings: &Bindings<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = after[..close].trim();
        match is_key(key).then(|| bindings.lookup(key)).flatten() {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}

fn is_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Plain text for strings, one line per array item, compact JSON otherwise
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render_value).collect::<Vec<_>>().join("\n"),
        other => other.to_string(),
    }
}
