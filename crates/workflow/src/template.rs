//! `{{path}}` interpolation over the step-result tree.
//!
//! A template is a sequence of literal text and path expressions. Paths use
//! the [`JsonPath`] grammar and resolve against a JSON root holding every
//! prior step result plus the `trigger` payload.

use serde_json::{Map, Value};
use thiserror::Error;

use signalflow_core::{JsonPath, PathError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed '{{{{' in template '{0}'")]
    Unclosed(String),

    #[error(transparent)]
    Path(#[from] PathError),
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    Expr(JsonPath),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut parts = Vec::new();
        let mut rest = source;
        while let Some(open) = rest.find("{{") {
            if open > 0 {
                parts.push(Part::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let close = after
                .find("}}")
                .ok_or_else(|| TemplateError::Unclosed(source.to_string()))?;
            parts.push(Part::Expr(JsonPath::parse(&after[..close])?));
            rest = &after[close + 2..];
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }
        Ok(Self { parts })
    }

    /// True when the template contains no expressions.
    pub fn is_literal(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Literal(_)))
    }

    /// Render to a JSON value.
    ///
    /// A template consisting of exactly one expression yields the resolved
    /// value itself (`null` when missing); anything else renders to a string.
    pub fn render(&self, root: &Value) -> Value {
        if let [Part::Expr(path)] = self.parts.as_slice() {
            return path.resolve(root).cloned().unwrap_or(Value::Null);
        }
        Value::String(self.render_string(root))
    }

    /// Render to text; missing values and `null` render empty.
    pub fn render_string(&self, root: &Value) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Expr(path) => match path.resolve(root) {
                    None | Some(Value::Null) => {}
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                },
            }
        }
        out
    }
}

/// Render every string inside `value`, recursing through arrays and objects.
pub fn render_value(value: &Value, root: &Value) -> Result<Value, TemplateError> {
    Ok(match value {
        Value::String(s) => Template::parse(s)?.render(root),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(item, root))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(render_map(map, root)?),
        other => other.clone(),
    })
}

pub fn render_map(map: &Map<String, Value>, root: &Value) -> Result<Map<String, Value>, TemplateError> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), render_value(v, root)?)))
        .collect()
}
