//! Template resolution for `{{Request.Input.UserId}}` style placeholders.
//!
//! Placeholders are dotted paths into a request-derived context. A string that is exactly one
//! placeholder resolves to the native JSON value at that path; placeholders embedded in a longer
//! string are stringified and spliced in. Missing paths never fail: they resolve to `null`
//! (whole-string) or the empty string (embedded). Only malformed syntax is an error.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map as JsonMap, Value};

use idle_types::Request;

use crate::error::{EngineError, EngineResult};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

static PATH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z0-9_\-]+)*$").expect("valid template path regex"));

/// Read-only lookup root for placeholder resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateContext {
    root: Value,
}

impl TemplateContext {
    /// Context exposing `Request.LifecycleEvent`, `Request.CorrelationId`, `Request.Actor`,
    /// `Request.Input.*`, and `Request.DesiredState.*`.
    pub fn from_request(request: &Request) -> Self {
        Self {
            root: request.template_context(),
        }
    }

    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Returns the value at a dotted `path`, or `None` when any segment is missing.
    ///
    /// Object keys match exactly first and then case-insensitively; numeric segments index
    /// into arrays.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.root, |current, segment| match current {
            Value::Object(map) => map.get(segment).or_else(|| {
                map.iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(segment))
                    .map(|(_, value)| value)
            }),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
            _ => None,
        })
    }
}

/// Piece of a parsed template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSegment {
    Literal(String),
    Placeholder(String),
}

/// Splits `input` into literal text and placeholder paths.
///
/// Fails on an unclosed `{{`, a stray `}}`, a nested `{{`, an empty placeholder, or a path with
/// characters outside `[A-Za-z0-9_.-]`.
pub fn parse_template(input: &str, source_path: &str) -> EngineResult<Vec<TemplateSegment>> {
    let mut segments = Vec::new();
    let mut remainder = input;

    while !remainder.is_empty() {
        let open = remainder.find(OPEN);
        let close = remainder.find(CLOSE);

        match (open, close) {
            (None, None) => {
                segments.push(TemplateSegment::Literal(remainder.to_string()));
                break;
            }
            (None, Some(_)) => return Err(EngineError::template(source_path, "unexpected '}}' without matching '{{'")),
            (Some(open_index), Some(close_index)) if close_index < open_index => {
                return Err(EngineError::template(source_path, "unexpected '}}' without matching '{{'"));
            }
            (Some(open_index), _) => {
                if open_index > 0 {
                    segments.push(TemplateSegment::Literal(remainder[..open_index].to_string()));
                }
                let after_open = &remainder[open_index + OPEN.len()..];
                let Some(end) = after_open.find(CLOSE) else {
                    return Err(EngineError::template(source_path, "unclosed '{{' placeholder"));
                };
                let body = &after_open[..end];
                if body.contains(OPEN) {
                    return Err(EngineError::template(source_path, "nested '{{' inside placeholder"));
                }
                let path = body.trim();
                if path.is_empty() {
                    return Err(EngineError::template(source_path, "empty placeholder"));
                }
                if !PATH_PATTERN.is_match(path) {
                    return Err(EngineError::template(source_path, format!("invalid placeholder path '{path}'")));
                }
                segments.push(TemplateSegment::Placeholder(path.to_string()));
                remainder = &after_open[end + CLOSE.len()..];
            }
        }
    }

    Ok(segments)
}

/// Returns true when `input` contains placeholder delimiters.
pub fn contains_template(input: &str) -> bool {
    input.contains(OPEN) || input.contains(CLOSE)
}

/// Resolves a string that may contain placeholders.
pub fn resolve_string(input: &str, context: &TemplateContext, source_path: &str) -> EngineResult<Value> {
    if !contains_template(input) {
        return Ok(Value::String(input.to_string()));
    }

    let segments = parse_template(input, source_path)?;
    if let [TemplateSegment::Placeholder(path)] = segments.as_slice() {
        return Ok(context.lookup(path).cloned().unwrap_or(Value::Null));
    }

    let mut output = String::with_capacity(input.len());
    for segment in &segments {
        match segment {
            TemplateSegment::Literal(text) => output.push_str(text),
            TemplateSegment::Placeholder(path) => {
                if let Some(value) = context.lookup(path) {
                    output.push_str(&format_json_value(value));
                }
            }
        }
    }
    Ok(Value::String(output))
}

/// Recursively resolves every string inside `value`, preserving shape and authored key order.
pub fn resolve_value(value: &Value, context: &TemplateContext, source_path: &str) -> EngineResult<Value> {
    match value {
        Value::String(text) => resolve_string(text, context, source_path),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| resolve_value(item, context, &format!("{source_path}[{index}]")))
            .collect::<EngineResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = JsonMap::with_capacity(map.len());
            for (key, nested) in map {
                resolved.insert(key.clone(), resolve_value(nested, context, &format!("{source_path}.{key}"))?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

/// Resolves an ordered parameter map such as a step's `with` block.
pub fn resolve_map(
    values: &IndexMap<String, Value>,
    context: &TemplateContext,
    source_path: &str,
) -> EngineResult<IndexMap<String, Value>> {
    values
        .iter()
        .map(|(key, value)| -> EngineResult<(String, Value)> {
            Ok((key.clone(), resolve_value(value, context, &format!("{source_path}.{key}"))?))
        })
        .collect()
}

/// Stringifies a resolved value for embedding in a larger string.
pub fn format_json_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
