//! Response normalizer: turns raw completion text into a validated value.
//!
//! Steps: trim → strip markdown fences → strict JSON parse → walk the schema
//! descriptor, repairing what can be repaired and rejecting what cannot.
//! The original raw text travels with every failure so callers can fall
//! back to showing it.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{FilterConfirmation, FilterVerdict};
use crate::pipeline::schema::{ObjectShape, SchemaDescriptor, Shape};

const FENCE: &str = "```";
const JSON_FENCE: &str = "```json";

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("response is not valid JSON: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
        raw: String,
    },

    #[error("response does not match the {schema} schema: {detail}")]
    Shape {
        schema: &'static str,
        detail: String,
        raw: String,
    },
}

impl NormalizeError {
    /// The completion text exactly as it was received.
    pub fn raw(&self) -> &str {
        match self {
            NormalizeError::Parse { raw, .. } | NormalizeError::Shape { raw, .. } => raw,
        }
    }
}

/// A validated value together with the fence-stripped text that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub value: Value,
    pub cleaned: String,
}

/// Strips a leading "```json" or "```" marker and a trailing "```" marker.
///
/// Open-only fences and both tag forms come out identical to bare JSON.
pub fn strip_fences(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix(JSON_FENCE) {
        text = rest;
    } else if let Some(rest) = text.strip_prefix(FENCE) {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix(FENCE) {
        text = rest;
    }
    text.trim()
}

/// Parses and validates `raw` against `schema`.
pub fn normalize(raw: &str, schema: &SchemaDescriptor) -> Result<Normalized, NormalizeError> {
    let cleaned = strip_fences(raw);

    let parsed: Value = serde_json::from_str(cleaned).map_err(|source| {
        warn!(
            "Completion for {} is not valid JSON: {source}",
            schema.kind.as_str()
        );
        NormalizeError::Parse {
            source,
            raw: raw.to_string(),
        }
    })?;

    let value = validate(parsed, &schema.root, "$").map_err(|detail| {
        warn!(
            "Completion for {} failed shape validation: {detail}",
            schema.kind.as_str()
        );
        NormalizeError::Shape {
            schema: schema.kind.as_str(),
            detail,
            raw: raw.to_string(),
        }
    })?;

    Ok(Normalized {
        value,
        cleaned: cleaned.to_string(),
    })
}

/// Normalizes `raw` and deserializes the validated value into `T`.
pub fn normalize_as<T: DeserializeOwned>(
    raw: &str,
    schema: &SchemaDescriptor,
) -> Result<(T, String), NormalizeError> {
    let normalized = normalize(raw, schema)?;
    let typed = serde_json::from_value(normalized.value).map_err(|e| NormalizeError::Shape {
        schema: schema.kind.as_str(),
        detail: e.to_string(),
        raw: raw.to_string(),
    })?;
    Ok((typed, normalized.cleaned))
}

/// Flattens a validated `{"appliedFilters": {name: verdict}}` object into a
/// list, preserving the order the model returned.
pub fn applied_filters_to_vec(value: &Value) -> Vec<FilterConfirmation> {
    let Some(map) = value.get("appliedFilters").and_then(Value::as_object) else {
        return Vec::new();
    };

    map.iter()
        .filter_map(|(name, verdict)| {
            serde_json::from_value::<FilterVerdict>(verdict.clone())
                .ok()
                .map(|v| FilterConfirmation {
                    name: name.clone(),
                    status: v.status,
                    explanation: v.explanation,
                })
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Shape validation
// ────────────────────────────────────────────────────────────────────────────

fn validate(value: Value, shape: &Shape, path: &str) -> Result<Value, String> {
    match shape {
        Shape::String => match value {
            Value::String(_) => Ok(value),
            other => Err(mismatch(path, shape, &other)),
        },
        Shape::Boolean => match value {
            Value::Bool(_) => Ok(value),
            other => Err(mismatch(path, shape, &other)),
        },
        Shape::Nullable(inner) => match value {
            Value::Null => Ok(Value::Null),
            other => validate(other, inner, path),
        },
        Shape::Array(items) => match value {
            Value::Array(elements) => validate_array(elements, items, path),
            other => Err(mismatch(path, shape, &other)),
        },
        Shape::Object(object) => match value {
            Value::Object(fields) => validate_object(fields, object, path).map(Value::Object),
            other => Err(mismatch(path, shape, &other)),
        },
        Shape::Map(values) => match value {
            Value::Object(entries) => Ok(Value::Object(validate_map(entries, values, path))),
            other => Err(mismatch(path, shape, &other)),
        },
    }
}

fn validate_array(elements: Vec<Value>, items: &Shape, path: &str) -> Result<Value, String> {
    // Scalar items are repairable by dropping strays; object items are not.
    if matches!(items, Shape::String | Shape::Boolean) {
        let before = elements.len();
        let kept: Vec<Value> = elements
            .into_iter()
            .filter(|e| validate(e.clone(), items, path).is_ok())
            .collect();
        if kept.len() != before {
            debug!(
                "Dropped {} non-{} item(s) at {path}",
                before - kept.len(),
                items.type_name()
            );
        }
        return Ok(Value::Array(kept));
    }

    let validated = elements
        .into_iter()
        .enumerate()
        .map(|(i, element)| validate(element, items, &format!("{path}[{i}]")))
        .collect::<Result<Vec<_>, _>>()?;

    match items {
        Shape::Object(ObjectShape {
            identity: Some(key),
            ..
        }) => Ok(Value::Array(dedup_by_identity(validated, key, path))),
        _ => Ok(Value::Array(validated)),
    }
}

/// Keeps the first element for each identity value. Comparison ignores case
/// and surrounding whitespace.
fn dedup_by_identity(elements: Vec<Value>, key: &str, path: &str) -> Vec<Value> {
    let mut seen: Vec<(String, usize)> = Vec::new();
    let mut kept = Vec::with_capacity(elements.len());

    for (i, element) in elements.into_iter().enumerate() {
        let identity = element
            .get(key)
            .and_then(Value::as_str)
            .map(|v| v.trim().to_lowercase());
        match identity {
            Some(id) => {
                if let Some((_, first)) = seen.iter().find(|(s, _)| *s == id) {
                    debug!("Dropped {path}[{i}].{key}: duplicates {path}[{first}]");
                    continue;
                }
                seen.push((id, i));
                kept.push(element);
            }
            None => kept.push(element),
        }
    }
    kept
}

fn validate_object(
    mut fields: Map<String, Value>,
    object: &ObjectShape,
    path: &str,
) -> Result<Map<String, Value>, String> {
    let mut out = Map::new();

    for property in &object.properties {
        let field_path = format!("{path}.{}", property.name);
        match fields.remove(property.name) {
            Some(Value::Null) if !property.required => {}
            Some(Value::Null) if property.shape.empty_default().is_some() => {
                if let Some(empty) = property.shape.empty_default() {
                    out.insert(property.name.to_string(), empty);
                }
            }
            Some(value) => match validate(value, &property.shape, &field_path) {
                Ok(valid) => {
                    out.insert(property.name.to_string(), valid);
                }
                Err(detail) if property.required => return Err(detail),
                Err(detail) => debug!("Dropped optional field: {detail}"),
            },
            None if property.required => match property.shape.empty_default() {
                Some(empty) => {
                    debug!("Defaulted missing {field_path} to empty");
                    out.insert(property.name.to_string(), empty);
                }
                None => return Err(format!("missing required field {field_path}")),
            },
            None => {}
        }
    }

    if object.additional_properties {
        out.extend(fields);
    } else if !fields.is_empty() {
        debug!(
            "Dropped unexpected key(s) at {path}: {}",
            fields.keys().cloned().collect::<Vec<_>>().join(", ")
        );
    }

    Ok(out)
}

fn validate_map(entries: Map<String, Value>, values: &Shape, path: &str) -> Map<String, Value> {
    entries
        .into_iter()
        .filter_map(|(key, value)| {
            let entry_path = format!("{path}.{key}");
            match validate(value, values, &entry_path) {
                Ok(valid) => Some((key, valid)),
                Err(detail) => {
                    warn!("Dropped nonconforming entry: {detail}");
                    None
                }
            }
        })
        .collect()
}

fn mismatch(path: &str, expected: &Shape, found: &Value) -> String {
    let found = match found {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("expected {} at {path}, found {found}", expected.type_name())
}
