//! # Output Extractor
//!
//! Reduces a reasoner response to the canonical fields of its stage schema.
//!
//! Reasoner output arrives with noise: prose before the JSON, markdown code
//! fences, envelope objects (`{"result": ...}`), reasoning traces and metadata
//! keys. Extraction runs in three steps:
//!
//! 1. [`parse_document`]: raw text to a JSON document
//! 2. [`locate`]: find the value that carries the schema's root fields
//! 3. [`project`]: keep exactly the fields the schema declares
//!
//! Projection is idempotent: projecting an already-projected value returns it
//! unchanged.

use crate::GovernanceError;
use crate::schema::{OutputSchema, Shape};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Keys under which reasoners commonly nest their actual answer.
const ENVELOPE_KEYS: &[&str] = &["result", "output", "data", "response", "answer", "content"];

/// Maximum envelope nesting followed by [`locate`].
const MAX_ENVELOPE_DEPTH: usize = 3;

// =============================================================================
// RAW TEXT -> DOCUMENT
// =============================================================================

/// Parse raw reasoner text into a JSON document.
///
/// Accepts bare JSON, JSON inside a markdown code fence, or JSON embedded in
/// surrounding prose (the largest object or array found).
pub fn parse_document(raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty response".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(fenced) = strip_code_fence(trimmed)
        && let Ok(value) = serde_json::from_str::<Value>(&fenced)
    {
        return Ok(value);
    }

    if let Some(value) = largest_embedded_json(trimmed) {
        return Ok(value);
    }

    Err("response does not contain a JSON document".to_string())
}

/// Content of the first markdown code fence, language tag removed.
fn strip_code_fence(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_start = &text[start + 3..];
    let body_start = after_start.find('\n')?;
    let body = &after_start[body_start + 1..];
    let end = body.find("```")?;
    Some(body[..end].trim().to_string())
}

/// Largest object or array embedded in prose.
///
/// Every `{` or `[` is tried as a value start; the parser stops at the end of
/// the value, so brackets in the surrounding text do not matter. Openers
/// inside an accepted value are skipped.
fn largest_embedded_json(text: &str) -> Option<Value> {
    let mut best: Option<(usize, Value)> = None;
    let mut resume = 0;
    for (start, _) in text.match_indices(['{', '[']) {
        if start < resume {
            continue;
        }
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            let len = stream.byte_offset();
            resume = start + len;
            if best.as_ref().is_none_or(|(best_len, _)| len > *best_len) {
                best = Some((len, value));
            }
        }
    }
    best.map(|(_, value)| value)
}

// =============================================================================
// DOCUMENT -> LOCATED VALUE
// =============================================================================

/// Find the value inside `document` that carries the schema root.
///
/// Tries, in order: the document itself, a bare array standing in for a
/// single-array-field root, then the known envelope keys (including envelopes
/// whose value is a JSON string).
pub fn locate<'a>(schema: &OutputSchema, document: &'a Value) -> Cow<'a, Value> {
    locate_at(schema, document, 0).unwrap_or(Cow::Borrowed(document))
}

fn locate_at<'a>(
    schema: &OutputSchema,
    document: &'a Value,
    depth: usize,
) -> Option<Cow<'a, Value>> {
    if carries_root(schema, document) {
        return Some(Cow::Borrowed(document));
    }

    if let (Value::Array(_), Shape::Object(fields)) = (document, schema.root) {
        let arrays: Vec<_> = fields
            .iter()
            .filter(|f| f.required && matches!(f.shape, Shape::Array(_)))
            .collect();
        if fields.iter().filter(|f| f.required).count() == 1
            && let [only] = arrays.as_slice()
        {
            let mut wrapped = Map::new();
            wrapped.insert(only.name.to_string(), document.clone());
            return Some(Cow::Owned(Value::Object(wrapped)));
        }
    }

    if depth >= MAX_ENVELOPE_DEPTH {
        return None;
    }

    let Value::Object(map) = document else {
        return None;
    };
    for key in ENVELOPE_KEYS {
        match map.get(*key) {
            Some(Value::String(text)) => {
                if let Ok(inner) = parse_document(text)
                    && let Some(found) = locate_at(schema, &inner, depth + 1)
                {
                    return Some(Cow::Owned(found.into_owned()));
                }
            }
            Some(inner) => {
                if let Some(found) = locate_at(schema, inner, depth + 1) {
                    return Some(found);
                }
            }
            None => {}
        }
    }
    None
}

fn carries_root(schema: &OutputSchema, value: &Value) -> bool {
    match (schema.root, value) {
        (Shape::Object(_), Value::Object(map)) => schema
            .required_root_fields()
            .iter()
            .all(|name| map.get(*name).is_some_and(|v| !v.is_null())),
        (Shape::Array(_), Value::Array(_)) => true,
        (Shape::Scalar(_) | Shape::Enum(_), v) => !v.is_array() && !v.is_object(),
        _ => false,
    }
}

// =============================================================================
// LOCATED VALUE -> CANONICAL VALUE
// =============================================================================

/// Keep exactly the fields declared by `shape`, failing on a missing
/// required field.
pub fn project(shape: &Shape, value: &Value) -> Result<Value, GovernanceError> {
    project_at(shape, value, "$")
}

fn project_at(shape: &Shape, value: &Value, path: &str) -> Result<Value, GovernanceError> {
    match shape {
        Shape::Scalar(_) | Shape::Enum(_) => {
            if value.is_object() || value.is_array() {
                return Err(GovernanceError::Extraction {
                    field: path.to_string(),
                });
            }
            Ok(value.clone())
        }
        Shape::Array(item) => {
            let Value::Array(items) = value else {
                return Err(GovernanceError::Extraction {
                    field: path.to_string(),
                });
            };
            items
                .iter()
                .enumerate()
                .map(|(i, v)| project_at(item, v, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        Shape::Object(fields) => {
            let Value::Object(map) = value else {
                return Err(GovernanceError::Extraction {
                    field: path.to_string(),
                });
            };
            let mut out = Map::new();
            for field in *fields {
                let field_path = format!("{path}.{}", field.name);
                match map.get(field.name) {
                    Some(v) if !v.is_null() => {
                        out.insert(
                            field.name.to_string(),
                            project_at(&field.shape, v, &field_path)?,
                        );
                    }
                    _ if field.required => {
                        return Err(GovernanceError::Extraction { field: field_path });
                    }
                    _ => {}
                }
            }
            Ok(Value::Object(out))
        }
    }
}

// =============================================================================
// EXTRACTOR
// =============================================================================

/// Applies locate + project uniformly for every reasoning-backed stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputExtractor;

impl OutputExtractor {
    /// Canonical JSON for `schema` found in `document`.
    ///
    /// Fails with `Extraction` when a required field is absent. The adapter
    /// validates first, so such a failure is a schema contract defect.
    pub fn canonical(schema: &OutputSchema, document: &Value) -> Result<Value, GovernanceError> {
        let located = locate(schema, document);
        project(&schema.root, &located)
    }
}

// =============================================================================
// TESTS
// =============================================================================
