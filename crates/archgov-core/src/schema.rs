//! # Output Schemas
//!
//! Static description of the JSON each reasoning-backed stage must return.
//!
//! A schema serves two consumers:
//! - the reasoner, which receives [`OutputSchema::describe`] with every request
//! - the output extractor, which keeps exactly the fields listed here

use serde_json::{Map, Value, json};

/// JSON scalar kinds a field may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl ScalarKind {
    fn type_name(self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Integer => "integer",
            ScalarKind::Number => "number",
            ScalarKind::Boolean => "boolean",
        }
    }
}

/// Shape of a JSON value.
#[derive(Debug, Clone, Copy)]
pub enum Shape {
    Scalar(ScalarKind),
    /// A scalar restricted to a fixed set of string values.
    Enum(&'static [&'static str]),
    Array(&'static Shape),
    Object(&'static [Field]),
}

/// A named member of an object shape.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub required: bool,
    pub shape: Shape,
}

impl Field {
    #[must_use]
    pub const fn required(name: &'static str, shape: Shape) -> Self {
        Self {
            name,
            required: true,
            shape,
        }
    }

    #[must_use]
    pub const fn optional(name: &'static str, shape: Shape) -> Self {
        Self {
            name,
            required: false,
            shape,
        }
    }
}

/// Expected output of one reasoning-backed stage.
#[derive(Debug, Clone, Copy)]
pub struct OutputSchema {
    pub name: &'static str,
    pub root: Shape,
}

impl OutputSchema {
    /// JSON Schema rendering sent to the reasoner.
    #[must_use]
    pub fn describe(&self) -> Value {
        let mut doc = describe_shape(&self.root);
        if let Value::Object(map) = &mut doc {
            map.insert("title".to_string(), Value::String(self.name.to_string()));
        }
        doc
    }

    /// Names of the required top-level fields (empty for non-object roots).
    #[must_use]
    pub fn required_root_fields(&self) -> Vec<&'static str> {
        match self.root {
            Shape::Object(fields) => fields
                .iter()
                .filter(|f| f.required)
                .map(|f| f.name)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Check `value` against the schema. Unknown fields are tolerated; they
    /// are dropped later by the extractor.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        validate_shape(&self.root, value, "$")
    }
}

fn validate_shape(shape: &Shape, value: &Value, path: &str) -> Result<(), String> {
    match shape {
        Shape::Scalar(kind) => {
            let ok = match kind {
                ScalarKind::String => value.is_string(),
                ScalarKind::Integer => value.is_u64() || value.is_i64(),
                ScalarKind::Number => value.is_number(),
                ScalarKind::Boolean => value.is_boolean(),
            };
            if ok {
                Ok(())
            } else {
                Err(format!("{path}: expected {}, got {}", kind.type_name(), kind_of(value)))
            }
        }
        Shape::Enum(allowed) => match value.as_str() {
            Some(s) if allowed.iter().any(|a| enum_matches(a, s)) => Ok(()),
            Some(s) => Err(format!("{path}: '{s}' is not one of {}", allowed.join(", "))),
            None => Err(format!("{path}: expected string, got {}", kind_of(value))),
        },
        Shape::Array(item) => {
            let Value::Array(items) = value else {
                return Err(format!("{path}: expected array, got {}", kind_of(value)));
            };
            items
                .iter()
                .enumerate()
                .try_for_each(|(i, v)| validate_shape(item, v, &format!("{path}[{i}]")))
        }
        Shape::Object(fields) => {
            let Value::Object(map) = value else {
                return Err(format!("{path}: expected object, got {}", kind_of(value)));
            };
            for field in *fields {
                let field_path = format!("{path}.{}", field.name);
                match map.get(field.name) {
                    Some(Value::Null) | None if field.required => {
                        return Err(format!("{field_path}: required field is missing"));
                    }
                    Some(Value::Null) | None => {}
                    Some(v) => validate_shape(&field.shape, v, &field_path)?,
                }
            }
            Ok(())
        }
    }
}

/// Exact, all-lowercase or all-uppercase spelling of an allowed value.
fn enum_matches(allowed: &str, candidate: &str) -> bool {
    allowed == candidate
        || allowed.to_lowercase() == candidate
        || allowed.to_uppercase() == candidate
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn describe_shape(shape: &Shape) -> Value {
    match shape {
        Shape::Scalar(kind) => json!({ "type": kind.type_name() }),
        Shape::Enum(values) => json!({ "type": "string", "enum": values }),
        Shape::Array(item) => json!({ "type": "array", "items": describe_shape(item) }),
        Shape::Object(fields) => {
            let mut properties = Map::new();
            let mut required = Vec::new();
            for field in *fields {
                properties.insert(field.name.to_string(), describe_shape(&field.shape));
                if field.required {
                    required.push(Value::String(field.name.to_string()));
                }
            }
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
            })
        }
    }
}

/// Severity names accepted in reasoner output.
pub const SEVERITY_NAMES: &[&str] = &["Low", "Medium", "High", "Critical"];
