//! Specification value object
//!
//! A specification is the structured document the conversational agent
//! produces once the end user has described what they want built. It is kept
//! as an opaque key/value mapping: the extraction pipeline only checks that
//! every required key is present, and the generation session re-checks the
//! same keys before handing the document to the backend.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::{Error, Result};

/// Extracted specification document
///
/// Immutable once extracted. Cloning is cheap enough for the sizes involved
/// (a handful of keys), so the phase machine and generation session each hold
/// their own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Specification(Map<String, Value>);

impl Specification {
    /// Wrap an already-parsed mapping
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build from any JSON value; only objects are accepted
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::InvalidSpecification(format!(
                "expected a mapping, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Look up a field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Project name, if it is a plain string
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    /// True when every key in `required` is present
    pub fn contains_all<S: AsRef<str>>(&self, required: &[S]) -> bool {
        required.iter().all(|key| self.0.contains_key(key.as_ref()))
    }

    /// Number of top-level fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the mapping is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying mapping
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Schema re-check used before generation
    ///
    /// Produces one human-readable error per offending field. A field fails
    /// when it is absent, null, or an empty string/list/mapping. Content is
    /// never judged beyond that.
    pub fn validate<S: AsRef<str>>(&self, required: &[S]) -> std::result::Result<(), Vec<FieldError>> {
        let errors: Vec<FieldError> = required
            .iter()
            .filter_map(|key| {
                let key = key.as_ref();
                match self.0.get(key) {
                    None => Some(FieldError::new(key, "is required")),
                    Some(value) if is_blank(value) => Some(FieldError::new(key, "must not be empty")),
                    Some(_) => None,
                }
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// Field-level validation error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}
