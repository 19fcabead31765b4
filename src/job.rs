//! Job input contract and the types a job is decoded into.
//!
//! The host runtime hands the handler a JSON object shaped like
//!
//! ```json
//! { "id": "job-1",
//!   "input": { "file_content_base64": "SGVsbG8=",
//!              "filename": "a.txt",
//!              "options": { "to_formats": ["md", "json"], "ocr": true } } }
//! ```
//!
//! [`JobRequest`] mirrors that shape loosely (every field optional) so that a
//! malformed job becomes a structured error instead of a deserialisation
//! panic further up. [`ConversionJob`] is the validated, decoded form.

use crate::error::WorkerError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// A job object as delivered by the host runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    /// Job identifier assigned by the host. May be a string or a number.
    #[serde(default)]
    pub id: Option<Value>,

    /// The conversion input. `None` or an empty object is a missing input.
    #[serde(default)]
    pub input: Option<JobInput>,
}

impl JobRequest {
    /// Parse a job from an arbitrary JSON value.
    pub fn from_value(value: Value) -> Result<Self, WorkerError> {
        serde_json::from_value(value).map_err(|e| WorkerError::InvalidJob {
            detail: e.to_string(),
        })
    }

    /// Identifier used in logs and progress events.
    pub fn display_id(&self) -> String {
        match &self.id {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "local".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

/// The `input` object of a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobInput {
    #[serde(default)]
    pub file_content_base64: Option<String>,

    #[serde(default)]
    pub filename: Option<String>,

    #[serde(default)]
    pub options: Option<ConversionOptions>,
}

impl JobInput {
    pub fn is_empty(&self) -> bool {
        self.file_content_base64.is_none()
            && self.filename.is_none()
            && self.options.as_ref().is_none_or(|o| o.is_empty())
    }
}

/// Conversion options, forwarded to the service as flattened form fields.
///
/// Keys are kept sorted so the submitted form is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversionOptions(pub BTreeMap<String, Value>);

impl ConversionOptions {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Flatten the options into multipart text fields.
    ///
    /// | JSON value | form value |
    /// |------------|------------|
    /// | `true` / `false` | `"true"` / `"false"` |
    /// | number | decimal text |
    /// | string | as-is |
    /// | array of scalars | comma-joined, e.g. `to_formats = "md,json"` |
    /// | object or nested array | compact JSON text |
    /// | `null` | skipped |
    pub fn form_fields(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .filter_map(|(key, value)| flatten_value(value).map(|v| (key.clone(), v)))
            .collect()
    }
}

fn flatten_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Array(items) if items.iter().all(is_scalar) => Some(
            items
                .iter()
                .filter_map(scalar_text)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
        scalar => scalar_text(scalar),
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// A validated job, ready to submit. Immutable once built.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: String,
    pub file_bytes: Vec<u8>,
    pub filename: String,
    pub options: ConversionOptions,
}

/// Read a job object from a JSON file.
///
/// Only I/O and JSON syntax are checked here. The object's shape is checked
/// by the handler, so a malformed job still produces an error report.
pub fn load_job(path: impl AsRef<Path>) -> Result<Value, WorkerError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| WorkerError::InvalidJob {
        detail: format!("cannot read '{}': {e}", path.display()),
    })?;
    serde_json::from_str(&raw).map_err(|e| WorkerError::InvalidJob {
        detail: format!("'{}' is not valid JSON: {e}", path.display()),
    })
}
