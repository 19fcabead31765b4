//! Error types for the docling-worker library.
//!
//! Every failure a job can hit is a variant of [`WorkerError`]. The handler
//! boundary ([`crate::convert::ConversionDriver::handle`]) never lets one
//! escape as a fault: it turns the error into an [`ErrorReport`], the JSON
//! object the host runtime hands back to whoever submitted the job.
//!
//! Service-side failures keep the raw response body or status payload so the
//! caller can see exactly what docling-serve said.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// All errors produced while handling a conversion job.
#[derive(Debug, Error)]
pub enum WorkerError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The job carried no input object or no `file_content_base64`.
    #[error("No file content provided: {detail}")]
    MissingInput { detail: String },

    /// The job object does not match the input contract.
    #[error("Invalid job input: {detail}")]
    InvalidJob { detail: String },

    /// The payload is not valid base64, or decodes to zero bytes.
    #[error("Failed to decode base64 file content: {detail}")]
    DecodeError { detail: String },

    // ── Server lifecycle errors ───────────────────────────────────────────
    /// The conversion server did not become ready within the deadline.
    #[error("Conversion server not ready after {secs}s: {detail}")]
    SupervisorTimeout { secs: u64, detail: String },

    /// The conversion server died while this job was waiting on it.
    #[error("Conversion server exited while polling task {task_id}")]
    ServerLost { task_id: String },

    // ── Conversion service errors ─────────────────────────────────────────
    /// The service answered with a response shape we do not understand.
    #[error("Unexpected response from conversion service: {message}")]
    ProtocolError {
        message: String,
        status_code: Option<u16>,
        body: Option<String>,
    },

    /// Submit returned a non-2xx status (422 means the options were rejected).
    #[error("Conversion request rejected with HTTP {status_code}: {body}")]
    SubmitRejected { status_code: u16, body: String },

    /// A request to the service could not be completed.
    #[error("Request to {endpoint} failed: {detail}")]
    Transport { endpoint: String, detail: String },

    /// Polling hit too many consecutive transport errors.
    #[error("Conversion service unreachable after {errors} consecutive errors polling task {task_id}: {last_error}")]
    ServiceUnreachable {
        task_id: String,
        errors: u32,
        last_error: String,
    },

    /// The attempt budget ran out without a terminal status.
    #[error("Timed out polling task {task_id} after {attempts} attempts")]
    PollTimeout { task_id: String, attempts: u32 },

    /// The service reported the conversion as failed.
    #[error("Conversion failed for task {task_id}")]
    ConversionFailed { task_id: String, details: Value },

    /// The result body is not JSON.
    #[error("Result for task {task_id} is not valid JSON")]
    ResultUnparseable {
        task_id: String,
        content_type: Option<String>,
        preview: String,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    /// Stable snake_case tag for this error, emitted as `kind` in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::MissingInput { .. } => "missing_input",
            WorkerError::InvalidJob { .. } => "invalid_job",
            WorkerError::DecodeError { .. } => "decode_error",
            WorkerError::SupervisorTimeout { .. } => "supervisor_timeout",
            WorkerError::ServerLost { .. } => "server_lost",
            WorkerError::ProtocolError { .. } => "protocol_error",
            WorkerError::SubmitRejected { .. } => "submit_rejected",
            WorkerError::Transport { .. } => "transport",
            WorkerError::ServiceUnreachable { .. } => "service_unreachable",
            WorkerError::PollTimeout { .. } => "poll_timeout",
            WorkerError::ConversionFailed { .. } => "conversion_failed",
            WorkerError::ResultUnparseable { .. } => "result_unparseable",
            WorkerError::InvalidConfig(_) => "invalid_config",
            WorkerError::Internal(_) => "internal",
        }
    }

    /// Build the structured report returned to the host runtime.
    pub fn report(&self) -> ErrorReport {
        let mut details = Map::new();
        match self {
            WorkerError::ServerLost { task_id }
            | WorkerError::PollTimeout { task_id, .. } => {
                details.insert("task_id".into(), Value::from(task_id.as_str()));
            }
            WorkerError::ServiceUnreachable { task_id, last_error, .. } => {
                details.insert("task_id".into(), Value::from(task_id.as_str()));
                details.insert("last_error".into(), Value::from(last_error.as_str()));
            }
            WorkerError::ProtocolError {
                status_code, body, ..
            } => {
                if let Some(code) = status_code {
                    details.insert("status_code".into(), Value::from(*code));
                }
                if let Some(body) = body {
                    details.insert("body".into(), Value::from(body.as_str()));
                }
            }
            WorkerError::SubmitRejected { status_code, body } => {
                details.insert("status_code".into(), Value::from(*status_code));
                details.insert("body".into(), Value::from(body.as_str()));
                if let Ok(parsed) = serde_json::from_str::<Value>(body) {
                    if let Some(detail) = parsed.get("detail") {
                        details.insert("detail".into(), detail.clone());
                    }
                }
            }
            WorkerError::ConversionFailed { task_id, details: status } => {
                details.insert("task_id".into(), Value::from(task_id.as_str()));
                details.insert("status_details".into(), status.clone());
            }
            WorkerError::ResultUnparseable {
                task_id,
                content_type,
                preview,
            } => {
                details.insert("task_id".into(), Value::from(task_id.as_str()));
                details.insert(
                    "content_type".into(),
                    content_type.as_deref().map(Value::from).unwrap_or(Value::Null),
                );
                details.insert("raw_content_preview".into(), Value::from(preview.as_str()));
            }
            _ => {}
        }

        ErrorReport {
            error: self.to_string(),
            kind: self.kind(),
            details,
        }
    }
}

/// The `{ "error": ..., ...diagnostics }` object returned for a failed job.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    /// Human-readable message.
    pub error: String,
    /// Machine-readable tag, see [`WorkerError::kind`].
    pub kind: &'static str,
    /// Diagnostic fields, flattened into the top-level object.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ErrorReport {
    /// Render the report as a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "error": self.error }))
    }
}
