//! HTTP client for the conversion service's async API.
//!
//! Three endpoints, all relative to the configured base URL:
//!
//! | call | endpoint |
//! |------|----------|
//! | submit | `POST /v1alpha/convert/file/async` (multipart) → `{task_id}` |
//! | status | `GET /v1alpha/status/poll/{task_id}` → `{task_status, ...}` |
//! | result | `GET /v1alpha/result/{task_id}` → JSON document |
//!
//! One `reqwest::Client` is shared by every job so connections to the local
//! server are pooled; each call carries its own timeout.

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::job::ConversionJob;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

const CONVERT_PATH: &str = "/v1alpha/convert/file/async";
const STATUS_PATH: &str = "/v1alpha/status/poll/";
const RESULT_PATH: &str = "/v1alpha/result/";

/// Handle of one asynchronous conversion on the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub task_id: String,
}

/// A parsed status response.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Status value, trimmed and upper-cased. Empty if the field is absent.
    pub status: String,
    /// The full response body, kept for error reports.
    pub payload: Value,
}

impl StatusReport {
    /// Read `task_status`, falling back to `status`.
    pub fn from_payload(payload: Value) -> Self {
        let status = ["task_status", "status"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_str))
            .map(|s| s.trim().to_ascii_uppercase())
            .unwrap_or_default();
        Self { status, payload }
    }
}

/// Client for the conversion service.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    client: reqwest::Client,
    base: String,
    file_field: String,
    submit_timeout: Duration,
    status_timeout: Duration,
    result_timeout: Duration,
    preview_chars: usize,
}

impl ServiceClient {
    pub fn new(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| WorkerError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: config.base().to_string(),
            file_field: config.file_field.clone(),
            submit_timeout: config.submit_timeout(),
            status_timeout: config.status_timeout(),
            result_timeout: config.result_timeout(),
            preview_chars: config.preview_chars,
        })
    }

    pub fn convert_url(&self) -> String {
        format!("{}{CONVERT_PATH}", self.base)
    }

    pub fn status_url(&self, task: &TaskHandle) -> String {
        format!("{}{STATUS_PATH}{}", self.base, task.task_id)
    }

    pub fn result_url(&self, task: &TaskHandle) -> String {
        format!("{}{RESULT_PATH}{}", self.base, task.task_id)
    }

    /// Upload the file and its flattened options.
    ///
    /// A non-2xx answer is returned verbatim as [`WorkerError::SubmitRejected`];
    /// a 2xx answer without a `task_id` is a protocol error.
    pub async fn submit(&self, job: &ConversionJob) -> Result<TaskHandle, WorkerError> {
        let url = self.convert_url();
        let fields = job.options.form_fields();
        info!(
            filename = %job.filename,
            bytes = job.file_bytes.len(),
            options = ?fields,
            "Submitting file for conversion"
        );

        let part = Part::bytes(job.file_bytes.clone()).file_name(job.filename.clone());
        let form = fields
            .into_iter()
            .fold(Form::new().part(self.file_field.clone(), part), |form, (k, v)| {
                form.text(k, v)
            });

        let response = self
            .client
            .post(&url)
            .timeout(self.submit_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport(&url, e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| transport(&url, e))?;

        if !status.is_success() {
            return Err(WorkerError::SubmitRejected {
                status_code: status.as_u16(),
                body,
            });
        }

        let value: Value = serde_json::from_str(&body).map_err(|_| WorkerError::ProtocolError {
            message: "submit response is not valid JSON".to_string(),
            status_code: Some(status.as_u16()),
            body: Some(body.clone()),
        })?;

        let task_id = match value.get("task_id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(WorkerError::ProtocolError {
                    message: "task_id not found in submit response".to_string(),
                    status_code: Some(status.as_u16()),
                    body: Some(body),
                })
            }
        };

        info!(%task_id, "Conversion submitted");
        Ok(TaskHandle { task_id })
    }

    /// Fetch the task status once.
    ///
    /// Network failures and non-2xx answers come back as
    /// [`WorkerError::Transport`] so the poll loop can retry them; a body
    /// that is not JSON is a protocol error.
    pub async fn poll_status(&self, task: &TaskHandle) -> Result<StatusReport, WorkerError> {
        let url = self.status_url(task);
        let response = self
            .client
            .get(&url)
            .timeout(self.status_timeout)
            .send()
            .await
            .map_err(|e| transport(&url, e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| transport(&url, e))?;
        if !status.is_success() {
            return Err(WorkerError::Transport {
                endpoint: url,
                detail: format!("HTTP {status}"),
            });
        }

        let payload: Value =
            serde_json::from_str(&body).map_err(|_| WorkerError::ProtocolError {
                message: format!("status response for task {} is not valid JSON", task.task_id),
                status_code: Some(status.as_u16()),
                body: Some(body),
            })?;
        Ok(StatusReport::from_payload(payload))
    }

    /// Fetch the finished result as JSON.
    pub async fn fetch_result(&self, task: &TaskHandle, location: &str) -> Result<Value, WorkerError> {
        let response = self
            .client
            .get(location)
            .timeout(self.result_timeout)
            .send()
            .await
            .map_err(|e| transport(location, e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(|e| transport(location, e))?;

        if !status.is_success() {
            return Err(WorkerError::ProtocolError {
                message: format!(
                    "result endpoint returned HTTP {status} for task {}",
                    task.task_id
                ),
                status_code: Some(status.as_u16()),
                body: Some(preview(&bytes, self.preview_chars)),
            });
        }

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => {
                debug!(task_id = %task.task_id, bytes = bytes.len(), "Fetched result");
                Ok(value)
            }
            Err(_) => Err(WorkerError::ResultUnparseable {
                task_id: task.task_id.clone(),
                content_type,
                preview: preview(&bytes, self.preview_chars),
            }),
        }
    }
}

fn transport(endpoint: &str, e: reqwest::Error) -> WorkerError {
    let detail = if e.is_timeout() {
        format!("timed out: {e}")
    } else {
        e.to_string()
    };
    WorkerError::Transport {
        endpoint: endpoint.to_string(),
        detail,
    }
}

/// First `max_chars` characters of a body, decoded lossily.
pub fn preview(bytes: &[u8], max_chars: usize) -> String {
    String::from_utf8_lossy(bytes).chars().take(max_chars).collect()
}
