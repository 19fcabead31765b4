//! The per-job conversion driver and its never-failing handler boundary.
//!
//! A job moves through a linear sequence of states; any of them can end the
//! job early with a [`WorkerError`]:
//!
//! ```text
//! Received → Validated → Decoded → ServerReady → Submitted
//!          → Polling { Pending ↺ | Succeeded | Failed } → Fetched → Done
//! ```
//!
//! [`ConversionDriver::convert`] returns `Result` for library callers.
//! [`ConversionDriver::handle`] is what the host runtime calls: it takes the
//! raw job JSON and always returns a JSON value, either the service's result
//! document or an [`crate::error::ErrorReport`].

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::job::JobRequest;
use crate::pipeline::client::ServiceClient;
use crate::pipeline::input;
use crate::pipeline::poll::{poll_until_terminal, PollBudget};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::supervisor::{ProcessSupervisor, Supervisor};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Executes conversion jobs against a supervised conversion server.
///
/// Cheap to share: wrap it in an `Arc` and call [`handle`](Self::handle)
/// from as many concurrent tasks as the host runs.
pub struct ConversionDriver {
    config: WorkerConfig,
    client: ServiceClient,
    supervisor: Arc<dyn Supervisor>,
    progress: ProgressCallback,
}

impl ConversionDriver {
    /// Driver using an explicit supervisor (a fake one in tests).
    pub fn new(config: WorkerConfig, supervisor: Arc<dyn Supervisor>) -> Result<Self, WorkerError> {
        let client = ServiceClient::new(&config)?;
        Ok(Self {
            config,
            client,
            supervisor,
            progress: Arc::new(NoopProgressCallback),
        })
    }

    /// Driver owning a [`ProcessSupervisor`] built from `config`.
    pub fn from_config(config: WorkerConfig) -> Result<Self, WorkerError> {
        let supervisor = Arc::new(ProcessSupervisor::new(&config)?);
        Self::new(config, supervisor)
    }

    /// Attach a progress callback.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<dyn Supervisor> {
        &self.supervisor
    }

    fn budget(&self) -> PollBudget {
        PollBudget {
            interval: self.config.poll_interval(),
            max_attempts: self.config.max_poll_attempts,
            max_transport_errors: self.config.max_transport_errors,
        }
    }

    /// Run one job to completion.
    ///
    /// # Errors
    /// Every failure is a [`WorkerError`]; see its variants for the mapping
    /// from pipeline step to error kind.
    pub async fn convert(&self, request: &JobRequest) -> Result<Value, WorkerError> {
        let started = Instant::now();

        // ── Step 1: Validate and decode ─────────────────────────────────────
        let job = input::prepare_job(request, &self.config.default_filename)?;
        info!(job_id = %job.id, filename = %job.filename, "Starting conversion job");
        self.progress.on_job_start(&job.id);

        // ── Step 2: Server readiness ────────────────────────────────────────
        self.supervisor
            .ensure_ready(self.config.readiness_timeout())
            .await?;
        self.progress.on_server_ready(&job.id);

        // ── Step 3: Submit ──────────────────────────────────────────────────
        let task = self.client.submit(&job).await?;
        self.progress.on_submitted(&job.id, &task.task_id);

        // ── Step 4: Poll ────────────────────────────────────────────────────
        let location = poll_until_terminal(
            &self.client,
            self.supervisor.as_ref(),
            &task,
            self.budget(),
            self.progress.as_ref(),
            &job.id,
        )
        .await?;

        // ── Step 5: Fetch result ────────────────────────────────────────────
        let result = self.client.fetch_result(&task, &location).await?;
        self.progress.on_job_complete(&job.id);

        info!(
            job_id = %job.id,
            task_id = %task.task_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Conversion job complete"
        );
        Ok(result)
    }

    /// Handle a raw job object. Never fails: errors become a report object.
    pub async fn handle(&self, job: Value) -> Value {
        let request = match JobRequest::from_value(job) {
            Ok(request) => request,
            Err(e) => return self.report_failure("unknown", e),
        };
        let job_id = request.display_id();

        match self.convert(&request).await {
            Ok(result) => result,
            Err(e) => self.report_failure(&job_id, e),
        }
    }

    fn report_failure(&self, job_id: &str, error: WorkerError) -> Value {
        warn!(job_id, kind = error.kind(), error = %error, "Conversion job failed");
        self.progress.on_job_error(job_id, &error.to_string());
        error.report().to_value()
    }
}
