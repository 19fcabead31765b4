//! Configuration for the worker: where the conversion service lives, how to
//! launch it, and every timing knob of the supervisor and the polling loop.
//!
//! All behaviour is controlled through [`WorkerConfig`], built via its
//! [`WorkerConfigBuilder`]. Defaults reproduce the values the worker has
//! always shipped with (docling-serve on port 5001, 5 s × 60 polls); every
//! one of them can be overridden from the CLI or environment.

use crate::error::WorkerError;
use serde::Serialize;
use std::time::Duration;

/// Configuration for the supervisor and the conversion driver.
///
/// # Example
/// ```rust
/// use docling_worker::WorkerConfig;
///
/// let config = WorkerConfig::builder()
///     .base_url("http://127.0.0.1:5001")
///     .poll_interval_ms(2000)
///     .max_poll_attempts(150)
///     .build()
///     .unwrap();
/// assert_eq!(config.poll_interval().as_secs(), 2);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct WorkerConfig {
    /// Base URL of the conversion service. Default: `http://localhost:5001`.
    pub base_url: String,

    /// Program launched to run the conversion service. Default: `docling-serve`.
    pub server_program: String,

    /// Arguments passed to `server_program`. Default: `["run"]`.
    pub server_args: Vec<String>,

    /// Path probed to decide the service is up. Default: `/health`.
    pub health_path: String,

    /// How long a job waits for the server to become ready. Default: 60.
    pub readiness_timeout_secs: u64,

    /// How long one spawn attempt may probe before it is declared dead. Default: 120.
    ///
    /// docling-serve loads its layout and OCR models on first boot, which can
    /// take well over a minute on a cold container.
    pub startup_timeout_secs: u64,

    /// First delay between health probes, doubled after each miss. Default: 250.
    pub probe_backoff_ms: u64,

    /// Upper bound on the probe delay. Default: 5000.
    pub probe_max_backoff_ms: u64,

    /// Delay between status polls. Default: 5000.
    pub poll_interval_ms: u64,

    /// Maximum number of status polls per task. Default: 60.
    pub max_poll_attempts: u32,

    /// Consecutive transport errors tolerated while polling. Default: 10.
    pub max_transport_errors: u32,

    /// Timeout of the multipart submit request. Default: 30.
    pub submit_timeout_secs: u64,

    /// Timeout of one status poll. Default: 10.
    pub status_timeout_secs: u64,

    /// Timeout of the result fetch. Default: 30.
    pub result_timeout_secs: u64,

    /// Multipart field carrying the uploaded file. Default: `files`.
    ///
    /// `files` is the field docling-serve's v1alpha API reads. Older worker
    /// deployments posted the file as `upload_file`; set that here when
    /// talking to a server that expects it.
    pub file_field: String,

    /// Filename used when the job does not name one. Default: `uploaded_file`.
    pub default_filename: String,

    /// Characters of a non-JSON result body echoed back in the error. Default: 200.
    pub preview_chars: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5001".to_string(),
            server_program: "docling-serve".to_string(),
            server_args: vec!["run".to_string()],
            health_path: "/health".to_string(),
            readiness_timeout_secs: 60,
            startup_timeout_secs: 120,
            probe_backoff_ms: 250,
            probe_max_backoff_ms: 5000,
            poll_interval_ms: 5000,
            max_poll_attempts: 60,
            max_transport_errors: 10,
            submit_timeout_secs: 30,
            status_timeout_secs: 10,
            result_timeout_secs: 30,
            file_field: "files".to_string(),
            default_filename: "uploaded_file".to_string(),
            preview_chars: 200,
        }
    }
}

impl WorkerConfig {
    /// Create a new builder for `WorkerConfig`.
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder {
            config: Self::default(),
        }
    }

    /// Base URL without a trailing slash.
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.result_timeout_secs)
    }

    /// Full URL of the health probe.
    pub fn health_url(&self) -> String {
        let path = self.health_path.trim_start_matches('/');
        format!("{}/{}", self.base(), path)
    }
}

/// Builder for [`WorkerConfig`].
#[derive(Debug)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn server_program(mut self, program: impl Into<String>) -> Self {
        self.config.server_program = program.into();
        self
    }

    pub fn server_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.server_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn health_path(mut self, path: impl Into<String>) -> Self {
        self.config.health_path = path.into();
        self
    }

    pub fn readiness_timeout_secs(mut self, secs: u64) -> Self {
        self.config.readiness_timeout_secs = secs;
        self
    }

    pub fn startup_timeout_secs(mut self, secs: u64) -> Self {
        self.config.startup_timeout_secs = secs.max(1);
        self
    }

    pub fn probe_backoff_ms(mut self, ms: u64) -> Self {
        self.config.probe_backoff_ms = ms.max(1);
        self
    }

    pub fn probe_max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.probe_max_backoff_ms = ms.max(1);
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn max_poll_attempts(mut self, n: u32) -> Self {
        self.config.max_poll_attempts = n;
        self
    }

    pub fn max_transport_errors(mut self, n: u32) -> Self {
        self.config.max_transport_errors = n.max(1);
        self
    }

    pub fn submit_timeout_secs(mut self, secs: u64) -> Self {
        self.config.submit_timeout_secs = secs.max(1);
        self
    }

    pub fn status_timeout_secs(mut self, secs: u64) -> Self {
        self.config.status_timeout_secs = secs.max(1);
        self
    }

    pub fn result_timeout_secs(mut self, secs: u64) -> Self {
        self.config.result_timeout_secs = secs.max(1);
        self
    }

    pub fn file_field(mut self, field: impl Into<String>) -> Self {
        self.config.file_field = field.into();
        self
    }

    pub fn default_filename(mut self, name: impl Into<String>) -> Self {
        self.config.default_filename = name.into();
        self
    }

    pub fn preview_chars(mut self, n: usize) -> Self {
        self.config.preview_chars = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<WorkerConfig, WorkerError> {
        let c = &self.config;
        if reqwest::Url::parse(&c.base_url).is_err() {
            return Err(WorkerError::InvalidConfig(format!(
                "base URL is not a valid URL: '{}'",
                c.base_url
            )));
        }
        if c.max_poll_attempts == 0 {
            return Err(WorkerError::InvalidConfig(
                "max poll attempts must be ≥ 1".into(),
            ));
        }
        if c.server_program.trim().is_empty() {
            return Err(WorkerError::InvalidConfig(
                "server program must not be empty".into(),
            ));
        }
        if c.file_field.trim().is_empty() {
            return Err(WorkerError::InvalidConfig(
                "file field must not be empty".into(),
            ));
        }
        if c.probe_max_backoff_ms < c.probe_backoff_ms {
            return Err(WorkerError::InvalidConfig(format!(
                "probe max backoff ({}ms) is below the initial backoff ({}ms)",
                c.probe_max_backoff_ms, c.probe_backoff_ms
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_values() {
        let c = WorkerConfig::default();
        assert_eq!(c.base_url, "http://localhost:5001");
        assert_eq!(c.poll_interval(), Duration::from_secs(5));
        assert_eq!(c.max_poll_attempts, 60);
        assert_eq!(c.readiness_timeout(), Duration::from_secs(60));
        assert_eq!(c.server_args, vec!["run".to_string()]);
        assert_eq!(c.file_field, "files");
    }

    #[test]
    fn file_field_can_target_older_servers() {
        let c = WorkerConfig::builder().file_field("upload_file").build().unwrap();
        assert_eq!(c.file_field, "upload_file");
    }

    #[test]
    fn serialises_for_logging() {
        let v = serde_json::to_value(WorkerConfig::default()).unwrap();
        assert_eq!(v["base_url"], "http://localhost:5001");
        assert_eq!(v["max_poll_attempts"], 60);
    }

    #[test]
    fn health_url_joins_without_double_slash() {
        let c = WorkerConfig::builder()
            .base_url("http://127.0.0.1:9000/")
            .health_path("/health")
            .build()
            .unwrap();
        assert_eq!(c.health_url(), "http://127.0.0.1:9000/health");

        let c = WorkerConfig::builder().health_path("ready").build().unwrap();
        assert_eq!(c.health_url(), "http://localhost:5001/ready");
    }

    #[test]
    fn build_rejects_zero_attempts() {
        let err = WorkerConfig::builder().max_poll_attempts(0).build().unwrap_err();
        assert!(matches!(err, WorkerError::InvalidConfig(_)));
    }

    #[test]
    fn build_rejects_bad_url() {
        let err = WorkerConfig::builder().base_url("not a url").build().unwrap_err();
        assert!(err.to_string().contains("not a url"));
    }

    #[test]
    fn build_rejects_inverted_backoff() {
        let err = WorkerConfig::builder()
            .probe_backoff_ms(2000)
            .probe_max_backoff_ms(500)
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidConfig(_)));
    }

    #[test]
    fn setters_clamp_to_minimums() {
        let c = WorkerConfig::builder()
            .max_transport_errors(0)
            .submit_timeout_secs(0)
            .build()
            .unwrap();
        assert_eq!(c.max_transport_errors, 1);
        assert_eq!(c.submit_timeout_secs, 1);
    }
}
