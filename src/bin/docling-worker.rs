//! CLI binary for docling-worker.
//!
//! A thin host over the library crate: maps flags to `WorkerConfig`, feeds
//! job objects to `ConversionDriver::handle`, and prints what comes back.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docling_worker::{
    load_job, ConversionDriver, JobProgressCallback, JobRequest, ProcessSupervisor,
    ProgressCallback, Supervisor, WorkerConfig, WorkerError,
};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner on stderr that follows one job through readiness, submit, polls.
struct SpinnerProgress {
    bar: ProgressBar,
}

impl SpinnerProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Decoding input…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl JobProgressCallback for SpinnerProgress {
    fn on_job_start(&self, _job_id: &str) {
        self.bar.set_prefix("Starting");
        self.bar.set_message("Waiting for conversion server…");
    }

    fn on_server_ready(&self, _job_id: &str) {
        self.bar.set_prefix("Uploading");
        self.bar.set_message("Submitting document…");
    }

    fn on_submitted(&self, _job_id: &str, task_id: &str) {
        self.bar.set_prefix("Converting");
        self.bar.set_message(format!("task {task_id}"));
    }

    fn on_poll(&self, _job_id: &str, attempt: u32, max_attempts: u32, status: &str) {
        let status = if status.is_empty() { "UNKNOWN" } else { status };
        self.bar
            .set_message(format!("{status}  (poll {attempt}/{max_attempts})"));
    }

    fn on_job_complete(&self, _job_id: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} Conversion complete", green("✔"));
    }

    fn on_job_error(&self, _job_id: &str, error: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), red(error));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Handle one job from a file (RunPod-style job object)
  docling-worker handle job.json

  # Inline job, like a serverless local test run
  docling-worker handle --test-input '{"input": {"file_content_base64": "SGVsbG8=", "filename": "a.txt"}}'

  # Pipe newline-delimited jobs, 4 at a time, starting the server up front
  cat jobs.jsonl | docling-worker batch --concurrency 4 --warmup

  # Check that docling-serve starts and answers its health check
  docling-worker check

JOB FORMAT:
  {"id": "job-1",
   "input": {"file_content_base64": "<base64>",
             "filename": "report.pdf",
             "options": {"to_formats": ["md", "json"], "ocr": true}}}

ENVIRONMENT VARIABLES:
  Every flag below can be set through the DOCLING_WORKER_* variable shown
  in its help text. RUST_LOG overrides the log filter.
"#;

/// Serverless job handler for a locally supervised docling-serve.
#[derive(Parser, Debug)]
#[command(
    name = "docling-worker",
    version,
    about = "Run document conversion jobs against a locally supervised docling-serve",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    worker: WorkerArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCLING_WORKER_VERBOSE")]
    verbose: bool,

    /// Suppress all logs except errors.
    #[arg(short, long, global = true, env = "DOCLING_WORKER_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Handle a single job and print its output as JSON.
    Handle {
        /// Job JSON file. Reads stdin when neither this nor --test-input is given.
        job_file: Option<PathBuf>,

        /// Inline job JSON.
        #[arg(long, conflicts_with = "job_file")]
        test_input: Option<String>,

        /// Disable the progress spinner.
        #[arg(long, env = "DOCLING_WORKER_NO_PROGRESS")]
        no_progress: bool,
    },

    /// Handle newline-delimited jobs from stdin, printing one result line per job.
    Batch {
        /// Jobs handled concurrently.
        #[arg(short, long, env = "DOCLING_WORKER_CONCURRENCY", default_value_t = 4)]
        concurrency: usize,

        /// Start the conversion server before reading the first job.
        #[arg(long, env = "DOCLING_WORKER_WARMUP")]
        warmup: bool,
    },

    /// Start the conversion server, wait for it to become ready, then exit.
    Check,
}

#[derive(Args, Debug)]
struct WorkerArgs {
    /// Base URL of the conversion service.
    #[arg(long, env = "DOCLING_WORKER_BASE_URL", default_value = "http://localhost:5001")]
    base_url: String,

    /// Program that runs the conversion service.
    #[arg(long, env = "DOCLING_WORKER_SERVER_PROGRAM", default_value = "docling-serve")]
    server_program: String,

    /// Arguments for the server program (repeatable).
    #[arg(
        long = "server-arg",
        env = "DOCLING_WORKER_SERVER_ARGS",
        value_delimiter = ' ',
        default_value = "run",
        allow_hyphen_values = true
    )]
    server_args: Vec<String>,

    /// Health-check path probed until the server is ready.
    #[arg(long, env = "DOCLING_WORKER_HEALTH_PATH", default_value = "/health")]
    health_path: String,

    /// Seconds a job waits for the server to become ready.
    #[arg(long, env = "DOCLING_WORKER_READINESS_TIMEOUT", default_value_t = 60)]
    readiness_timeout: u64,

    /// Seconds one server start attempt may take to pass its health check.
    #[arg(long, env = "DOCLING_WORKER_STARTUP_TIMEOUT", default_value_t = 120)]
    startup_timeout: u64,

    /// Initial delay between health probes in milliseconds.
    #[arg(long, env = "DOCLING_WORKER_PROBE_BACKOFF_MS", default_value_t = 250)]
    probe_backoff_ms: u64,

    /// Maximum delay between health probes in milliseconds.
    #[arg(long, env = "DOCLING_WORKER_PROBE_MAX_BACKOFF_MS", default_value_t = 5000)]
    probe_max_backoff_ms: u64,

    /// Delay between status polls in milliseconds.
    #[arg(long, env = "DOCLING_WORKER_POLL_INTERVAL_MS", default_value_t = 5000)]
    poll_interval_ms: u64,

    /// Maximum status polls per task.
    #[arg(long, env = "DOCLING_WORKER_MAX_POLLS", default_value_t = 60,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_polls: u32,

    /// Consecutive poll transport errors tolerated.
    #[arg(long, env = "DOCLING_WORKER_MAX_TRANSPORT_ERRORS", default_value_t = 10)]
    max_transport_errors: u32,

    /// Submit request timeout in seconds.
    #[arg(long, env = "DOCLING_WORKER_SUBMIT_TIMEOUT", default_value_t = 30)]
    submit_timeout: u64,

    /// Status request timeout in seconds.
    #[arg(long, env = "DOCLING_WORKER_STATUS_TIMEOUT", default_value_t = 10)]
    status_timeout: u64,

    /// Result request timeout in seconds.
    #[arg(long, env = "DOCLING_WORKER_RESULT_TIMEOUT", default_value_t = 30)]
    result_timeout: u64,

    /// Multipart field name carrying the uploaded file.
    #[arg(long, env = "DOCLING_WORKER_FILE_FIELD", default_value = "files")]
    file_field: String,

    /// Filename used when a job does not provide one.
    #[arg(long, env = "DOCLING_WORKER_DEFAULT_FILENAME", default_value = "uploaded_file")]
    default_filename: String,

    /// Characters of a non-JSON result echoed in the error report.
    #[arg(long, env = "DOCLING_WORKER_PREVIEW_CHARS", default_value_t = 200)]
    preview_chars: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides all the feedback that matters in single-job mode,
    // so library logs drop to errors unless --verbose asks for them.
    let spinner = matches!(cli.command, Command::Handle { no_progress: false, .. }) && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || spinner {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli.worker)?;
    tracing::debug!(
        config = %serde_json::to_string(&config).unwrap_or_default(),
        "Resolved worker configuration"
    );

    match cli.command {
        Command::Handle {
            job_file,
            test_input,
            ..
        } => {
            let job = read_job(job_file, test_input)?;
            let mut driver =
                ConversionDriver::from_config(config).context("Failed to create worker")?;
            if spinner {
                driver = driver.with_progress(SpinnerProgress::new() as ProgressCallback);
            }
            let output = driver.handle(job).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&output).context("Failed to serialise output")?
            );
        }
        Command::Batch {
            concurrency,
            warmup,
        } => run_batch(config, concurrency.max(1), warmup).await?,
        Command::Check => {
            let timeout = config.readiness_timeout();
            let supervisor =
                ProcessSupervisor::new(&config).context("Failed to create supervisor")?;
            supervisor
                .ensure_ready(timeout)
                .await
                .context("Conversion server did not become ready")?;
            eprintln!(
                "{} Conversion server ready at {}",
                green("✔"),
                config.base()
            );
        }
    }

    Ok(())
}

/// Map CLI args to `WorkerConfig`.
fn build_config(args: &WorkerArgs) -> Result<WorkerConfig> {
    WorkerConfig::builder()
        .base_url(&args.base_url)
        .server_program(&args.server_program)
        .server_args(args.server_args.iter().filter(|a| !a.is_empty()))
        .health_path(&args.health_path)
        .readiness_timeout_secs(args.readiness_timeout)
        .startup_timeout_secs(args.startup_timeout)
        .probe_backoff_ms(args.probe_backoff_ms)
        .probe_max_backoff_ms(args.probe_max_backoff_ms)
        .poll_interval_ms(args.poll_interval_ms)
        .max_poll_attempts(args.max_polls)
        .max_transport_errors(args.max_transport_errors)
        .submit_timeout_secs(args.submit_timeout)
        .status_timeout_secs(args.status_timeout)
        .result_timeout_secs(args.result_timeout)
        .file_field(&args.file_field)
        .default_filename(&args.default_filename)
        .preview_chars(args.preview_chars)
        .build()
        .context("Invalid configuration")
}

/// Read the job for `handle` from a file, an inline string, or stdin.
fn read_job(job_file: Option<PathBuf>, test_input: Option<String>) -> Result<Value> {
    if let Some(path) = job_file {
        return Ok(load_job(&path)?);
    }

    let raw = match test_input {
        Some(raw) => raw,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read job from stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("Job input is not valid JSON")
}

/// Handle newline-delimited jobs from stdin with bounded concurrency.
async fn run_batch(config: WorkerConfig, concurrency: usize, warmup: bool) -> Result<()> {
    let driver = Arc::new(ConversionDriver::from_config(config).context("Failed to create worker")?);

    if warmup {
        let timeout = driver.config().readiness_timeout();
        if let Err(e) = driver.supervisor().ensure_ready(timeout).await {
            // Jobs will retry readiness themselves; a failed warmup is not fatal.
            tracing::warn!(error = %e, "Warmup failed");
        }
    }

    let lines = stream::unfold(BufReader::new(tokio::io::stdin()).lines(), |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((line, lines)),
            Ok(None) => None,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read job line from stdin");
                None
            }
        }
    });

    lines
        .filter(|line| futures::future::ready(!line.trim().is_empty()))
        .map(|line| {
            let driver = Arc::clone(&driver);
            async move { handle_line(&driver, &line).await }
        })
        .buffer_unordered(concurrency)
        .for_each(|out| async move {
            println!("{out}");
        })
        .await;

    Ok(())
}

/// Handle one JSONL job, returning the `{"id", "output"}` line to print.
async fn handle_line(driver: &ConversionDriver, line: &str) -> Value {
    let job: Value = match serde_json::from_str(line) {
        Ok(job) => job,
        Err(e) => {
            let err = WorkerError::InvalidJob {
                detail: format!("line is not valid JSON: {e}"),
            };
            return json!({ "id": Value::Null, "output": err.report().to_value() });
        }
    };
    let id = JobRequest::from_value(job.clone())
        .ok()
        .and_then(|r| r.id)
        .unwrap_or(Value::Null);
    let output = driver.handle(job).await;
    json!({ "id": id, "output": output })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn read_job_from_file_keeps_malformed_shape() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"id": "bad", "input": {{"file_content_base64": "SGVsbG8=", "options": "ocr"}}}}"#
        )
        .unwrap();
        let job = read_job(Some(file.path().to_path_buf()), None).unwrap();
        assert_eq!(job["input"]["options"], "ocr");
    }

    #[test]
    fn read_job_from_file_rejects_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(read_job(Some(file.path().to_path_buf()), None).is_err());
    }

    #[tokio::test]
    async fn malformed_job_file_becomes_an_error_report() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"input": {{"file_content_base64": "SGVsbG8=", "options": "ocr"}}}}"#
        )
        .unwrap();
        let job = read_job(Some(file.path().to_path_buf()), None).unwrap();

        let driver = ConversionDriver::from_config(WorkerConfig::default()).unwrap();
        let output = driver.handle(job).await;
        assert_eq!(output["kind"], "invalid_job");
        assert_eq!(driver.supervisor().state(), docling_worker::ServerState::NotStarted);
    }
}
