//! # docling-worker
//!
//! A serverless job handler in front of a locally spawned
//! [docling-serve](https://github.com/docling-project/docling-serve)
//! conversion server.
//!
//! Each job carries a base64-encoded document and conversion options. The
//! worker makes sure the conversion server is running (starting it on first
//! use and again after a crash), submits the document to the server's async
//! API, polls until the task finishes, and returns the result document.
//!
//! ## Job Overview
//!
//! ```text
//! job JSON
//!  │
//!  ├─ 1. Input      validate, base64-decode
//!  ├─ 2. Readiness  supervisor starts docling-serve once, waits for health
//!  ├─ 3. Submit     multipart POST /v1alpha/convert/file/async → task_id
//!  ├─ 4. Poll       GET /v1alpha/status/poll/{task_id} until terminal
//!  └─ 5. Result     GET /v1alpha/result/{task_id} → returned as-is
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docling_worker::{ConversionDriver, WorkerConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = ConversionDriver::from_config(WorkerConfig::default())?;
//!     let output = driver
//!         .handle(json!({
//!             "id": "job-1",
//!             "input": {
//!                 "file_content_base64": "SGVsbG8=",
//!                 "filename": "hello.txt",
//!                 "options": { "to_formats": ["md"] }
//!             }
//!         }))
//!         .await;
//!     println!("{output}");
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docling-worker` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod supervisor;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{WorkerConfig, WorkerConfigBuilder};
pub use convert::ConversionDriver;
pub use error::{ErrorReport, WorkerError};
pub use job::{load_job, ConversionJob, ConversionOptions, JobInput, JobRequest};
pub use pipeline::client::{ServiceClient, StatusReport, TaskHandle};
pub use pipeline::poll::PollOutcome;
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use supervisor::{
    CommandLauncher, HealthProbe, HttpHealthProbe, ProcessSupervisor, ServerLauncher,
    ServerState, Supervisor,
};
