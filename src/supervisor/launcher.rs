//! Launching the conversion server process and draining its output.

use crate::config::WorkerConfig;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Extension point for how the conversion server is started.
///
/// The returned child should have piped stdout/stderr; they are forwarded to
/// the log by the supervisor. Launch failures (binary missing, permission
/// denied) are reported synchronously through the `io::Error`.
pub trait ServerLauncher: Send + Sync {
    fn launch(&self) -> std::io::Result<Child>;

    /// Human-readable description used in logs and error reports.
    fn describe(&self) -> String;
}

/// Launches a program with fixed arguments, e.g. `docling-serve run`.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: String,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.server_program.clone(), config.server_args.clone())
    }
}

impl ServerLauncher for CommandLauncher {
    fn launch(&self) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Forward every line of the child's stdout and stderr to the log.
///
/// Each stream gets its own task, so a chatty server never blocks the
/// readiness path and a full pipe never stalls the server.
pub(crate) fn forward_output(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, "stdout"));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, "stderr"));
    }
}

/// Returns the number of lines forwarded. Bytes that are not UTF-8 are
/// replaced, never treated as the end of the stream: dropping the reader
/// would close the pipe under the server.
async fn forward_lines<R>(reader: R, stream: &'static str) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut forwarded = 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                info!(target: "docling_worker::server", stream, "{line}");
                forwarded += 1;
            }
            Err(e) => {
                warn!(stream, error = %e, "Stopped reading conversion server output");
                break;
            }
        }
    }
    forwarded
}
