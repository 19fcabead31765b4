//! Lifecycle of the conversion server process.
//!
//! One [`ProcessSupervisor`] is shared by every job the worker handles. It
//! starts the server lazily on the first [`Supervisor::ensure_ready`] call,
//! detects when it dies, and starts it again for the next job that asks.
//!
//! ## State machine
//!
//! ```text
//!              ensure_ready                 probe ok
//! NotStarted ──────────────▶ Starting ─────────────────▶ Ready
//!     ▲                         │                          │
//!     │ next ensure_ready       │ launch error / exit /    │ process exit
//!     │ (exactly one respawn)   │ probe window elapsed     │
//!     └──────────────────── Crashed ◀──────────────────────┘
//! ```
//!
//! Transitions happen under one mutex; the current state is broadcast on a
//! `watch` channel which is the readiness signal. Waiters block on the
//! channel, never on the mutex, so any number of jobs can wait for the same
//! start attempt without contending. The spawn itself runs on a background
//! task that outlives the job which triggered it.

mod launcher;
mod probe;

pub use launcher::{CommandLauncher, ServerLauncher};
pub use probe::{HealthProbe, HttpHealthProbe};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use async_trait::async_trait;
use probe::Backoff;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the conversion server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerState {
    NotStarted,
    Starting,
    Ready,
    Crashed,
}

impl ServerState {
    /// `Ready` or `Crashed`: the current start attempt has an outcome.
    pub fn is_settled(self) -> bool {
        matches!(self, ServerState::Ready | ServerState::Crashed)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::NotStarted => "not started",
            ServerState::Starting => "starting",
            ServerState::Ready => "ready",
            ServerState::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// What the conversion driver needs from whoever owns the server.
///
/// This abstraction lets the driver be tested against a fake that is always
/// ready, never ready, or crashes on cue, without spawning anything.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Block until the server is ready, or fail with
    /// [`WorkerError::SupervisorTimeout`] once `deadline` elapses or the
    /// current start attempt crashes.
    async fn ensure_ready(&self, deadline: Duration) -> Result<(), WorkerError>;

    /// Current lifecycle state.
    fn state(&self) -> ServerState;
}

/// Supervises a real child process started through a [`ServerLauncher`].
#[derive(Clone)]
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
}

struct Shared {
    launcher: Arc<dyn ServerLauncher>,
    probe: Arc<dyn HealthProbe>,
    startup_timeout: Duration,
    probe_backoff: Duration,
    probe_max_backoff: Duration,
    lifecycle: Mutex<Lifecycle>,
    signal: watch::Sender<ServerState>,
    spawns: AtomicU64,
}

struct Lifecycle {
    state: ServerState,
    /// Incremented per start attempt; background tasks only touch state
    /// while their generation is current.
    generation: u64,
    last_failure: Option<String>,
}

impl ProcessSupervisor {
    /// Supervisor launching `server_program server_args` and probing
    /// `base_url + health_path`.
    pub fn new(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let launcher = Arc::new(CommandLauncher::from_config(config));
        let probe = Arc::new(HttpHealthProbe::new(
            config.health_url(),
            config.status_timeout(),
        )?);
        Ok(Self::with_parts(config, launcher, probe))
    }

    /// Supervisor with a custom launcher and probe; timings come from `config`.
    pub fn with_parts(
        config: &WorkerConfig,
        launcher: Arc<dyn ServerLauncher>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let (signal, _) = watch::channel(ServerState::NotStarted);
        Self {
            shared: Arc::new(Shared {
                launcher,
                probe,
                startup_timeout: config.startup_timeout(),
                probe_backoff: Duration::from_millis(config.probe_backoff_ms),
                probe_max_backoff: Duration::from_millis(config.probe_max_backoff_ms),
                lifecycle: Mutex::new(Lifecycle {
                    state: ServerState::NotStarted,
                    generation: 0,
                    last_failure: None,
                }),
                signal,
                spawns: AtomicU64::new(0),
            }),
        }
    }

    /// Number of spawn attempts made so far.
    pub fn spawn_count(&self) -> u64 {
        self.shared.spawns.load(Ordering::SeqCst)
    }

    /// Why the most recent attempt crashed, if it did.
    pub fn last_failure(&self) -> Option<String> {
        self.shared.lock().last_failure.clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.shared.signal.subscribe()
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    async fn ensure_ready(&self, deadline: Duration) -> Result<(), WorkerError> {
        let mut signal = self.shared.begin();
        let secs = deadline.as_secs();

        let outcome = tokio::time::timeout(deadline, signal.wait_for(|s| s.is_settled()))
            .await
            .map(|waited| waited.map(|state| *state));

        match outcome {
            Ok(Ok(ServerState::Ready)) => Ok(()),
            Ok(Ok(_)) => Err(WorkerError::SupervisorTimeout {
                secs,
                detail: self
                    .last_failure()
                    .unwrap_or_else(|| "server crashed during startup".to_string()),
            }),
            Ok(Err(_)) => Err(WorkerError::Internal(
                "readiness signal closed".to_string(),
            )),
            Err(_) => Err(WorkerError::SupervisorTimeout {
                secs,
                detail: format!("server did not become ready within {secs}s"),
            }),
        }
    }

    fn state(&self) -> ServerState {
        self.shared.lock().state
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|poisoned| {
            error!("supervisor lock poisoned; continuing with inner state");
            poisoned.into_inner()
        })
    }

    /// Start the server if nobody has, restart it if it crashed, and hand
    /// back a receiver for the readiness signal.
    fn begin(self: &Arc<Self>) -> watch::Receiver<ServerState> {
        let mut life = self.lock();
        match life.state {
            ServerState::NotStarted => self.start_locked(&mut life),
            ServerState::Crashed => {
                info!(
                    reason = life.last_failure.as_deref().unwrap_or("unknown"),
                    "Conversion server is down; restarting"
                );
                life.state = ServerState::NotStarted;
                self.start_locked(&mut life);
            }
            ServerState::Starting | ServerState::Ready => {}
        }
        self.signal.subscribe()
    }

    fn start_locked(self: &Arc<Self>, life: &mut Lifecycle) {
        life.generation += 1;
        life.state = ServerState::Starting;
        self.signal.send_replace(ServerState::Starting);
        self.spawns.fetch_add(1, Ordering::SeqCst);

        let generation = life.generation;
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.run(generation).await });
    }

    fn transition(&self, generation: u64, state: ServerState, failure: Option<String>) {
        let mut life = self.lock();
        if life.generation != generation {
            debug!(generation, current = life.generation, %state, "ignoring stale transition");
            return;
        }
        life.state = state;
        if failure.is_some() {
            life.last_failure = failure;
        }
        self.signal.send_replace(state);
    }

    /// Background task owning one server process from launch to exit.
    async fn run(self: Arc<Self>, generation: u64) {
        let command = self.launcher.describe();
        info!(%command, generation, "Starting conversion server");

        let mut child = match self.launcher.launch() {
            Ok(child) => child,
            Err(e) => {
                error!(%command, error = %e, "Failed to launch conversion server");
                self.transition(
                    generation,
                    ServerState::Crashed,
                    Some(format!("failed to launch '{command}': {e}")),
                );
                return;
            }
        };
        launcher::forward_output(&mut child);

        let started = Instant::now();
        if let Err(reason) = self.await_healthy(&mut child, started).await {
            warn!(%reason, "Conversion server failed to start");
            self.transition(generation, ServerState::Crashed, Some(reason));
            return;
        }
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Conversion server ready"
        );
        self.transition(generation, ServerState::Ready, None);

        let reason = match child.wait().await {
            Ok(status) => format!("server exited with {status}"),
            Err(e) => format!("failed to wait on server process: {e}"),
        };
        warn!(%reason, "Conversion server went down");
        self.transition(generation, ServerState::Crashed, Some(reason));
    }

    /// Probe until healthy. Fails if the child exits first or the probe
    /// window elapses (the child is killed in that case).
    async fn await_healthy(&self, child: &mut Child, started: Instant) -> Result<(), String> {
        let mut backoff = Backoff::new(self.probe_backoff, self.probe_max_backoff);
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return Err(format!("server exited with {status} before becoming ready"));
                }
                Ok(None) => {}
                Err(e) => return Err(format!("failed to poll server process: {e}")),
            }

            if self.probe.probe().await {
                return Ok(());
            }

            if started.elapsed() >= self.startup_timeout {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill unresponsive server");
                }
                return Err(format!(
                    "server did not pass its health check within {}s",
                    self.startup_timeout.as_secs()
                ));
            }

            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "health probe missed; retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_states() {
        assert!(!ServerState::NotStarted.is_settled());
        assert!(!ServerState::Starting.is_settled());
        assert!(ServerState::Ready.is_settled());
        assert!(ServerState::Crashed.is_settled());
    }

    #[test]
    fn new_supervisor_is_not_started() {
        let sup = ProcessSupervisor::new(&WorkerConfig::default()).unwrap();
        assert_eq!(sup.state(), ServerState::NotStarted);
        assert_eq!(sup.spawn_count(), 0);
        assert!(sup.last_failure().is_none());
    }

    #[tokio::test]
    async fn missing_binary_surfaces_as_supervisor_timeout() {
        let config = WorkerConfig::builder()
            .server_program("docling-worker-no-such-binary")
            .build()
            .unwrap();
        let sup = ProcessSupervisor::new(&config).unwrap();

        let err = sup.ensure_ready(Duration::from_secs(5)).await.unwrap_err();
        match err {
            WorkerError::SupervisorTimeout { detail, .. } => {
                assert!(detail.contains("failed to launch"), "got: {detail}")
            }
            other => panic!("expected SupervisorTimeout, got {other:?}"),
        }
        assert_eq!(sup.state(), ServerState::Crashed);
        assert_eq!(sup.spawn_count(), 1);
    }
}
