//! Supervisor tests with real child processes.
//!
//! `sleep` and `sh` stand in for docling-serve; readiness is controlled by
//! in-process probes so no HTTP server is needed.

#![cfg(unix)]

use async_trait::async_trait;
use docling_worker::{
    CommandLauncher, HealthProbe, ProcessSupervisor, ServerState, Supervisor, WorkerConfig,
    WorkerError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Healthy once `open` is set.
#[derive(Default)]
struct GatedProbe {
    open: AtomicBool,
}

impl GatedProbe {
    fn open() -> Arc<Self> {
        let probe = Self::default();
        probe.open.store(true, Ordering::SeqCst);
        Arc::new(probe)
    }
}

#[async_trait]
impl HealthProbe for GatedProbe {
    async fn probe(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Healthy once `path` exists.
struct MarkerProbe {
    path: std::path::PathBuf,
}

#[async_trait]
impl HealthProbe for MarkerProbe {
    async fn probe(&self) -> bool {
        self.path.exists()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(startup_timeout_secs: u64) -> WorkerConfig {
    WorkerConfig::builder()
        .probe_backoff_ms(10)
        .probe_max_backoff_ms(40)
        .startup_timeout_secs(startup_timeout_secs)
        .build()
        .unwrap()
}

fn supervisor(program: &str, args: &[&str], probe: Arc<GatedProbe>) -> ProcessSupervisor {
    ProcessSupervisor::with_parts(
        &config(30),
        Arc::new(CommandLauncher::new(program, args.iter().copied())),
        probe,
    )
}

async fn wait_for_state(sup: &ProcessSupervisor, state: ServerState) {
    let mut rx = sup.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached in time")
        .expect("signal closed");
}

// ── Startup ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_waiters_share_one_spawn() {
    let probe = Arc::new(GatedProbe::default());
    let sup = supervisor("sleep", &["30"], probe.clone());

    let open_later = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        probe.open.store(true, Ordering::SeqCst);
    };
    let deadline = Duration::from_secs(5);
    let (a, b, ()) = tokio::join!(
        sup.ensure_ready(deadline),
        sup.ensure_ready(deadline),
        open_later
    );

    assert!(a.is_ok(), "first waiter: {a:?}");
    assert!(b.is_ok(), "second waiter: {b:?}");
    assert_eq!(sup.spawn_count(), 1);
    assert_eq!(sup.state(), ServerState::Ready);
}

#[tokio::test]
async fn ready_server_is_not_respawned() {
    let sup = supervisor("sleep", &["30"], GatedProbe::open());
    sup.ensure_ready(Duration::from_secs(5)).await.unwrap();
    sup.ensure_ready(Duration::from_secs(5)).await.unwrap();
    assert_eq!(sup.spawn_count(), 1);
}

#[tokio::test]
async fn early_exit_fails_all_waiters_then_respawns_once() {
    let sup = supervisor("sh", &["-c", "exit 1"], Arc::new(GatedProbe::default()));

    let deadline = Duration::from_secs(5);
    let (a, b) = tokio::join!(sup.ensure_ready(deadline), sup.ensure_ready(deadline));
    for result in [a, b] {
        match result {
            Err(WorkerError::SupervisorTimeout { detail, .. }) => {
                assert!(detail.contains("before becoming ready"), "got: {detail}")
            }
            other => panic!("expected SupervisorTimeout, got {other:?}"),
        }
    }
    assert_eq!(sup.state(), ServerState::Crashed);
    assert_eq!(sup.spawn_count(), 1);

    let again = sup.ensure_ready(deadline).await;
    assert!(again.is_err());
    assert_eq!(sup.spawn_count(), 2);
}

#[tokio::test]
async fn deadline_elapses_while_probe_never_passes() {
    let sup = supervisor("sleep", &["30"], Arc::new(GatedProbe::default()));

    let err = sup
        .ensure_ready(Duration::from_millis(200))
        .await
        .unwrap_err();
    match err {
        WorkerError::SupervisorTimeout { detail, .. } => {
            assert!(detail.contains("within"), "got: {detail}")
        }
        other => panic!("expected SupervisorTimeout, got {other:?}"),
    }
    // The start attempt keeps going for later callers.
    assert_eq!(sup.state(), ServerState::Starting);
}

#[tokio::test]
async fn unresponsive_server_is_killed_after_startup_timeout() {
    let sup = ProcessSupervisor::with_parts(
        &config(1),
        Arc::new(CommandLauncher::new("sleep", ["30"])),
        Arc::new(GatedProbe::default()),
    );

    let err = sup.ensure_ready(Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, WorkerError::SupervisorTimeout { .. }));
    assert_eq!(sup.state(), ServerState::Crashed);
    assert!(sup
        .last_failure()
        .unwrap()
        .contains("did not pass its health check"));
}

// ── Crash recovery ───────────────────────────────────────────────────────────

#[tokio::test]
async fn crash_after_ready_is_detected_and_restarted() {
    init_tracing();
    let sup = supervisor("sh", &["-c", "sleep 0.3"], GatedProbe::open());

    sup.ensure_ready(Duration::from_secs(5)).await.unwrap();
    assert_eq!(sup.state(), ServerState::Ready);

    wait_for_state(&sup, ServerState::Crashed).await;
    assert!(sup.last_failure().unwrap().contains("exited"));

    sup.ensure_ready(Duration::from_secs(5)).await.unwrap();
    assert_eq!(sup.spawn_count(), 2);
}

#[tokio::test]
async fn server_output_does_not_block_startup() {
    init_tracing();
    let sup = supervisor(
        "sh",
        &["-c", "echo starting; echo warming up >&2; sleep 30"],
        GatedProbe::open(),
    );
    sup.ensure_ready(Duration::from_secs(5)).await.unwrap();
    assert_eq!(sup.state(), ServerState::Ready);
}

#[tokio::test]
async fn invalid_utf8_output_keeps_the_server_alive() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ready");
    // A non-UTF-8 line, then far more output than a pipe buffer holds: the
    // last writes only succeed while the line reader is still draining.
    let script = format!(
        "printf '\\377\\n'; sleep 0.2; head -c 300000 /dev/zero | tr '\\0' a; echo; touch '{}'; sleep 30",
        marker.display()
    );
    let sup = ProcessSupervisor::with_parts(
        &config(30),
        Arc::new(CommandLauncher::new("sh", ["-c".to_string(), script])),
        Arc::new(MarkerProbe { path: marker }),
    );

    let ready = sup.ensure_ready(Duration::from_secs(10)).await;
    assert!(ready.is_ok(), "got: {ready:?}");
    assert_eq!(sup.state(), ServerState::Ready);
}
