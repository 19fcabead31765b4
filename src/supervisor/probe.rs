//! Active readiness probing of the conversion server.
//!
//! A successful probe replaces the old fixed "give it 15 seconds" settle
//! delay: the supervisor declares the server ready the moment it answers,
//! and keeps asking with exponential backoff until it does.

use crate::error::WorkerError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Answers "is the conversion server accepting requests right now?".
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// `GET <url>`; any 2xx response counts as healthy.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpHealthProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, WorkerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkerError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                debug!(url = %self.url, status = %resp.status(), "health probe not ok");
                false
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "health probe failed");
                false
            }
        }
    }
}

/// Doubling delay capped at `max`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let mut b = Backoff::new(Duration::from_millis(250), Duration::from_millis(1000));
        let delays: Vec<u64> = (0..5).map(|_| b.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![250, 500, 1000, 1000, 1000]);
    }

    #[test]
    fn backoff_initial_above_max_is_clamped() {
        let mut b = Backoff::new(Duration::from_secs(10), Duration::from_secs(2));
        assert_eq!(b.next_delay(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn http_probe_reflects_status() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status":"ok"}"#)
            .create_async()
            .await;

        let probe =
            HttpHealthProbe::new(format!("{}/health", server.url()), Duration::from_secs(2)).unwrap();
        assert!(probe.probe().await);
        ok.assert_async().await;

        let mut down = mockito::Server::new_async().await;
        down.mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;
        let probe =
            HttpHealthProbe::new(format!("{}/health", down.url()), Duration::from_secs(2)).unwrap();
        assert!(!probe.probe().await);
    }

    #[tokio::test]
    async fn http_probe_unreachable_is_unhealthy() {
        // Port 9 (discard) is essentially never listening on loopback.
        let probe =
            HttpHealthProbe::new("http://127.0.0.1:9/health", Duration::from_millis(500)).unwrap();
        assert!(!probe.probe().await);
    }
}
