//! Device polling and registry updates.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backoff::RetryBackoff;
use crate::config::PollConfig;
use crate::measurement::Measurement;
use crate::metrics::{AirGradientMetrics, PollResult};

/// Error type for polling operations.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("failed to fetch measurements: {0}")]
    Fetch(String),
    #[error("failed to decode measurements: {0}")]
    Decode(#[from] serde_json::Error),
}

impl PollError {
    /// The poll result this error is counted as.
    pub fn result(&self) -> PollResult {
        match self {
            PollError::Fetch(_) => PollResult::FetchError,
            PollError::Decode(_) => PollResult::DecodeError,
        }
    }
}

/// Something that can produce the raw body of a measurement snapshot.
pub trait MeasurementSource: Send + Sync {
    /// Fetch one response body. Any connection is released before returning.
    fn fetch(&self) -> impl Future<Output = Result<Vec<u8>, PollError>> + Send;
}

/// Fetches measurements from the device over HTTP.
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSource {
    /// Create a source for the given measurements URL.
    pub fn new(url: impl Into<String>) -> Result<Self, PollError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PollError::Fetch(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl MeasurementSource for HttpSource {
    async fn fetch(&self) -> Result<Vec<u8>, PollError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| PollError::Fetch(format!("{}: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Fetch(format!(
                "{}: unexpected status {}",
                self.url, status
            )));
        }

        // Consumes the response; the connection goes back to the pool here.
        let body = response
            .bytes()
            .await
            .map_err(|e| PollError::Fetch(format!("{}: {}", self.url, e)))?;

        Ok(body.to_vec())
    }
}

/// Polls a measurement source and publishes each snapshot to the registry.
pub struct Poller<S> {
    source: S,
    metrics: Arc<AirGradientMetrics>,
    interval: Duration,
    backoff: RetryBackoff,
}

impl<S: MeasurementSource> Poller<S> {
    /// Create a new poller.
    pub fn new(source: S, metrics: Arc<AirGradientMetrics>, config: &PollConfig) -> Self {
        Self {
            source,
            metrics,
            interval: config.interval(),
            backoff: RetryBackoff::new(config.retry),
        }
    }

    /// Fetch, decode and apply one snapshot.
    ///
    /// The registry is only touched once the body decoded completely.
    pub async fn poll_once(&self) -> Result<Measurement, PollError> {
        let body = self.source.fetch().await?;
        let measurement = Measurement::from_json(&body)?;
        self.metrics.update(&measurement);
        Ok(measurement)
    }

    /// Run one poll cycle and return how long to wait before the next.
    pub async fn cycle(&mut self) -> Duration {
        match self.poll_once().await {
            Ok(measurement) => {
                self.metrics.record_success(SystemTime::now());
                self.backoff.reset();
                debug!(
                    serial_number = %measurement.serial_no,
                    next_poll_in = ?self.interval,
                    "Poll succeeded"
                );
                self.interval
            }
            Err(e) => {
                let consecutive_failures = self.metrics.record_failure(e.result());
                let delay = self.backoff.next_delay();
                warn!(
                    error = %e,
                    consecutive_failures,
                    retry_in = ?delay,
                    "Poll failed"
                );
                delay
            }
        }
    }

    /// Run the polling loop until the shutdown signal is received.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "Starting poller");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = tokio::select! {
                delay = self.cycle() => delay,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            if delay.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        info!("Poller stopped");
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if shutdown.changed().await.is_err() {
            break;
        }
        if *shutdown.borrow() {
            break;
        }
    }
}
