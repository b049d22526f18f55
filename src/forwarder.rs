//! Forwarder: drains correlated events to the collector.
//!
//! The forwarder runs as its own task behind a bounded queue, so delivery
//! latency never reaches the tail readers. Retryable failures go into a
//! bounded in-memory retry buffer with exponential backoff. Events that run
//! out of retries, fail permanently, overflow the buffer or are still
//! buffered at shutdown are handed to the [`DeadLetterSink`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{backoff_delay, is_retryable_error, CollectorClient, DeliveryOutcome};
use crate::config::Config;
use crate::event::{CollectorRecord, CorrelatedEvent};
use crate::stats::{Counter, PipelineStats};

/// Configuration for the forwarder.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Retries per event after the first attempt
    pub max_retries: u32,

    /// Maximum number of events waiting for a retry
    pub retry_capacity: usize,

    /// Optional JSON-lines file receiving dead letters
    pub dead_letter_path: Option<PathBuf>,
}

impl ForwarderConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_capacity: config.retry_buffer_capacity,
            dead_letter_path: config.dead_letter_path.clone(),
        }
    }
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Serialize)]
struct DeadLetter<'a> {
    reason: &'a str,
    failed_at: String,
    #[serde(flatten)]
    record: CollectorRecord,
}

/// Final resting place for events that could not be delivered.
///
/// Every dead letter is logged at `error` with its full JSON payload. When a
/// path is configured the same JSON is appended there, one object per line.
pub struct DeadLetterSink {
    path: Option<PathBuf>,
    file: Option<File>,
}

impl DeadLetterSink {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path, file: None }
    }

    pub async fn record(&mut self, event: &CorrelatedEvent, reason: &str) {
        let letter = DeadLetter {
            reason,
            failed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            record: event.to_record(),
        };
        let payload = match serde_json::to_string(&letter) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, identity = %event.identity, "Failed to serialize dead letter");
                return;
            }
        };

        error!(reason = %reason, payload = %payload, "Event could not be delivered");

        if let Err(e) = self.append(&payload).await {
            warn!(error = %e, "Failed to write dead-letter file");
            self.file = None;
        }
    }

    async fn append(&mut self, payload: &str) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if self.file.is_none() {
            let file = OpenOptions::new().create(true).append(true).open(path).await?;
            self.file = Some(file);
        }

        if let Some(file) = self.file.as_mut() {
            file.write_all(format!("{}\n", payload).as_bytes()).await?;
            file.flush().await?;
        }
        Ok(())
    }
}

struct PendingRetry {
    event: CorrelatedEvent,

    /// Retries already made
    attempts: u32,

    due: Instant,
}

pub struct Forwarder {
    client: CollectorClient,
    config: ForwarderConfig,
    retries: VecDeque<PendingRetry>,
    dead_letters: DeadLetterSink,
    stats: Arc<PipelineStats>,
}

impl Forwarder {
    pub fn new(client: CollectorClient, config: ForwarderConfig, stats: Arc<PipelineStats>) -> Self {
        let dead_letters = DeadLetterSink::new(config.dead_letter_path.clone());
        Self {
            client,
            retries: VecDeque::with_capacity(config.retry_capacity.min(1024)),
            config,
            dead_letters,
            stats,
        }
    }

    /// Deliver queued events until the queue closes or `cancel` fires.
    ///
    /// A closed queue means a graceful stop; `cancel` is the hard stop used
    /// when that takes too long. Either way, events still waiting for a
    /// retry are dead-lettered before returning.
    pub async fn run(mut self, mut rx: mpsc::Receiver<CorrelatedEvent>, cancel: CancellationToken) {
        info!(
            url = %self.client.collector_url(),
            max_retries = self.config.max_retries,
            "Forwarder started"
        );

        loop {
            let next_due = self.next_due();
            // Placeholder deadline; the branch is disabled when nothing is due
            let wake_at = next_due.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    warn!(retrying = self.retries.len(), "Forwarder cancelled");
                    while let Ok(event) = rx.try_recv() {
                        self.dead_letter(&event, "shutdown").await;
                    }
                    break;
                }

                _ = sleep_until(wake_at), if next_due.is_some() => {
                    self.retry_due().await;
                }

                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => self.attempt(event, 0).await,
                        None => {
                            debug!("Forwarder queue closed");
                            break;
                        }
                    }
                }
            }
        }

        let leftovers: Vec<PendingRetry> = self.retries.drain(..).collect();
        for pending in &leftovers {
            self.dead_letter(&pending.event, "shutdown").await;
        }
        info!(dead_lettered = leftovers.len(), "Forwarder stopped");
    }

    fn next_due(&self) -> Option<Instant> {
        self.retries.iter().map(|pending| pending.due).min()
    }

    async fn retry_due(&mut self) {
        let now = Instant::now();
        let (due, waiting): (Vec<PendingRetry>, Vec<PendingRetry>) =
            self.retries.drain(..).partition(|pending| pending.due <= now);
        self.retries.extend(waiting);

        for pending in due {
            self.stats.incr(Counter::Retries);
            self.attempt(pending.event, pending.attempts).await;
        }
    }

    /// One delivery attempt; failures are rescheduled or dead-lettered.
    async fn attempt(&mut self, event: CorrelatedEvent, attempts: u32) {
        let error = match self.client.deliver(&event).await {
            DeliveryOutcome::Delivered => {
                self.stats.incr(Counter::Delivered);
                debug!(identity = %event.identity, destination = %event.destination, "Event delivered");
                return;
            }
            DeliveryOutcome::Failed(e) => e,
        };

        self.stats.incr(Counter::DeliveryFailures);
        let retryable = is_retryable_error(&error);

        if retryable && attempts < self.config.max_retries {
            let delay = backoff_delay(attempts);
            warn!(
                error = %error,
                identity = %event.identity,
                destination = %event.destination,
                attempt = attempts + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Delivery failed, will retry"
            );
            self.schedule(event, attempts + 1, delay).await;
        } else {
            warn!(
                error = %error,
                identity = %event.identity,
                destination = %event.destination,
                attempts = attempts + 1,
                retryable = retryable,
                "Delivery failed permanently"
            );
            self.dead_letter(&event, &error.to_string()).await;
        }
    }

    async fn schedule(&mut self, event: CorrelatedEvent, attempts: u32, delay: Duration) {
        if self.retries.len() >= self.config.retry_capacity {
            warn!(capacity = self.config.retry_capacity, "Retry buffer full");
            self.dead_letter(&event, "retry buffer full").await;
            return;
        }
        self.retries.push_back(PendingRetry {
            event,
            attempts,
            due: Instant::now() + delay,
        });
    }

    async fn dead_letter(&mut self, event: &CorrelatedEvent, reason: &str) {
        self.stats.incr(Counter::DeadLettered);
        self.dead_letters.record(event, reason).await;
    }
}
