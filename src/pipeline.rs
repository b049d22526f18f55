//! Lifecycle controller for the tail → parse → correlate → forward pipeline.
//!
//! A [`Pipeline`] owns one reader per log source, the correlator task and
//! the forwarder task:
//!
//! ```text
//! proxy reader ──┐
//!                ├─ mpsc ─> correlator ─ mpsc ─> forwarder ─> collector
//! gateway reader ┘
//! ```
//!
//! Shutdown runs front to back. Cancelling the readers drops their senders,
//! which lets the correlator flush its pending events and drop its own
//! sender, which in turn lets the forwarder drain and exit.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ClientError, CollectorClient};
use crate::config::Config;
use crate::correlator::{Correlator, CorrelatorSettings};
use crate::event::{LogSource, PartialEvent};
use crate::forwarder::{Forwarder, ForwarderConfig};
use crate::host;
use crate::parser::LineParser;
use crate::stats::{Counter, PipelineStats, StatsSnapshot};
use crate::tail::{TailReader, TailSettings};

/// How often the correlator releases expired pending events.
const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Set while some pipeline in this process is running.
static LIVE_PIPELINE: AtomicBool = AtomicBool::new(false);

/// Lifecycle states. A pipeline only ever moves forward through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Errors that prevent a pipeline from being built.
#[derive(Debug)]
pub enum PipelineError {
    /// The collector client could not be created
    Client(ClientError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Client(e) => write!(f, "Failed to create collector client: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Client(e) => Some(e),
        }
    }
}

impl From<ClientError> for PipelineError {
    fn from(err: ClientError) -> Self {
        PipelineError::Client(err)
    }
}

/// Counts a live reader task for as long as it exists.
struct ReaderGuard(Arc<AtomicUsize>);

impl ReaderGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Tasks {
    readers: Vec<JoinHandle<()>>,
    correlator: Option<JoinHandle<()>>,
    forwarder: Option<JoinHandle<()>>,
}

/// The running log pipeline.
///
/// Construct it once from the composition root and drive it through
/// [`start`](Self::start) and [`stop`](Self::stop). Both are idempotent.
/// At most one pipeline runs per process: while one is live, `start` on any
/// other is a no-op.
///
/// # Example
///
/// ```no_run
/// use proxylog_forwarder::config::Config;
/// use proxylog_forwarder::pipeline::Pipeline;
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::from_env().expect("Failed to load config");
///     let pipeline = Pipeline::new(config).expect("Failed to build pipeline");
///
///     pipeline.start().await;
///     tokio::signal::ctrl_c().await.ok();
///     pipeline.stop().await;
/// }
/// ```
pub struct Pipeline {
    config: Config,
    client: CollectorClient,
    parser: LineParser,
    stats: Arc<PipelineStats>,
    state: RwLock<PipelineState>,

    /// Serializes start and stop
    tasks: Mutex<Tasks>,

    /// Stops the readers; everything downstream drains on its own
    reader_cancel: CancellationToken,

    /// Stops the forwarder when draining exceeds the shutdown timeout
    hard_cancel: CancellationToken,

    active_readers: Arc<AtomicUsize>,

    /// Whether this pipeline holds the process-wide live slot
    holds_live: AtomicBool,
}

impl Pipeline {
    /// Build a pipeline. Nothing runs until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Client` if the collector client cannot be
    /// created from the configuration.
    pub fn new(config: Config) -> Result<Self, PipelineError> {
        let client = CollectorClient::new(&config)?;
        let parser = LineParser::from_config(&config);

        Ok(Self {
            config,
            client,
            parser,
            stats: Arc::new(PipelineStats::new()),
            state: RwLock::new(PipelineState::Idle),
            tasks: Mutex::new(Tasks::default()),
            reader_cancel: CancellationToken::new(),
            hard_cancel: CancellationToken::new(),
            active_readers: Arc::new(AtomicUsize::new(0)),
            holds_live: AtomicBool::new(false),
        })
    }

    /// Start tailing both sources.
    ///
    /// Returns `true` if this call started the pipeline. Calling it while
    /// running is a no-op, as is starting a second pipeline while another
    /// one in the process is live. A stopped pipeline cannot be restarted.
    pub async fn start(&self) -> bool {
        let mut tasks = self.tasks.lock().await;

        match self.state() {
            PipelineState::Idle => {}
            PipelineState::Running | PipelineState::Stopping => {
                debug!("Pipeline already running, ignoring start");
                return false;
            }
            PipelineState::Stopped => {
                warn!("Pipeline has been stopped and cannot be restarted");
                return false;
            }
        }

        if LIVE_PIPELINE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Another pipeline is already running in this process, ignoring start");
            return false;
        }
        self.holds_live.store(true, Ordering::SeqCst);

        let origin_host = host::origin_host(self.config.origin_host.as_deref());
        let (event_tx, event_rx) = mpsc::channel::<PartialEvent>(self.config.queue_capacity);
        let (forward_tx, forward_rx) = mpsc::channel(self.config.queue_capacity);

        let forwarder = Forwarder::new(
            self.client.clone(),
            ForwarderConfig::from_config(&self.config),
            self.stats.clone(),
        );
        tasks.forwarder = Some(tokio::spawn(forwarder.run(forward_rx, self.hard_cancel.clone())));

        let correlator = Correlator::new(
            CorrelatorSettings::from_config(&self.config),
            origin_host,
            self.stats.clone(),
        );
        tasks.correlator = Some(tokio::spawn(correlator.run(event_rx, forward_tx, SWEEP_INTERVAL)));

        let settings = TailSettings::from_config(&self.config);
        let sources = [
            (LogSource::Proxy, self.config.proxy_source.clone()),
            (LogSource::Gateway, self.config.gateway_source.clone()),
        ];
        for (source, spec) in sources {
            info!(source = %source, spec = %spec, "Attaching tail reader");
            // Attach before returning so lines written after start are never missed
            let reader = TailReader::open(source, spec, settings, self.reader_cancel.clone())
                .await
                .with_stats(self.stats.clone());
            let guard = ReaderGuard::new(&self.active_readers);
            tasks.readers.push(tokio::spawn(read_source(
                reader,
                self.parser.clone(),
                event_tx.clone(),
                self.stats.clone(),
                self.reader_cancel.clone(),
                guard,
            )));
        }

        self.set_state(PipelineState::Running);
        info!(
            collector_url = %self.config.collector_url,
            window_secs = self.config.correlation_window.as_secs(),
            unmatched_policy = ?self.config.unmatched_policy,
            match_policy = ?self.config.match_policy,
            "Pipeline started"
        );
        true
    }

    /// Stop the pipeline and wait for every task to finish.
    ///
    /// Each wait is bounded by the shutdown timeout; a task that exceeds it
    /// is aborted. Once this returns no task is left that could deliver.
    /// Returns `true` if this call stopped the pipeline.
    pub async fn stop(&self) -> bool {
        let mut tasks = self.tasks.lock().await;

        if self.state() != PipelineState::Running {
            debug!(state = %self.state(), "Pipeline not running, ignoring stop");
            return false;
        }

        self.set_state(PipelineState::Stopping);
        info!("Stopping pipeline");
        let limit = self.config.shutdown_timeout;

        self.reader_cancel.cancel();
        for handle in tasks.readers.drain(..) {
            join_bounded("reader", handle, limit).await;
        }

        if let Some(handle) = tasks.correlator.take() {
            join_bounded("correlator", handle, limit).await;
        }

        if let Some(mut handle) = tasks.forwarder.take() {
            if timeout(limit, &mut handle).await.is_err() {
                warn!(timeout_secs = limit.as_secs(), "Forwarder did not drain in time, cancelling");
                self.hard_cancel.cancel();
                join_bounded("forwarder", handle, limit).await;
            }
        }

        self.set_state(PipelineState::Stopped);
        self.release_live();
        info!(stats = ?self.stats.snapshot(), "Pipeline stopped");
        true
    }

    fn release_live(&self) {
        if self.holds_live.swap(false, Ordering::SeqCst) {
            LIVE_PIPELINE.store(false, Ordering::SeqCst);
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: PipelineState) {
        *self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    /// Number of reader tasks currently alive.
    pub fn active_readers(&self) -> usize {
        self.active_readers.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.reader_cancel.cancel();
        self.hard_cancel.cancel();
        self.release_live();
    }
}

/// Await a task for at most `limit`, aborting it past that.
async fn join_bounded(name: &str, mut handle: JoinHandle<()>, limit: Duration) {
    match timeout(limit, &mut handle).await {
        Ok(Ok(())) => debug!(task = name, "Task finished"),
        Ok(Err(e)) => warn!(task = name, error = %e, "Task failed during shutdown"),
        Err(_) => {
            warn!(task = name, timeout_secs = limit.as_secs(), "Task shutdown timed out, aborting");
            handle.abort();
            let _ = handle.await;
        }
    }
}

/// Reader task: tail one source, parse each line, hand events on.
async fn read_source(
    mut reader: TailReader,
    parser: LineParser,
    tx: mpsc::Sender<PartialEvent>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    _guard: ReaderGuard,
) {
    let source = reader.source();

    while let Some(line) = reader.next_line().await {
        stats.record_line(source);

        let event = match parser.parse(&line, source) {
            Ok(event) => event,
            Err(e) => {
                stats.incr(Counter::ParseFailures);
                debug!(source = %source, error = %e, line = %line, "Skipping unparsable line");
                continue;
            }
        };

        let sent = tokio::select! {
            result = tx.send(event) => result.is_ok(),
            _ = cancel.cancelled() => false,
        };
        if !sent {
            break;
        }
    }

    debug!(source = %source, "Reader stopped");
}
