//! Correlator: merges gateway and proxy partial events.
//!
//! The correlator is the single owner of the correlation cache. Both tail
//! readers feed it through one mpsc channel, so the cache is only ever
//! touched from the correlator task and needs no lock.
//!
//! Gateway events only supply identity and are parked in the cache. Proxy
//! events look for a gateway partner within the correlation window. A proxy
//! event that arrives before its gateway partner is held in a bounded
//! pending queue until the window (plus a short grace) has passed, after
//! which the unmatched policy applies.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::TimeDelta;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::{time_distance, CacheEntry, CacheKey, CorrelationCache};
use crate::config::{Config, MatchPolicy, UnmatchedPolicy};
use crate::event::{CorrelatedEvent, LogSource, PartialEvent};
use crate::stats::{Counter, PipelineStats};

/// Extra hold on pending proxy events beyond the correlation window.
pub const PENDING_GRACE: Duration = Duration::from_secs(1);

/// Configuration for the correlator.
#[derive(Debug, Clone)]
pub struct CorrelatorSettings {
    /// Maximum distance between matching event timestamps (inclusive)
    pub window: TimeDelta,

    /// How long an unmatched proxy event waits for a late gateway event
    pub pending_hold: Duration,

    /// Bound on both the cache and the pending queue
    pub capacity: usize,

    pub cache_ttl: Duration,
    pub unmatched_policy: UnmatchedPolicy,
    pub match_policy: MatchPolicy,
}

impl CorrelatorSettings {
    pub fn new(window: Duration) -> Self {
        Self {
            window: to_time_delta(window),
            pending_hold: window + PENDING_GRACE,
            ..Self::default()
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            window: to_time_delta(config.correlation_window),
            pending_hold: config.correlation_window + PENDING_GRACE,
            capacity: config.cache_capacity,
            cache_ttl: config.cache_ttl,
            unmatched_policy: config.unmatched_policy,
            match_policy: config.match_policy,
        }
    }
}

impl Default for CorrelatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

pub struct Correlator {
    settings: CorrelatorSettings,
    cache: CorrelationCache,
    pending: VecDeque<CacheEntry>,
    origin_host: String,
    stats: Arc<PipelineStats>,
}

impl Correlator {
    pub fn new(settings: CorrelatorSettings, origin_host: impl Into<String>, stats: Arc<PipelineStats>) -> Self {
        let cache = CorrelationCache::new(settings.capacity, settings.cache_ttl);
        Self {
            pending: VecDeque::with_capacity(settings.capacity.min(1024)),
            settings,
            cache,
            origin_host: origin_host.into(),
            stats,
        }
    }

    /// Feed one partial event, returning whatever became ready to forward.
    pub fn ingest(&mut self, event: PartialEvent) -> Vec<CorrelatedEvent> {
        self.ingest_at(event, Instant::now())
    }

    fn ingest_at(&mut self, event: PartialEvent, now: Instant) -> Vec<CorrelatedEvent> {
        let mut ready = Vec::new();

        if !event.is_correlatable() {
            self.stats.incr(Counter::Discarded);
            debug!(source = %event.source, line = %event.raw_line, "Discarding event without identity or client IP");
            return ready;
        }

        match event.source {
            LogSource::Gateway => self.on_gateway(event, &mut ready),
            LogSource::Proxy => self.on_proxy(event, now, &mut ready),
        }
        ready
    }

    fn on_proxy(&mut self, proxy: PartialEvent, now: Instant, ready: &mut Vec<CorrelatedEvent>) {
        let keys = CacheKey::for_event(&proxy);
        let window = self.settings.window;

        let partner = match self.settings.match_policy {
            MatchPolicy::Consume => self
                .cache
                .take_match(&keys, proxy.timestamp, window)
                .map(|entry| entry.event),
            MatchPolicy::Retain => self
                .cache
                .find_match(&keys, proxy.timestamp, window)
                .map(|entry| entry.event.clone()),
        };

        match partner {
            Some(gateway) => self.merge(&gateway, &proxy, ready),
            None => {
                self.pending.push_back(CacheEntry {
                    event: proxy,
                    ingested_at: now,
                });
                if self.pending.len() > self.settings.capacity {
                    if let Some(oldest) = self.pending.pop_front() {
                        warn!(
                            capacity = self.settings.capacity,
                            "Pending proxy queue full, releasing oldest event"
                        );
                        self.release_unmatched(oldest.event, ready);
                    }
                }
            }
        }
    }

    fn on_gateway(&mut self, gateway: PartialEvent, ready: &mut Vec<CorrelatedEvent>) {
        let keys = CacheKey::for_event(&gateway);
        let window = self.settings.window;

        let candidates: Vec<(usize, TimeDelta)> = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, entry)| shares_key(&keys, &entry.event))
            .filter_map(|(i, entry)| {
                let distance = time_distance(entry.event.timestamp, gateway.timestamp);
                (distance <= window).then_some((i, distance))
            })
            .collect();

        match self.settings.match_policy {
            MatchPolicy::Consume => {
                let closest = candidates
                    .iter()
                    .min_by(|(ia, da), (ib, db)| da.cmp(db).then(ib.cmp(ia)))
                    .map(|(i, _)| *i);
                match closest.and_then(|i| self.pending.remove(i)) {
                    Some(entry) => self.merge(&gateway, &entry.event, ready),
                    None => self.remember(gateway),
                }
            }
            MatchPolicy::Retain => {
                // Highest index first so earlier indices stay valid
                let mut matched: Vec<CacheEntry> = candidates
                    .iter()
                    .rev()
                    .filter_map(|(i, _)| self.pending.remove(*i))
                    .collect();
                matched.reverse();
                for entry in matched {
                    self.merge(&gateway, &entry.event, ready);
                }
                self.remember(gateway);
            }
        }
    }

    fn remember(&mut self, gateway: PartialEvent) {
        if let Some(evicted) = self.cache.put(gateway) {
            debug!(
                identity = ?evicted.event.identity,
                client_ip = ?evicted.event.client_ip,
                "Cache full, evicted oldest gateway event"
            );
        }
    }

    fn merge(&self, gateway: &PartialEvent, proxy: &PartialEvent, ready: &mut Vec<CorrelatedEvent>) {
        match CorrelatedEvent::merge(gateway, proxy, &self.origin_host) {
            Some(event) => {
                self.stats.incr(Counter::Correlated);
                debug!(identity = %event.identity, destination = %event.destination, "Correlated event");
                ready.push(event);
            }
            None => {
                self.stats.incr(Counter::Incomplete);
                debug!(line = %proxy.raw_line, "Correlated event lacks identity or destination");
            }
        }
    }

    fn release_unmatched(&self, proxy: PartialEvent, ready: &mut Vec<CorrelatedEvent>) {
        match self.settings.unmatched_policy {
            UnmatchedPolicy::Drop => {
                self.stats.incr(Counter::UnmatchedDropped);
                debug!(line = %proxy.raw_line, "Dropping unmatched proxy event");
            }
            UnmatchedPolicy::ForwardUnknown => match CorrelatedEvent::unmatched(&proxy, &self.origin_host) {
                Some(event) => {
                    self.stats.incr(Counter::UnmatchedForwarded);
                    debug!(destination = %event.destination, "Forwarding unmatched proxy event");
                    ready.push(event);
                }
                None => {
                    self.stats.incr(Counter::Incomplete);
                    debug!(line = %proxy.raw_line, "Unmatched proxy event has no destination");
                }
            },
        }
    }

    /// Release pending proxy events whose hold has run out and age out the
    /// cache.
    pub fn expire(&mut self) -> Vec<CorrelatedEvent> {
        self.expire_at(Instant::now())
    }

    fn expire_at(&mut self, now: Instant) -> Vec<CorrelatedEvent> {
        let mut ready = Vec::new();
        while let Some(front) = self.pending.front() {
            if now.saturating_duration_since(front.ingested_at) < self.settings.pending_hold {
                break;
            }
            if let Some(entry) = self.pending.pop_front() {
                self.release_unmatched(entry.event, &mut ready);
            }
        }
        self.cache.evict_expired();
        ready
    }

    /// Release every pending proxy event through the unmatched policy.
    pub fn drain_pending(&mut self) -> Vec<CorrelatedEvent> {
        let mut ready = Vec::new();
        while let Some(entry) = self.pending.pop_front() {
            self.release_unmatched(entry.event, &mut ready);
        }
        ready
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Run until the input channel closes.
    ///
    /// Pending events are swept every `sweep_interval` and flushed once the
    /// input closes. Output goes to the forwarder queue without waiting, so a
    /// slow collector never stalls ingestion.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<PartialEvent>,
        tx: mpsc::Sender<CorrelatedEvent>,
        sweep_interval: Duration,
    ) {
        let mut ticker = interval(sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            tokio::select! {
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            let ready = self.ingest(event);
                            self.emit(&tx, ready);
                        }
                        None => break,
                    }
                }

                _ = ticker.tick() => {
                    let ready = self.expire();
                    self.emit(&tx, ready);
                }
            }
        }

        let ready = self.drain_pending();
        info!(flushed = ready.len(), cached = self.cache.len(), "Correlator input closed, flushing pending events");
        self.emit(&tx, ready);
    }

    fn emit(&self, tx: &mpsc::Sender<CorrelatedEvent>, ready: Vec<CorrelatedEvent>) {
        for event in ready {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    self.stats.incr(Counter::QueueOverflow);
                    let payload = serde_json::to_string(&event.to_record()).unwrap_or_default();
                    error!(payload = %payload, "Forwarder queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(event)) => {
                    warn!(identity = %event.identity, "Forwarder queue closed, dropping event");
                }
            }
        }
    }
}

fn shares_key(keys: &[CacheKey], event: &PartialEvent) -> bool {
    CacheKey::for_event(event).iter().any(|key| keys.contains(key))
}
