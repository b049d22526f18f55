//! Pipeline counters.
//!
//! Per-line and per-event failures never stop the pipeline; they surface
//! here and in the logs instead.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::event::LogSource;

/// Counter identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    ProxyLines,
    GatewayLines,
    ParseFailures,
    /// Parsed lines with neither identity nor client IP
    Discarded,
    Correlated,
    UnmatchedDropped,
    UnmatchedForwarded,
    /// Events that could not be forwarded for lack of identity or destination
    Incomplete,
    QueueOverflow,
    Delivered,
    DeliveryFailures,
    Retries,
    DeadLettered,
}

/// Shared, lock-free pipeline counters.
#[derive(Debug, Default)]
pub struct PipelineStats {
    proxy_lines: AtomicU64,
    gateway_lines: AtomicU64,
    parse_failures: AtomicU64,
    discarded: AtomicU64,
    correlated: AtomicU64,
    unmatched_dropped: AtomicU64,
    unmatched_forwarded: AtomicU64,
    incomplete: AtomicU64,
    queue_overflow: AtomicU64,
    delivered: AtomicU64,
    delivery_failures: AtomicU64,
    retries: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub proxy_lines: u64,
    pub gateway_lines: u64,
    pub parse_failures: u64,
    pub discarded: u64,
    pub correlated: u64,
    pub unmatched_dropped: u64,
    pub unmatched_forwarded: u64,
    pub incomplete: u64,
    pub queue_overflow: u64,
    pub delivered: u64,
    pub delivery_failures: u64,
    pub retries: u64,
    pub dead_lettered: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, counter: Counter) {
        self.slot(counter).fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_line(&self, source: LogSource) {
        match source {
            LogSource::Proxy => self.incr(Counter::ProxyLines),
            LogSource::Gateway => self.incr(Counter::GatewayLines),
        }
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.slot(counter).load(Ordering::Relaxed)
    }

    fn slot(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::ProxyLines => &self.proxy_lines,
            Counter::GatewayLines => &self.gateway_lines,
            Counter::ParseFailures => &self.parse_failures,
            Counter::Discarded => &self.discarded,
            Counter::Correlated => &self.correlated,
            Counter::UnmatchedDropped => &self.unmatched_dropped,
            Counter::UnmatchedForwarded => &self.unmatched_forwarded,
            Counter::Incomplete => &self.incomplete,
            Counter::QueueOverflow => &self.queue_overflow,
            Counter::Delivered => &self.delivered,
            Counter::DeliveryFailures => &self.delivery_failures,
            Counter::Retries => &self.retries,
            Counter::DeadLettered => &self.dead_lettered,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            proxy_lines: self.get(Counter::ProxyLines),
            gateway_lines: self.get(Counter::GatewayLines),
            parse_failures: self.get(Counter::ParseFailures),
            discarded: self.get(Counter::Discarded),
            correlated: self.get(Counter::Correlated),
            unmatched_dropped: self.get(Counter::UnmatchedDropped),
            unmatched_forwarded: self.get(Counter::UnmatchedForwarded),
            incomplete: self.get(Counter::Incomplete),
            queue_overflow: self.get(Counter::QueueOverflow),
            delivered: self.get(Counter::Delivered),
            delivery_failures: self.get(Counter::DeliveryFailures),
            retries: self.get(Counter::Retries),
            dead_lettered: self.get(Counter::DeadLettered),
        }
    }
}
