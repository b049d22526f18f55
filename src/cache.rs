//! Bounded, time-indexed store of gateway events awaiting a proxy partner.
//!
//! Each stored event is reachable through every key it carries (identity and
//! client IP). A key always points at the most recent event seen for it.
//! Capacity is enforced in insertion order, and entries older than the
//! configured age are dropped before every insert.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::event::PartialEvent;

/// Default number of entries kept.
pub const DEFAULT_CACHE_CAPACITY: usize = 1_000;

/// Lookup key for matching events across sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Identity(String),
    ClientIp(String),
}

impl CacheKey {
    /// All keys an event can be matched on.
    pub fn for_event(event: &PartialEvent) -> Vec<CacheKey> {
        let mut keys = Vec::with_capacity(2);
        if let Some(identity) = &event.identity {
            keys.push(CacheKey::Identity(identity.clone()));
        }
        if let Some(ip) = &event.client_ip {
            keys.push(CacheKey::ClientIp(ip.clone()));
        }
        keys
    }
}

/// A stored event plus the local time it was ingested.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub event: PartialEvent,
    pub ingested_at: Instant,
}

struct Slot {
    entry: CacheEntry,
    keys: Vec<CacheKey>,
}

/// Absolute distance between two event timestamps.
pub(crate) fn time_distance(a: DateTime<Utc>, b: DateTime<Utc>) -> TimeDelta {
    if a >= b {
        a - b
    } else {
        b - a
    }
}

pub struct CorrelationCache {
    capacity: usize,
    max_age: Duration,
    slots: HashMap<u64, Slot>,
    index: HashMap<CacheKey, u64>,
    /// Live ids; ids grow monotonically so the first is the oldest
    order: BTreeSet<u64>,
    next_id: u64,
}

impl CorrelationCache {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            max_age,
            slots: HashMap::with_capacity(capacity),
            index: HashMap::with_capacity(capacity * 2),
            order: BTreeSet::new(),
            next_id: 0,
        }
    }

    /// Insert an event, overwriting whatever its keys pointed at.
    ///
    /// Returns the entry evicted to respect capacity, if any. Events without
    /// keys are not stored.
    pub fn put(&mut self, event: PartialEvent) -> Option<CacheEntry> {
        self.put_at(event, Instant::now())
    }

    fn put_at(&mut self, event: PartialEvent, now: Instant) -> Option<CacheEntry> {
        let keys = CacheKey::for_event(&event);
        if keys.is_empty() {
            return None;
        }

        self.evict_expired_at(now);

        for key in &keys {
            if let Some(old_id) = self.index.remove(key) {
                self.detach(old_id, key);
            }
        }

        let mut evicted = None;
        while self.slots.len() >= self.capacity {
            let Some(oldest) = self.order.first().copied() else {
                break;
            };
            evicted = self.remove(oldest);
        }

        let id = self.next_id;
        self.next_id += 1;
        for key in &keys {
            self.index.insert(key.clone(), id);
        }
        self.slots.insert(
            id,
            Slot {
                entry: CacheEntry {
                    event,
                    ingested_at: now,
                },
                keys,
            },
        );
        self.order.insert(id);

        evicted
    }

    /// Find the entry under any of `keys` whose timestamp lies within
    /// `window` of `as_of` (inclusive). The closest in time wins; on equal
    /// distance the most recently inserted entry wins.
    pub fn find_match(
        &self,
        keys: &[CacheKey],
        as_of: DateTime<Utc>,
        window: TimeDelta,
    ) -> Option<&CacheEntry> {
        self.find_match_id(keys, as_of, window)
            .and_then(|id| self.slots.get(&id))
            .map(|slot| &slot.entry)
    }

    /// Like [`find_match`](Self::find_match), but removes the entry (under
    /// all of its keys) so it cannot match again.
    pub fn take_match(
        &mut self,
        keys: &[CacheKey],
        as_of: DateTime<Utc>,
        window: TimeDelta,
    ) -> Option<CacheEntry> {
        let id = self.find_match_id(keys, as_of, window)?;
        self.remove(id)
    }

    fn find_match_id(&self, keys: &[CacheKey], as_of: DateTime<Utc>, window: TimeDelta) -> Option<u64> {
        keys.iter()
            .filter_map(|key| self.index.get(key).copied())
            .filter_map(|id| {
                let slot = self.slots.get(&id)?;
                let distance = time_distance(slot.entry.event.timestamp, as_of);
                (distance <= window).then_some((distance, id))
            })
            .min_by(|(da, ia), (db, ib)| da.cmp(db).then(ib.cmp(ia)))
            .map(|(_, id)| id)
    }

    /// Drop entries ingested longer than the configured age ago.
    pub fn evict_expired(&mut self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    fn evict_expired_at(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        while let Some(&oldest) = self.order.first() {
            let expired = self
                .slots
                .get(&oldest)
                .map_or(true, |slot| now.saturating_duration_since(slot.entry.ingested_at) >= self.max_age);
            if !expired {
                break;
            }
            self.remove(oldest);
            evicted += 1;
        }
        if evicted > 0 {
            debug!(evicted = evicted, remaining = self.slots.len(), "Evicted aged cache entries");
        }
        evicted
    }

    /// Unlink `key` from an entry; the entry goes away once no key reaches it.
    fn detach(&mut self, id: u64, key: &CacheKey) {
        let orphaned = match self.slots.get_mut(&id) {
            Some(slot) => {
                slot.keys.retain(|k| k != key);
                slot.keys.is_empty()
            }
            None => false,
        };
        if orphaned {
            self.remove(id);
        }
    }

    fn remove(&mut self, id: u64) -> Option<CacheEntry> {
        self.order.remove(&id);
        let slot = self.slots.remove(&id)?;
        for key in &slot.keys {
            if self.index.get(key) == Some(&id) {
                self.index.remove(key);
            }
        }
        Some(slot.entry)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
