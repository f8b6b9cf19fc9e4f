//! # Closed-Id Cache
//!
//! Remembers correlation ids whose stream already reached a terminal state,
//! so that a straggling envelope for one of them is recognised as *late*
//! (dropped quietly) rather than *unknown* (dropped with a warning).
//!
//! ## Bounds
//!
//! - Entries expire after the retention window (default: 60s)
//! - Garbage collection runs at most once per GC interval (default: 10s)
//! - A hard capacity evicts the oldest entry when exceeded
//!
//! Closing order is kept in a queue next to the map, so eviction and
//! expiry only touch the entries they remove.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use relay_types::CorrelationId;
use tokio::time::Instant;

/// Time-bounded set of closed correlation ids.
#[derive(Debug)]
pub struct ClosedStreamCache {
    /// Map of id -> instant the stream closed.
    cache: HashMap<CorrelationId, Instant>,

    /// Ids in closing order. An entry whose instant no longer matches the
    /// map was superseded by a later insert of the same id.
    order: VecDeque<(CorrelationId, Instant)>,

    retention: Duration,

    last_gc: Instant,

    gc_interval: Duration,

    capacity: usize,
}

impl ClosedStreamCache {
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60);
    pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(10);
    pub const DEFAULT_CAPACITY: usize = 4096;

    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Self::DEFAULT_RETENTION, Self::DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_config(retention: Duration, capacity: usize) -> Self {
        Self {
            cache: HashMap::new(),
            order: VecDeque::new(),
            retention,
            last_gc: Instant::now(),
            gc_interval: Self::DEFAULT_GC_INTERVAL.min(retention),
            capacity: capacity.max(1),
        }
    }

    /// Record that `id` reached a terminal state.
    pub fn insert(&mut self, id: CorrelationId) {
        let now = Instant::now();

        if now.saturating_duration_since(self.last_gc) >= self.gc_interval {
            self.garbage_collect(now);
            self.last_gc = now;
        }

        if self.cache.len() >= self.capacity && !self.cache.contains_key(&id) {
            self.evict_oldest();
        }

        self.cache.insert(id.clone(), now);
        self.order.push_back((id, now));

        if self.order.len() > self.capacity.saturating_mul(2) {
            self.compact();
        }
    }

    /// Whether `id` closed within the retention window.
    #[must_use]
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.cache
            .get(id)
            .is_some_and(|closed_at| closed_at.elapsed() < self.retention)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn garbage_collect(&mut self, now: Instant) {
        while let Some((_, closed_at)) = self.order.front() {
            if now.saturating_duration_since(*closed_at) < self.retention {
                break;
            }
            if let Some((id, closed_at)) = self.order.pop_front() {
                self.remove_if_current(&id, closed_at);
            }
        }
    }

    fn evict_oldest(&mut self) {
        while let Some((id, closed_at)) = self.order.pop_front() {
            if self.remove_if_current(&id, closed_at) {
                return;
            }
        }
    }

    /// Drop superseded queue entries.
    fn compact(&mut self) {
        let cache = &self.cache;
        self.order
            .retain(|(id, closed_at)| cache.get(id) == Some(closed_at));
    }

    fn remove_if_current(&mut self, id: &CorrelationId, closed_at: Instant) -> bool {
        if self.cache.get(id) == Some(&closed_at) {
            self.cache.remove(id);
            true
        } else {
            false
        }
    }
}

impl Default for ClosedStreamCache {
    fn default() -> Self {
        Self::new()
    }
}
