//! In-memory segment cache.
//!
//! Maps upstream segment URLs to their fetched payload for a fixed TTL.
//! Freshness is checked on every lookup; in addition each insert can schedule
//! a one-shot removal task, and [`start_sweep_task`] can prune stale entries
//! periodically. There is no capacity bound: memory grows with the number of
//! distinct segments fetched within one TTL window.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// A cached upstream response. Immutable once stored.
#[derive(Debug)]
pub struct CacheEntry {
    pub url: String,
    pub payload: Bytes,
    pub content_type: String,
    pub stored_at: Instant,
}

impl CacheEntry {
    /// Age of the entry at `now`; zero if `now` precedes `stored_at`.
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }

    pub fn is_fresh_at(&self, now: Instant, ttl: Duration) -> bool {
        self.age_at(now) < ttl
    }
}

struct Slot {
    entry: Arc<CacheEntry>,
    /// Distinguishes this insert from later overwrites of the same key.
    generation: u64,
    expiry: Option<AbortHandle>,
}

impl Slot {
    fn cancel_expiry(&mut self) {
        if let Some(handle) = self.expiry.take() {
            handle.abort();
        }
    }
}

/// Thread-safe, TTL-bounded cache of segment payloads keyed by upstream URL.
pub struct SegmentCache {
    entries: Arc<DashMap<String, Slot>>,
    ttl: Duration,
    eager_expiry: bool,
    next_generation: AtomicU64,
}

impl SegmentCache {
    /// Create a new segment cache with lazy expiry only.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            eager_expiry: false,
            next_generation: AtomicU64::new(0),
        }
    }

    /// Schedule a removal task for every inserted entry.
    ///
    /// Tasks are only spawned when a Tokio runtime is available.
    pub fn with_eager_expiry(mut self, enabled: bool) -> Self {
        self.eager_expiry = enabled;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a fresh entry.
    pub fn lookup(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.lookup_at(key, Instant::now())
    }

    /// Look up an entry as of `now`. A stale entry is removed and reported as a miss.
    pub fn lookup_at(&self, key: &str, now: Instant) -> Option<Arc<CacheEntry>> {
        let slot = self.entries.get(key)?;
        if slot.entry.is_fresh_at(now, self.ttl) {
            return Some(Arc::clone(&slot.entry));
        }

        let generation = slot.generation;
        // Release the shard read lock before taking the write lock.
        drop(slot);
        self.remove_generation(key, generation);
        None
    }

    /// Store a payload fetched now, replacing any previous entry.
    pub fn insert(&self, key: &str, payload: Bytes, content_type: &str) -> Arc<CacheEntry> {
        self.insert_at(key, payload, content_type, Instant::now())
    }

    /// Store a payload with an explicit timestamp, replacing any previous entry.
    pub fn insert_at(
        &self,
        key: &str,
        payload: Bytes,
        content_type: &str,
        stored_at: Instant,
    ) -> Arc<CacheEntry> {
        let entry = Arc::new(CacheEntry {
            url: key.to_string(),
            payload,
            content_type: content_type.to_string(),
            stored_at,
        });
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let previous = self.entries.insert(
            key.to_string(),
            Slot {
                entry: Arc::clone(&entry),
                generation,
                expiry: None,
            },
        );
        if let Some(mut previous) = previous {
            previous.cancel_expiry();
        }

        if self.eager_expiry {
            self.schedule_expiry(key, generation, stored_at + self.ttl);
        }

        entry
    }

    fn schedule_expiry(&self, key: &str, generation: u64, deadline: Instant) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let entries: Weak<DashMap<String, Slot>> = Arc::downgrade(&self.entries);
        let task_key = key.to_string();
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(entries) = entries.upgrade() else {
                return;
            };
            if entries
                .remove_if(&task_key, |_, slot| slot.generation == generation)
                .is_some()
            {
                tracing::trace!(url = %task_key, "Cache entry expired");
            }
        });

        // The key may already have been overwritten or removed by another caller.
        match self.entries.get_mut(key) {
            Some(mut slot) if slot.generation == generation => {
                slot.expiry = Some(task.abort_handle());
            }
            _ => task.abort(),
        }
    }

    fn remove_generation(&self, key: &str, generation: u64) {
        if let Some((_, mut slot)) = self
            .entries
            .remove_if(key, |_, slot| slot.generation == generation)
        {
            slot.cancel_expiry();
        }
    }

    /// Remove an entry from the cache.
    pub fn remove(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.entries.remove(key).map(|(_, mut slot)| {
            slot.cancel_expiry();
            slot.entry
        })
    }

    /// Check whether a key is present, fresh or not.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Get the number of stored entries, including stale ones not yet removed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| {
            if slot.entry.is_fresh_at(now, self.ttl) {
                true
            } else {
                slot.cancel_expiry();
                false
            }
        });
        before.saturating_sub(self.entries.len())
    }

    /// Abort all expiry tasks and drop every entry.
    pub fn shutdown(&self) {
        self.entries.retain(|_, slot| {
            slot.cancel_expiry();
            false
        });
    }
}

impl Drop for SegmentCache {
    fn drop(&mut self) {
        for mut slot in self.entries.iter_mut() {
            slot.cancel_expiry();
        }
    }
}

impl std::fmt::Debug for SegmentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("eager_expiry", &self.eager_expiry)
            .finish()
    }
}

/// Start a background task that periodically drops stale entries.
///
/// The task exits once the cache itself has been dropped.
pub fn start_sweep_task(cache: &Arc<SegmentCache>, interval: Duration) -> tokio::task::JoinHandle<()> {
    let cache = Arc::downgrade(cache);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let Some(cache) = cache.upgrade() else {
                break;
            };
            let removed = cache.sweep_expired();
            if removed > 0 {
                tracing::debug!(removed, remaining = cache.len(), "Swept stale segments");
            }
        }
    })
}
