//! Request coalescing for concurrent cache misses.
//!
//! The first miss for a key becomes the leader and registers a shared value
//! (the segment transfer). Later misses for the same key get a clone of that
//! value as a [`Flight::Follower`]. The entry is removed when the leader's
//! [`FlightGuard`] is dropped.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Registry of in-flight upstream fetches, keyed by upstream URL.
#[derive(Debug)]
pub struct InFlightRequests<T> {
    flights: DashMap<String, (u64, T)>,
    next_id: AtomicU64,
}

/// Outcome of [`InFlightRequests::join`].
#[derive(Debug)]
pub enum Flight<T> {
    /// This caller started the fetch. Dropping the guard unregisters it.
    Leader(FlightGuard<T>),
    /// Another caller is already fetching this key.
    Follower(T),
}

impl<T> Default for InFlightRequests<T> {
    fn default() -> Self {
        Self {
            flights: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T: Clone> InFlightRequests<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`. If none is running, `start` creates the
    /// value shared with later followers and the caller becomes leader.
    pub fn join<F>(self: &Arc<Self>, key: &str, start: F) -> Flight<T>
    where
        F: FnOnce() -> T,
    {
        match self.flights.entry(key.to_string()) {
            Entry::Occupied(existing) => Flight::Follower(existing.get().1.clone()),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let value = start();
                slot.insert((id, value.clone()));
                Flight::Leader(FlightGuard {
                    key: key.to_string(),
                    id,
                    value,
                    registry: Arc::clone(self),
                })
            }
        }
    }
}

impl<T> InFlightRequests<T> {
    /// Number of keys currently being fetched.
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}

/// Held by the leader for the lifetime of its upstream fetch.
#[derive(Debug)]
pub struct FlightGuard<T> {
    key: String,
    id: u64,
    value: T,
    registry: Arc<InFlightRequests<T>>,
}

impl<T> FlightGuard<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value registered for this flight.
    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        let id = self.id;
        self.registry
            .flights
            .remove_if(&self.key, |_, (flight_id, _)| *flight_id == id);
    }
}
