//! TTL cache for information-system queries.
//!
//! Batch schedulers answer status queries slowly and rate-limit chatty
//! clients, so backends put a [`QueryCache`] in front of every query
//! against the information system. Within the TTL a repeated query is
//! answered from memory; concurrent callers asking for the same key while
//! a refresh is in flight wait for that one refresh instead of stacking
//! identical commands on the scheduler.
//!
//! Only successful refreshes are stored. A failed refresh leaves the slot
//! empty (or stale), so the next caller tries again immediately.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

struct Slot<V> {
    value: Option<(V, Instant)>,
}

impl<V> Slot<V> {
    fn fresh(&self, ttl: std::time::Duration) -> Option<&V> {
        match &self.value {
            Some((value, stored_at)) if stored_at.elapsed() < ttl => Some(value),
            _ => None,
        }
    }
}

/// Per-key memoization of fallible async lookups, with a shared TTL.
///
/// One instance lives inside each backend; distinct backends never share
/// observations. Per-key refreshes are single-flight: the slot's mutex is
/// held across the refresh future, so late arrivals block on the lock and
/// then read the value the first caller stored.
pub struct QueryCache<K, V> {
    ttl: std::time::Duration,
    slots: Mutex<FxHashMap<K, Arc<Mutex<Slot<V>>>>>,
}

impl<K, V> QueryCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Default time-to-live for cached observations.
    pub const DEFAULT_TTL: std::time::Duration = std::time::Duration::from_secs(30);

    /// Cache with the default TTL.
    pub fn new() -> Self {
        Self::with_ttl(Self::DEFAULT_TTL)
    }

    /// Cache with an explicit TTL. A zero TTL disables reuse but keeps
    /// the single-flight behavior.
    pub fn with_ttl(ttl: std::time::Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(FxHashMap::default()),
        }
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> std::time::Duration {
        self.ttl
    }

    /// Return the cached value for `key`, refreshing it when missing or
    /// expired.
    ///
    /// `refresh` runs at most once per expiry however many callers pile
    /// up on the key. Its error is returned to the caller that ran it and
    /// nothing is stored, so the next call retries.
    pub async fn get_or_refresh<F, Fut, E>(&self, key: K, refresh: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = {
            let mut slots = self.slots.lock().await;
            self.purge_expired(&mut slots);
            Arc::clone(slots.entry(key).or_insert_with(|| {
                Arc::new(Mutex::new(Slot { value: None }))
            }))
        };

        // Held across the refresh: concurrent callers for this key queue
        // here and find the value already stored when they get the lock.
        let mut slot = slot.lock().await;
        if let Some(value) = slot.fresh(self.ttl) {
            return Ok(value.clone());
        }
        let value = refresh().await?;
        slot.value = Some((value.clone(), Instant::now()));
        Ok(value)
    }

    /// Drop the cached value for `key`, forcing the next call to refresh.
    pub async fn invalidate(&self, key: &K) {
        self.slots.lock().await.remove(key);
    }

    /// Drop every cached value.
    pub async fn clear(&self) {
        self.slots.lock().await.clear();
    }

    /// Drop expired slots nobody is currently waiting on. Runs under the
    /// map lock on each lookup, keeping the map from growing with dead
    /// keys (one per finished job, over time).
    fn purge_expired(&self, slots: &mut FxHashMap<K, Arc<Mutex<Slot<V>>>>) {
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(guard) => guard.fresh(self.ttl).is_some(),
                Err(_) => true,
            }
        });
    }
}

impl<K, V> Default for QueryCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
