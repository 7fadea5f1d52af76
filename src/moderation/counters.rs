//! Volatile per-key counters
//!
//! Sliding windows (spam, raid) and warning states live behind small traits
//! so the engine can run against the in-memory implementations here or any
//! other backing store. Every read-modify-write on a single key happens while
//! holding that key's map entry, with no suspension point in between.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Key for a sliding window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKey {
    /// Messages from one user in one guild
    Spam { guild_id: u64, user_id: u64 },
    /// Joins into one guild
    Raid { guild_id: u64 },
}

/// Store of timestamp windows used for rate detection
#[cfg_attr(test, mockall::automock)]
pub trait WindowStore: Send + Sync {
    /// Record an event at `now`, drop entries older than `window` and
    /// return how many events remain
    fn hit(&self, key: WindowKey, now: DateTime<Utc>, window: Duration) -> usize;

    /// Forget every event for `key`
    fn clear(&self, key: WindowKey);

    /// Drop windows with no event newer than `max_age`, returning how many were removed
    fn prune(&self, now: DateTime<Utc>, max_age: Duration) -> usize;
}

/// Running warning count for one user in one guild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningState {
    pub count: u64,
    pub last_reset: DateTime<Utc>,
}

impl WarningState {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            last_reset: now,
        }
    }
}

/// Store of warning states keyed by `(guild_id, user_id)`
pub trait WarningStore: Send + Sync {
    /// Atomically update the state for a key, creating it at `now` if absent
    fn modify(
        &self,
        key: (u64, u64),
        now: DateTime<Utc>,
        update: &mut dyn FnMut(&mut WarningState),
    ) -> WarningState;

    fn get(&self, key: (u64, u64)) -> Option<WarningState>;

    /// Remove the state for a key, returning whether one existed
    fn reset(&self, key: (u64, u64)) -> bool;

    /// Drop states whose last reset is older than `max_age`
    fn prune(&self, now: DateTime<Utc>, max_age: Duration) -> usize;
}

/// In-memory window store
#[derive(Clone, Default)]
pub struct MemoryWindowStore {
    windows: Arc<DashMap<WindowKey, VecDeque<DateTime<Utc>>>>,
}

impl MemoryWindowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for MemoryWindowStore {
    fn hit(&self, key: WindowKey, now: DateTime<Utc>, window: Duration) -> usize {
        let mut entry = self.windows.entry(key).or_default();
        let cutoff = now - window;
        while entry.front().is_some_and(|ts| *ts <= cutoff) {
            entry.pop_front();
        }
        entry.push_back(now);
        entry.len()
    }

    fn clear(&self, key: WindowKey) {
        self.windows.remove(&key);
    }

    fn prune(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let before = self.windows.len();
        let cutoff = now - max_age;
        self.windows
            .retain(|_, timestamps| timestamps.back().is_some_and(|latest| *latest > cutoff));
        before.saturating_sub(self.windows.len())
    }
}

/// In-memory warning store
#[derive(Clone, Default)]
pub struct MemoryWarningStore {
    states: Arc<DashMap<(u64, u64), WarningState>>,
}

impl MemoryWarningStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WarningStore for MemoryWarningStore {
    fn modify(
        &self,
        key: (u64, u64),
        now: DateTime<Utc>,
        update: &mut dyn FnMut(&mut WarningState),
    ) -> WarningState {
        let mut entry = self
            .states
            .entry(key)
            .or_insert_with(|| WarningState::new(now));
        update(&mut entry);
        *entry
    }

    fn get(&self, key: (u64, u64)) -> Option<WarningState> {
        self.states.get(&key).map(|entry| *entry.value())
    }

    fn reset(&self, key: (u64, u64)) -> bool {
        self.states.remove(&key).is_some()
    }

    fn prune(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let before = self.states.len();
        let cutoff = now - max_age;
        self.states.retain(|_, state| state.last_reset > cutoff);
        before.saturating_sub(self.states.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn test_window_prunes_old_entries() {
        let store = MemoryWindowStore::new();
        let key = WindowKey::Spam {
            guild_id: 1,
            user_id: 2,
        };
        let window = Duration::seconds(5);

        assert_eq!(store.hit(key, at(0), window), 1);
        assert_eq!(store.hit(key, at(2), window), 2);
        assert_eq!(store.hit(key, at(4), window), 3);
        // at(0) is exactly five seconds old and falls out
        assert_eq!(store.hit(key, at(5), window), 3);
        assert_eq!(store.hit(key, at(20), window), 1);
    }

    #[test]
    fn test_window_keys_are_independent() {
        let store = MemoryWindowStore::new();
        let window = Duration::seconds(10);
        let spam = WindowKey::Spam {
            guild_id: 1,
            user_id: 2,
        };
        let raid = WindowKey::Raid { guild_id: 1 };

        store.hit(spam, at(0), window);
        store.hit(spam, at(1), window);
        assert_eq!(store.hit(raid, at(1), window), 1);

        store.clear(spam);
        assert_eq!(store.hit(spam, at(2), window), 1);
    }

    #[test]
    fn test_window_prune_removes_idle_keys() {
        let store = MemoryWindowStore::new();
        let window = Duration::seconds(10);
        store.hit(WindowKey::Raid { guild_id: 1 }, at(0), window);
        store.hit(WindowKey::Raid { guild_id: 2 }, at(100), window);

        assert_eq!(store.prune(at(105), Duration::seconds(60)), 1);
        assert_eq!(store.windows.len(), 1);
    }

    #[test]
    fn test_warning_store_modify_and_reset() {
        let store = MemoryWarningStore::new();
        let key = (1, 2);

        let state = store.modify(key, at(0), &mut |state| state.count += 1);
        assert_eq!(state.count, 1);
        assert_eq!(state.last_reset, at(0));

        let state = store.modify(key, at(10), &mut |state| state.count += 1);
        assert_eq!(state.count, 2);
        assert_eq!(state.last_reset, at(0));
        assert_eq!(store.get(key), Some(state));

        assert!(store.reset(key));
        assert!(!store.reset(key));
        assert!(store.get(key).is_none());
    }

    #[test]
    fn test_warning_store_prune() {
        let store = MemoryWarningStore::new();
        store.modify((1, 1), at(0), &mut |state| state.count += 1);
        store.modify((1, 2), at(500), &mut |state| state.count += 1);

        assert_eq!(store.prune(at(600), Duration::seconds(300)), 1);
        assert!(store.get((1, 1)).is_none());
        assert!(store.get((1, 2)).is_some());
    }
}
