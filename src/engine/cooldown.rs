// src/engine/cooldown.rs
// Keyed last-fired ledgers backing the three cooldown scopes

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;

/// Maps a trigger key to the time it last fired. Entries are monotonically
/// updated and only removed by the per-symbol clear path; expiry is
/// evaluated on read.
#[derive(Debug)]
pub struct CooldownLedger<K: Eq + Hash> {
    window: Duration,
    last_fired: HashMap<K, DateTime<Utc>>,
}

impl<K: Eq + Hash> CooldownLedger<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: HashMap::new(),
        }
    }

    pub fn is_ready(&self, key: &K) -> bool {
        self.is_ready_at(key, Utc::now())
    }

    fn is_ready_at(&self, key: &K, now: DateTime<Utc>) -> bool {
        match self.last_fired.get(key) {
            None => true,
            Some(fired_at) => now - *fired_at >= self.window,
        }
    }

    pub fn record(&mut self, key: K) {
        self.last_fired.insert(key, Utc::now());
    }

    /// Total entries ever recorded and not yet cleared.
    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }

    /// Entries still inside their cooldown window.
    pub fn active_count(&self) -> usize {
        let now = Utc::now();
        self.last_fired
            .values()
            .filter(|fired_at| now - **fired_at < self.window)
            .count()
    }

    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&K) -> bool,
    {
        self.last_fired.retain(|key, _| keep(key));
    }

    /// Test hook: plant an entry `ago` in the past.
    #[cfg(test)]
    pub fn backdate(&mut self, key: K, ago: Duration) {
        self.last_fired.insert(key, Utc::now() - ago);
    }
}
