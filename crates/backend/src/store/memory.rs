//! In-process store used for development and tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{EphemeralStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn new(value: &str, ttl: Duration) -> Self {
        Entry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Writes between full sweeps of expired entries.
const SWEEP_EVERY: u64 = 256;

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
    writes: u64,
}

impl Entries {
    /// Count a write and drop everything expired once every [`SWEEP_EVERY`]
    /// writes. Keys that are read again are evicted on access regardless.
    fn note_write(&mut self, now: Instant) {
        self.writes = self.writes.wrapping_add(1);
        if self.writes % SWEEP_EVERY == 0 {
            self.map.retain(|_, e| e.is_live(now));
        }
    }
}

/// Mutex-protected map. Expired entries are evicted when touched and in
/// periodic sweeps on the write path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> T,
    ) -> StoreResult<T> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        Ok(f(&mut entries.map, now))
    }

    fn write_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> T,
    ) -> StoreResult<T> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        entries.note_write(now);
        Ok(f(&mut entries.map, now))
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Entries>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    /// Number of entries that have not yet expired.
    #[cfg(test)]
    pub fn live_len(&self) -> usize {
        self.with_entries(|entries, now| entries.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }
}

fn live<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.write_entries(|entries, _| {
            entries.insert(key.to_string(), Entry::new(value, ttl));
        })
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_entries(|entries, now| live(entries, key, now).map(|e| e.value.clone()))
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.with_entries(|entries, now| {
            live(entries, key, now).map(|e| e.expires_at.saturating_duration_since(now))
        })
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.with_entries(|entries, now| {
            let existed = live(entries, key, now).is_some();
            entries.remove(key);
            existed
        })
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_entries(|entries, now| {
            live(entries, key, now)?;
            entries.remove(key).map(|e| e.value)
        })
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.with_entries(|entries, now| {
            let matches = live(entries, key, now).is_some_and(|e| e.value == expected);
            if matches {
                entries.remove(key);
            }
            matches
        })
    }

    async fn replace_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.write_entries(|entries, now| match live(entries, key, now) {
            Some(entry) => {
                *entry = Entry::new(value, ttl);
                true
            }
            None => false,
        })
    }

    async fn rotate(
        &self,
        old_key: &str,
        expected: &str,
        new_key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.write_entries(|entries, now| {
            let matches = live(entries, old_key, now).is_some_and(|e| e.value == expected);
            if !matches {
                return false;
            }
            entries.remove(old_key);
            entries.insert(new_key.to_string(), Entry::new(value, ttl));
            true
        })
    }
}
