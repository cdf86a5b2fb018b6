use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::QueryParams;
use crate::table::Table;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let step = ChronoDuration::from_std(by).unwrap_or_else(|_| ChronoDuration::zero());
        if let Ok(mut now) = self.now.lock() {
            *now += step;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|p| *p.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub query_id: String,
    pub params: String,
}

impl CacheKey {
    pub fn new(query_id: &str, params: &QueryParams) -> Self {
        Self {
            query_id: query_id.to_string(),
            params: params.serialized(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    table: Table,
    fetched_at: DateTime<Utc>,
}

/// Query results keyed by (query id, parameters), valid while younger
/// than the TTL.
pub struct QueryCache {
    entries: HashMap<CacheKey, CacheEntry>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_entries: usize,
}

impl QueryCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self::with_clock(ttl, max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            clock,
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Table> {
        self.get_within(key, self.ttl)
    }

    /// Lookup with a caller-supplied TTL. Expired entries are dropped.
    pub fn get_within(&mut self, key: &CacheKey, ttl: Duration) -> Option<Table> {
        let now = self.clock.now();
        let entry = self.entries.get(key)?;
        let age = now.signed_duration_since(entry.fetched_at);
        let fresh = age
            .to_std()
            .map(|age| age < ttl)
            // fetched_at in the future means the clock went backwards
            .unwrap_or(true);
        if fresh {
            Some(entry.table.clone())
        } else {
            self.entries.remove(key);
            None
        }
    }

    /// Store a result stamped with the current time. When full, the oldest
    /// entry is evicted.
    pub fn put(&mut self, key: CacheKey, table: Table) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        let fetched_at = self.clock.now();
        self.entries.insert(key, CacheEntry { table, fetched_at });
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.fetched_at)
            .map(|(k, _)| k.clone());
        if let Some(k) = oldest {
            self.entries.remove(&k);
        }
    }
}
