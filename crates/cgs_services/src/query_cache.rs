//! Read-query cache fronting the database proxy.
//!
//! Caches SELECT results keyed by normalized SQL (lowercased, whitespace
//! collapsed) with LRU eviction and a TTL. Writes invalidate by table:
//! each cached entry declares the tables it read, and
//! [`QueryCache::invalidate_by_table`] drops every entry touching one.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct QueryCacheConfig {
    /// Maximum cached entries before LRU eviction.
    pub capacity: usize,
    /// Entries older than this are treated as misses.
    pub ttl: Duration,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl: Duration::from_secs(30),
        }
    }
}

/// A materialized result set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Hit/miss counters for the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit; 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

struct Entry {
    result: Arc<QueryResult>,
    inserted_at: Instant,
    tables: Vec<String>,
}

struct Inner {
    entries: HashMap<String, Entry>,
    // Front is least recently used.
    lru: VecDeque<String>,
    stats: CacheStats,
}

/// LRU + TTL cache of SELECT results.
pub struct QueryCache {
    config: QueryCacheConfig,
    inner: Mutex<Inner>,
}

impl QueryCache {
    pub fn new(config: QueryCacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                lru: VecDeque::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Lowercases and collapses whitespace so formatting variants of the
    /// same query share an entry.
    pub fn normalize(sql: &str) -> String {
        sql.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .trim_end_matches(';')
            .to_lowercase()
    }

    /// Only SELECT statements are cacheable.
    pub fn is_cacheable(sql: &str) -> bool {
        Self::normalize(sql).starts_with("select")
    }

    /// Looks up a query, counting a hit or miss.
    pub fn get(&self, sql: &str) -> Option<Arc<QueryResult>> {
        let key = Self::normalize(sql);
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(&key) {
            None => {
                inner.stats.misses += 1;
                return None;
            }
            Some(entry) => entry.inserted_at.elapsed() >= self.config.ttl,
        };
        if expired {
            inner.entries.remove(&key);
            inner.lru.retain(|k| k != &key);
            inner.stats.misses += 1;
            return None;
        }

        inner.lru.retain(|k| k != &key);
        inner.lru.push_back(key.clone());
        inner.stats.hits += 1;
        inner.entries.get(&key).map(|e| e.result.clone())
    }

    /// Caches a result with the tables it read. Returns false (and caches
    /// nothing) for non-SELECT statements.
    pub fn put(&self, sql: &str, result: QueryResult, tables: &[&str]) -> bool {
        if !Self::is_cacheable(sql) {
            return false;
        }
        let key = Self::normalize(sql);
        let mut inner = self.inner.lock();

        inner.lru.retain(|k| k != &key);
        inner.lru.push_back(key.clone());
        inner.entries.insert(
            key,
            Entry {
                result: Arc::new(result),
                inserted_at: Instant::now(),
                tables: tables.iter().map(|t| t.to_lowercase()).collect(),
            },
        );

        while inner.entries.len() > self.config.capacity {
            if let Some(evicted) = inner.lru.pop_front() {
                inner.entries.remove(&evicted);
            } else {
                break;
            }
        }
        true
    }

    /// Drops a single cached query, if present.
    pub fn invalidate(&self, sql: &str) -> bool {
        let key = Self::normalize(sql);
        let mut inner = self.inner.lock();
        if inner.entries.remove(&key).is_some() {
            inner.lru.retain(|k| k != &key);
            return true;
        }
        false
    }

    /// Drops every entry that read from `table`. Returns how many were
    /// dropped. Called on any write to that table.
    pub fn invalidate_by_table(&self, table: &str) -> usize {
        let table = table.to_lowercase();
        let mut inner = self.inner.lock();
        let doomed: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.tables.contains(&table))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            inner.entries.remove(key);
            inner.lru.retain(|k| k != key);
        }
        doomed.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.lru.clear();
    }
}
