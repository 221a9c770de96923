//! Adaptive result cache
//!
//! Fingerprint-keyed memoization with hybrid eviction: age, access
//! frequency, recency and priority are blended into a single eviction
//! score. Capacity self-tunes from the observed hit rate.

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const ACCESS_HISTORY_CAP: usize = 10_000;
const TUNE_WINDOW: usize = 1_000;
const TTL_EXTENSION_FACTOR: f64 = 1.2;
const TTL_EXTENSION_CAP: f64 = 3.0;
const GROW_FACTOR: f64 = 1.2;
const SHRINK_FACTOR: f64 = 0.9;
const MAX_CAPACITY: usize = 5_000;
const MIN_CAPACITY: usize = 100;

/// Deterministic cache key over an agent name and its enabled patterns.
///
/// Keyed on the name and pattern set only; a reconfigured agent under the
/// same name will hit stale entries until its TTL runs out.
pub fn fingerprint(agent_name: &str, patterns: &[String]) -> String {
    let mut sorted: Vec<&str> = patterns.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let canonical = format!("{}|{}", agent_name, sorted.join(","));
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// One cached artifact plus the metadata eviction needs.
struct CacheEntry<V> {
    value: V,
    size_bytes: usize,
    access_count: u64,
    created_at: Instant,
    last_accessed: Instant,
    ttl: Duration,
    priority: u32,
    /// Insertion sequence; breaks eviction-score ties.
    seq: u64,
}

/// Cache performance counters.
#[derive(Clone, Debug, Serialize)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
    pub eviction_count: u64,
    pub entries: usize,
    pub max_size: usize,
    pub total_size_bytes: usize,
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    access_history: VecDeque<bool>,
    hit_count: u64,
    miss_count: u64,
    eviction_count: u64,
    max_size: usize,
    next_seq: u64,
    last_tune: Instant,
}

/// Thread-safe store with hybrid LRU/LFU/TTL eviction and auto-tuning.
pub struct AdaptiveCache<V> {
    inner: Mutex<CacheInner<V>>,
    default_ttl: Duration,
    tune_interval: Duration,
}

impl<V: Clone + Serialize> AdaptiveCache<V> {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        info!(
            "💾 [Cache] Initialized: capacity {}, ttl {:.0}s",
            max_size,
            default_ttl.as_secs_f64()
        );
        AdaptiveCache {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                access_history: VecDeque::new(),
                hit_count: 0,
                miss_count: 0,
                eviction_count: 0,
                max_size,
                next_seq: 0,
                last_tune: Instant::now(),
            }),
            default_ttl,
            tune_interval: Duration::from_secs(300),
        }
    }

    /// Looks a key up, expiring stale entries and rewarding hot ones.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let status = inner
            .entries
            .get(key)
            .map(|entry| now.duration_since(entry.created_at) > entry.ttl);
        match status {
            None => {
                Self::record_access(&mut inner, false);
                return None;
            }
            Some(true) => {
                inner.entries.remove(key);
                Self::record_access(&mut inner, false);
                return None;
            }
            Some(false) => {}
        }

        let default_ttl = self.default_ttl;
        let entry = inner
            .entries
            .get_mut(key)
            .expect("entry presence checked above");
        entry.access_count += 1;
        entry.last_accessed = now;
        // Hot entries earn a longer lease, up to 3x the default TTL.
        if entry.access_count > 10 {
            let extended = entry.ttl.as_secs_f64() * TTL_EXTENSION_FACTOR;
            let cap = default_ttl.as_secs_f64() * TTL_EXTENSION_CAP;
            entry.ttl = Duration::from_secs_f64(extended.min(cap));
        }
        let value = entry.value.clone();
        Self::record_access(&mut inner, true);
        Some(value)
    }

    /// Inserts a value, evicting one entry first if at capacity.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with(key, value, None, 1)
    }

    pub fn set_with(&self, key: impl Into<String>, value: V, ttl: Option<Duration>, priority: u32) {
        let key = key.into();
        let size_bytes = serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(0);
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if inner.entries.len() >= inner.max_size && !inner.entries.contains_key(&key) {
            Self::evict(&mut inner, 1);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                size_bytes,
                access_count: 1,
                created_at: now,
                last_accessed: now,
                ttl: ttl.unwrap_or(self.default_ttl),
                priority: priority.max(1),
                seq,
            },
        );

        if now.duration_since(inner.last_tune) > self.tune_interval {
            Self::tune(&mut inner);
            inner.last_tune = now;
        }
    }

    /// Drops entries past their TTL; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| now.duration_since(entry.created_at) <= entry.ttl);
        before - inner.entries.len()
    }

    /// Runs one auto-tune pass immediately.
    pub fn tune_now(&self) -> usize {
        let mut inner = self.inner.lock();
        Self::tune(&mut inner);
        inner.last_tune = Instant::now();
        inner.max_size
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let total = inner.hit_count + inner.miss_count;
        CacheStats {
            hit_count: inner.hit_count,
            miss_count: inner.miss_count,
            hit_rate: if total > 0 {
                inner.hit_count as f64 / total as f64
            } else {
                0.0
            },
            eviction_count: inner.eviction_count,
            entries: inner.entries.len(),
            max_size: inner.max_size,
            total_size_bytes: inner.entries.values().map(|e| e.size_bytes).sum(),
        }
    }

    fn record_access(inner: &mut CacheInner<V>, hit: bool) {
        if hit {
            inner.hit_count += 1;
        } else {
            inner.miss_count += 1;
        }
        if inner.access_history.len() >= ACCESS_HISTORY_CAP {
            inner.access_history.pop_front();
        }
        inner.access_history.push_back(hit);
    }

    /// Evicts the `count` highest-scoring entries.
    ///
    /// Score blends age, access frequency, recency and priority; ties go
    /// to the earliest insertion.
    fn evict(inner: &mut CacheInner<V>, count: usize) {
        if inner.entries.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut scored: Vec<(f64, u64, String)> = inner
            .entries
            .iter()
            .map(|(key, entry)| {
                let age_factor =
                    now.duration_since(entry.created_at).as_secs_f64() / entry.ttl.as_secs_f64().max(f64::EPSILON);
                let access_factor = 1.0 / (entry.access_count as f64 + 1.0);
                let recency_factor = now.duration_since(entry.last_accessed).as_secs_f64() / 3600.0;
                let priority_factor = 1.0 / entry.priority as f64;
                let score = age_factor * 0.3
                    + access_factor * 0.2
                    + recency_factor * 0.3
                    + priority_factor * 0.2;
                (score, entry.seq, key.clone())
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        for (_, _, key) in scored.into_iter().take(count) {
            inner.entries.remove(&key);
            inner.eviction_count += 1;
        }
    }

    /// Grows or shrinks capacity from the recent hit rate.
    fn tune(inner: &mut CacheInner<V>) {
        if inner.access_history.is_empty() {
            return;
        }
        let window: Vec<bool> = inner
            .access_history
            .iter()
            .rev()
            .take(TUNE_WINDOW)
            .copied()
            .collect();
        let hit_rate = window.iter().filter(|h| **h).count() as f64 / window.len() as f64;

        if hit_rate < 0.7 && inner.max_size < MAX_CAPACITY {
            inner.max_size = ((inner.max_size as f64 * GROW_FACTOR) as usize).min(MAX_CAPACITY);
            debug!("💾 [Cache] Grew capacity to {} (hit rate {:.2})", inner.max_size, hit_rate);
        } else if hit_rate > 0.95 && inner.max_size > MIN_CAPACITY {
            inner.max_size = ((inner.max_size as f64 * SHRINK_FACTOR) as usize).max(MIN_CAPACITY);
            let excess = inner.entries.len().saturating_sub(inner.max_size);
            if excess > 0 {
                Self::evict(inner, excess);
            }
            debug!("💾 [Cache] Shrank capacity to {} (hit rate {:.2})", inner.max_size, hit_rate);
        }
    }
}
