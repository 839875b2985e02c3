//! Per-session batch and retry detection over a bounded, swept cache

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Time-stamped map with a hard entry cap
///
/// Entries older than `ttl_ms` are dropped by [`Self::sweep`]. When full, a
/// new key first triggers a sweep and then evicts the stalest entry.
#[derive(Debug)]
pub struct BoundedCache<V> {
    entries: Mutex<HashMap<String, Slot<V>>>,
    ttl_ms: i64,
    max_entries: usize,
}

#[derive(Debug)]
struct Slot<V> {
    value: V,
    touched_at: i64,
}

impl<V: Clone> BoundedCache<V> {
    /// Create a cache
    #[must_use]
    pub fn new(ttl_ms: i64, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_ms,
            max_entries: max_entries.max(1),
        }
    }

    /// Replace the value under `key` with `update(previous)` and stamp it at `now`
    ///
    /// `update` receives the previous value and its last touch time.
    pub fn touch(&self, key: &str, now: i64, update: impl FnOnce(Option<(&V, i64)>) -> V) -> V {
        let mut entries = self.entries.lock();

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            Self::sweep_locked(&mut entries, now, self.ttl_ms);
            if entries.len() >= self.max_entries
                && let Some(stalest) = entries
                    .iter()
                    .min_by_key(|(_, slot)| slot.touched_at)
                    .map(|(k, _)| k.clone())
            {
                entries.remove(&stalest);
            }
        }

        let previous = entries.get(key).map(|slot| (&slot.value, slot.touched_at));
        let touched_at = previous.map_or(now, |(_, last)| last.max(now));
        let value = update(previous);
        entries.insert(
            key.to_string(),
            Slot {
                value: value.clone(),
                touched_at,
            },
        );
        value
    }

    /// Drop entries not touched within the TTL; returns how many were removed
    pub fn sweep(&self, now: i64) -> usize {
        Self::sweep_locked(&mut self.entries.lock(), now, self.ttl_ms)
    }

    fn sweep_locked(entries: &mut HashMap<String, Slot<V>>, now: i64, ttl_ms: i64) -> usize {
        let before = entries.len();
        entries.retain(|_, slot| now.saturating_sub(slot.touched_at) <= ttl_ms);
        before - entries.len()
    }

    /// Current entry count
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// How a call relates to its neighbours in the same session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "executionMode", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Isolated call
    Sequential,
    /// Part of a burst of calls within the coalescing window
    Parallel {
        /// Shared id of the burst
        #[serde(rename = "batchId")]
        batch_id: String,
        /// Calls seen in the burst so far, including this one
        #[serde(rename = "batchSize")]
        batch_size: u32,
    },
}

#[derive(Debug, Clone)]
struct BatchState {
    batch_id: String,
    size: u32,
}

/// Tags calls arriving within the coalescing window as one parallel batch
#[derive(Debug)]
pub struct ExecutionModeDetector {
    cache: BoundedCache<BatchState>,
    window_ms: i64,
}

impl ExecutionModeDetector {
    /// Create a detector
    #[must_use]
    pub fn new(window_ms: i64, max_entries: usize) -> Self {
        Self {
            cache: BoundedCache::new(window_ms, max_entries),
            window_ms,
        }
    }

    /// Classify a call from `session_hash` started at `ts`
    pub fn detect(&self, session_hash: &str, ts: i64) -> ExecutionMode {
        let state = self.cache.touch(session_hash, ts, |previous| match previous {
            Some((state, last)) if ts.saturating_sub(last) <= self.window_ms => BatchState {
                batch_id: state.batch_id.clone(),
                size: state.size.saturating_add(1),
            },
            _ => BatchState {
                batch_id: uuid::Uuid::new_v4().to_string(),
                size: 1,
            },
        });
        if state.size > 1 {
            ExecutionMode::Parallel {
                batch_id: state.batch_id,
                batch_size: state.size,
            }
        } else {
            ExecutionMode::Sequential
        }
    }

    /// Drop expired session state
    pub fn sweep(&self, now: i64) -> usize {
        self.cache.sweep(now)
    }

    /// Tracked sessions
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.cache.len()
    }
}

/// Retry classification of one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryInfo {
    /// Same (session, tool) seen within the retry window
    pub is_retry: bool,
    /// Retries in the current chain
    pub retry_count: u32,
    /// Consecutive failures in the current chain
    pub loop_count: u32,
}

/// Flags repeated (session, tool) calls within the retry window
#[derive(Debug)]
pub struct RetryDetector {
    cache: BoundedCache<RetryInfo>,
    window_ms: i64,
}

impl RetryDetector {
    /// Create a detector
    #[must_use]
    pub fn new(window_ms: i64, max_entries: usize) -> Self {
        Self {
            cache: BoundedCache::new(window_ms, max_entries),
            window_ms,
        }
    }

    /// Record a call outcome and classify it
    pub fn detect(&self, session_hash: &str, tool_name: &str, failed: bool, ts: i64) -> RetryInfo {
        let key = format!("{session_hash}:{tool_name}");
        self.cache.touch(&key, ts, |previous| {
            let chain = previous
                .filter(|(_, last)| ts.saturating_sub(*last) <= self.window_ms)
                .map(|(info, _)| *info);
            let loop_count = match (failed, chain) {
                (false, _) => 0,
                (true, Some(prev)) => prev.loop_count.saturating_add(1),
                (true, None) => 1,
            };
            match chain {
                Some(prev) => RetryInfo {
                    is_retry: true,
                    retry_count: prev.retry_count.saturating_add(1),
                    loop_count,
                },
                None => RetryInfo {
                    is_retry: false,
                    retry_count: 0,
                    loop_count,
                },
            }
        })
    }

    /// Drop expired chains
    pub fn sweep(&self, now: i64) -> usize {
        self.cache.sweep(now)
    }

    /// Tracked (session, tool) pairs
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.cache.len()
    }
}
