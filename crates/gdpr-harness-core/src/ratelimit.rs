//! Sliding-window rate limiting keyed by caller.
//!
//! A [`RateLimiter`] admits at most `limit` events per `window` for each
//! key. The bookkeeping lives behind [`RateLimitBackend`] so a shared
//! backend can replace the in-process one.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::clock::Clock;
use crate::error::{Error, Result};

pub const DEFAULT_MAX_KEYS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { remaining: u32 },
    /// Rejected; the oldest event in the window leaves after `retry_after`.
    Limited { retry_after: Duration },
}

pub trait RateLimitBackend: Send + Sync {
    /// Record an event for `key` at `now` if fewer than `limit` events
    /// fall inside `(now - window, now]`.
    fn acquire(&self, key: &str, now: DateTime<Utc>, window: Duration, limit: u32) -> Admission;
}

/// Per-process backend. Tracks at most `max_keys` keys; when full, the key
/// seen least recently is evicted.
pub struct InMemoryRateLimitBackend {
    max_keys: usize,
    state: Mutex<Buckets>,
}

#[derive(Default)]
struct Buckets {
    by_key: HashMap<String, Bucket>,
    /// Touch sequence → key, oldest first.
    recency: BTreeMap<u64, String>,
    seq: u64,
}

struct Bucket {
    hits: VecDeque<DateTime<Utc>>,
    seq: u64,
}

impl Buckets {
    /// Mark `key` as just seen, evicting the stalest key if a new one
    /// would exceed `max_keys`.
    fn touch(&mut self, key: &str, max_keys: usize) -> &mut Bucket {
        self.seq += 1;
        let seq = self.seq;

        if let Some(bucket) = self.by_key.get(key) {
            self.recency.remove(&bucket.seq);
        } else if self.by_key.len() >= max_keys {
            if let Some((_, stale)) = self.recency.pop_first() {
                self.by_key.remove(&stale);
            }
        }
        self.recency.insert(seq, key.to_string());

        let bucket = self.by_key.entry(key.to_string()).or_insert_with(|| Bucket {
            hits: VecDeque::new(),
            seq,
        });
        bucket.seq = seq;
        bucket
    }
}

impl InMemoryRateLimitBackend {
    pub fn new(max_keys: usize) -> Self {
        Self {
            max_keys: max_keys.max(1),
            state: Mutex::new(Buckets::default()),
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).by_key.len()
    }
}

impl Default for InMemoryRateLimitBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_KEYS)
    }
}

impl RateLimitBackend for InMemoryRateLimitBackend {
    fn acquire(&self, key: &str, now: DateTime<Utc>, window: Duration, limit: u32) -> Admission {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = state.touch(key, self.max_keys);

        let floor = now - window;
        while bucket.hits.front().is_some_and(|t| *t <= floor) {
            bucket.hits.pop_front();
        }

        if bucket.hits.len() as u32 >= limit {
            let retry_after = bucket
                .hits
                .front()
                .map(|t| *t + window - now)
                .unwrap_or(window);
            return Admission::Limited { retry_after };
        }
        bucket.hits.push_back(now);
        Admission::Allowed {
            remaining: limit - bucket.hits.len() as u32,
        }
    }
}

/// One limit (e.g. "20 searches per minute") applied per key.
#[derive(Clone)]
pub struct RateLimiter {
    scope: &'static str,
    limit: u32,
    window: Duration,
    backend: Arc<dyn RateLimitBackend>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(
        scope: &'static str,
        limit: u32,
        window: Duration,
        backend: Arc<dyn RateLimitBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scope,
            limit,
            window,
            backend,
            clock,
        }
    }

    pub fn scope(&self) -> &'static str {
        self.scope
    }

    /// Admit one event for `key`, or fail with [`Error::RateLimited`].
    pub fn check(&self, key: &str) -> Result<()> {
        let scoped = format!("{}:{}", self.scope, key);
        match self
            .backend
            .acquire(&scoped, self.clock.now(), self.window, self.limit)
        {
            Admission::Allowed { .. } => Ok(()),
            Admission::Limited { retry_after } => {
                warn!(scope = self.scope, key, "rate limit exceeded");
                Err(Error::RateLimited {
                    retry_after: retry_after.to_std().unwrap_or_default(),
                })
            }
        }
    }
}
