//! Sliding-window rate limiting delegated to an external store.
//!
//! The accept/reject decision is made atomically by the store (typically a
//! script evaluated by a key-value server); this module only computes the
//! window bounds and maps a denial to [`Error::RateLimited`].

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Arguments for one sliding-window evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowQuery {
    /// Requests at or before this instant (µs since the epoch) no longer count.
    pub window_start_us: i64,
    /// Maximum number of requests admitted per window.
    pub rate: u64,
    /// The current request's timestamp (µs since the epoch).
    pub now_us: i64,
    /// Window length, for expiring the key.
    pub window: Duration,
}

/// Store that atomically decides whether one more request fits in the window,
/// and records it if so.
#[async_trait]
pub trait SlidingWindowStore: Send + Sync + 'static {
    async fn eval(&self, key: &str, query: WindowQuery) -> Result<bool>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterOptions {
    /// When set, every request shares this key instead of its own.
    pub key: Option<String>,
    pub window: Duration,
    pub rate: u64,
}

impl Default for RateLimiterOptions {
    fn default() -> Self {
        Self {
            key: None,
            window: Duration::from_secs(1),
            rate: 100,
        }
    }
}

pub struct RateLimiter<S> {
    store: S,
    options: RateLimiterOptions,
}

impl<S: SlidingWindowStore> RateLimiter<S> {
    pub fn new(store: S, options: RateLimiterOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &RateLimiterOptions {
        &self.options
    }

    /// Whether a request for `key` (e.g. an HTTP path or RPC method) may proceed.
    pub async fn allow(&self, key: &str) -> Result<bool> {
        let key = self.options.key.as_deref().unwrap_or(key);
        let now_us = now_micros();
        let window_us = i64::try_from(self.options.window.as_micros()).unwrap_or(i64::MAX);
        let query = WindowQuery {
            window_start_us: now_us.saturating_sub(window_us),
            rate: self.options.rate,
            now_us,
            window: self.options.window,
        };

        self.store.eval(key, query).await
    }

    /// Like [`allow`](Self::allow), but a denial is an [`Error::RateLimited`].
    ///
    /// This is what a server middleware or interceptor calls before running
    /// the handler.
    pub async fn check(&self, key: &str) -> Result<()> {
        if self.allow(key).await? {
            Ok(())
        } else {
            tracing::debug!(key, rate = self.options.rate, "request rate limited");
            Err(Error::RateLimited)
        }
    }
}

/// HTTP status for a failed [`RateLimiter::check`]: 429 for a denial, 500 for
/// anything else.
pub fn http_status(err: &Error) -> u16 {
    match err {
        Error::RateLimited => 429,
        _ => 500,
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
}

/// Process-local store keeping a timestamp log per key.
#[derive(Default)]
pub struct InMemorySlidingWindow {
    logs: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl InMemorySlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlidingWindowStore for InMemorySlidingWindow {
    async fn eval(&self, key: &str, query: WindowQuery) -> Result<bool> {
        let mut logs = self.logs.lock();
        let log = logs.entry(key.to_owned()).or_default();

        while log.front().is_some_and(|&ts| ts <= query.window_start_us) {
            log.pop_front();
        }

        if (log.len() as u64) < query.rate {
            log.push_back(query.now_us);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
