//! Process-wide GitHub quota tracking

use chrono::Utc;
use log::{debug, warn};
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::sleep;

/// Quota assumed until the first response reports the real one.
const DEFAULT_REMAINING: u32 = 5000;
/// Seconds added on top of the advertised reset time.
const RESET_GRACE_SECS: i64 = 2;

/// Quota counters as last reported by GitHub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateState {
    pub remaining: u32,
    /// Unix epoch second at which the quota window resets.
    pub reset_at: i64,
    /// Requests below this many remaining block until reset.
    pub floor: u32,
}

impl RateState {
    pub fn new(floor: u32) -> Self {
        Self {
            remaining: DEFAULT_REMAINING,
            reset_at: Utc::now().timestamp() + 3600,
            floor,
        }
    }

    /// Apply `x-ratelimit-*` headers; absent or garbled headers leave the state alone.
    pub fn update_from_headers(&mut self, headers: &HeaderMap) {
        if let Some(remaining) = header_number::<u32>(headers, "x-ratelimit-remaining") {
            self.remaining = remaining;
        }
        if let Some(reset) = header_number::<i64>(headers, "x-ratelimit-reset") {
            self.reset_at = reset;
        }
    }

    /// How long to pause at `now` (unix seconds), if at all.
    #[must_use]
    pub fn pause_needed(&self, now: i64) -> Option<Duration> {
        if self.remaining >= self.floor {
            return None;
        }
        let secs = self.reset_at - now + RESET_GRACE_SECS;
        (secs > 0).then(|| Duration::from_secs(secs as u64))
    }
}

fn header_number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Shared rate limiter.
///
/// Cloning is cheap and every clone sees the same counters. While one caller
/// sleeps out an exhausted quota it keeps the state locked, so every other
/// worker issuing requests waits behind it.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    state: Arc<Mutex<RateState>>,
    wake: Arc<Notify>,
    interrupted: Arc<AtomicBool>,
}

impl RateLimiter {
    pub fn new(floor: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(RateState::new(floor))),
            wake: Arc::new(Notify::new()),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record quota headers from any response, successful or not.
    pub async fn record(&self, headers: &HeaderMap) {
        self.state.lock().await.update_from_headers(headers);
    }

    /// Overwrite the counters directly.
    pub async fn update(&self, remaining: u32, reset_at: i64) {
        let mut state = self.state.lock().await;
        state.remaining = remaining;
        state.reset_at = reset_at;
    }

    pub async fn snapshot(&self) -> RateState {
        self.state.lock().await.clone()
    }

    pub async fn remaining(&self) -> u32 {
        self.state.lock().await.remaining
    }

    /// Block until the quota allows another request.
    ///
    /// Once [`interrupt`](Self::interrupt) has been called this never waits
    /// again, and a caller already sleeping returns early.
    pub async fn wait_if_needed(&self) {
        if self.is_interrupted() {
            return;
        }
        let state = self.state.lock().await;
        let Some(wait) = state.pause_needed(Utc::now().timestamp()) else {
            return;
        };

        warn!(
            "Request limit reached ({} < {}), reset in: {} secs",
            state.remaining,
            state.floor,
            wait.as_secs()
        );
        let notified = self.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_interrupted() {
            debug!("Rate limit wait skipped after interrupt");
            return;
        }
        tokio::select! {
            () = sleep(wait) => debug!("Rate limit window reset"),
            () = notified => debug!("Rate limit wait interrupted"),
        }
    }

    /// Stop all current and future quota waits.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}
