//! Per-destination sliding-window throttle.
//!
//! Callers await a slot before issuing a remote call. There is no error
//! path: `acquire` always grants within one window length at most.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use tokio::time::{Duration, Instant, sleep_until};
use tracing::trace;

use crate::config::RateLimitConfig;

/// Sliding-window rate limiter keyed by destination.
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    state: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests.max(1),
            window: Duration::from_secs(config.window_seconds),
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Block until a request to `destination` fits inside the window, then
    /// record it. Safe under concurrent acquisition: the slot is taken inside
    /// the same lock that inspected the window.
    pub async fn acquire(&self, destination: &str) {
        loop {
            let wake_at = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                let now = Instant::now();
                let entries = state.entry(destination.to_string()).or_default();

                while let Some(oldest) = entries.front() {
                    if now.duration_since(*oldest) >= self.window {
                        entries.pop_front();
                    } else {
                        break;
                    }
                }

                match entries.front().copied() {
                    Some(oldest) if entries.len() >= self.max_requests => {
                        // Window is full: the oldest in-window entry decides
                        // when the next slot opens. Lock is released before
                        // sleeping.
                        oldest + self.window
                    }
                    _ => {
                        entries.push_back(now);
                        return;
                    }
                }
            };

            trace!(destination, "Rate limit window full; waiting for a slot");
            sleep_until(wake_at).await;
        }
    }

    /// In-window request count for a destination (diagnostics only).
    pub fn in_flight(&self, destination: &str) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        match state.get_mut(destination) {
            Some(entries) => {
                while let Some(oldest) = entries.front() {
                    if now.duration_since(*oldest) >= self.window {
                        entries.pop_front();
                    } else {
                        break;
                    }
                }
                entries.len()
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(max_requests: usize, window_seconds: u64) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(&RateLimitConfig {
            max_requests,
            window_seconds,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn grants_up_to_limit_without_waiting() {
        let limiter = limiter(3, 60);
        let started = Instant::now();
        for _ in 0..3 {
            limiter.acquire("https://a.example").await;
        }
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_flight("https://a.example"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_until_oldest_entry_ages_out() {
        let limiter = limiter(2, 10);
        limiter.acquire("dest").await;
        tokio::time::advance(Duration::from_secs(4)).await;
        limiter.acquire("dest").await;

        // Third acquire must wait for the first slot to age out (6s more).
        let started = Instant::now();
        limiter.acquire("dest").await;
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn destinations_are_throttled_independently() {
        let limiter = limiter(1, 60);
        limiter.acquire("https://a.example").await;

        let started = Instant::now();
        limiter.acquire("https://b.example").await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquirers_share_the_window() {
        let limiter = Arc::new(limiter(2, 10));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire("dest").await;
                Instant::now()
            }));
        }

        let mut grant_times = Vec::new();
        for handle in handles {
            grant_times.push(handle.await.expect("task completes"));
        }
        grant_times.sort();

        // Two grants immediately, two after the window slides.
        assert_eq!(grant_times[0], grant_times[1]);
        assert!(grant_times[2] >= grant_times[0] + Duration::from_secs(10));
    }
}
