//! Sliding-window request rate limiter
//!
//! The broker allows at most 5 TR requests per trailing second. `acquire`
//! delays the caller until admission keeps the trailing-window count at or
//! below the ceiling. The window lock is held across the wait, so concurrent
//! callers are admitted in the order they asked (tokio mutexes wake waiters
//! FIFO) and the observe-and-record step is atomic.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

pub struct RateLimiter {
    max_calls: usize,
    period: Duration,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limiter admitting at most `max_calls` per trailing `period`.
    pub fn new(max_calls: usize, period: Duration) -> Self {
        Self {
            max_calls,
            period,
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Per-second limiter with the given ceiling.
    pub fn per_second(max_calls: usize) -> Self {
        Self::new(max_calls, Duration::from_secs(1))
    }

    /// Wait until a request slot is free, then record the admission.
    ///
    /// Always eventually admits; there is no error outcome. Must be called
    /// before every outbound request, including retries.
    pub async fn acquire(&self) {
        let mut window = self.window.lock().await;
        let now = Instant::now();
        Self::purge(&mut window, now, self.period);

        if window.len() >= self.max_calls {
            // Sleep until the oldest admission leaves the trailing window.
            let wait = (window[0] + self.period).saturating_duration_since(now);
            if !wait.is_zero() {
                trace!(wait_ms = wait.as_millis() as u64, "rate window full, waiting");
                tokio::time::sleep(wait).await;
            }
            Self::purge(&mut window, Instant::now(), self.period);
        }

        window.push_back(Instant::now());
    }

    /// Free slots in the current trailing window.
    pub async fn remaining(&self) -> usize {
        let mut window = self.window.lock().await;
        Self::purge(&mut window, Instant::now(), self.period);
        self.max_calls.saturating_sub(window.len())
    }

    fn purge(window: &mut VecDeque<Instant>, now: Instant, period: Duration) {
        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) >= period {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_never_exceeds_ceiling() {
        let limiter = RateLimiter::per_second(5);
        let mut admissions = Vec::new();

        for _ in 0..13 {
            limiter.acquire().await;
            admissions.push(Instant::now());
        }

        // Any admission and the one five slots later must be at least one
        // window apart, otherwise some trailing second held six calls.
        for pair in admissions.windows(6) {
            let span = pair[5].duration_since(pair[0]);
            assert!(
                span >= Duration::from_secs(1),
                "six admissions within {:?}",
                span
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_burst_admitted_without_delay() {
        let limiter = RateLimiter::per_second(5);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(Instant::now(), start);
        assert_eq!(limiter.remaining().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slots_free_up_after_window_passes() {
        let limiter = RateLimiter::per_second(2);
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.remaining().await, 0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(limiter.remaining().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_respect_ceiling() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::per_second(3));
        let admissions = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..9 {
            let limiter = Arc::clone(&limiter);
            let admissions = Arc::clone(&admissions);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                admissions.lock().await.push(Instant::now());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut times = admissions.lock().await.clone();
        times.sort();
        for pair in times.windows(4) {
            assert!(pair[3].duration_since(pair[0]) >= Duration::from_secs(1));
        }
    }
}
