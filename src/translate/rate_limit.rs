//! Global throttle: a minimum spacing between consecutive outbound calls,
//! shared by every provider and every in-flight request.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub struct RateLimiter {
    /// Earliest instant the next call may start.
    next_allowed: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            next_allowed: Mutex::new(Instant::now()),
        }
    }

    /// Wait until a call may go out, then reserve the following slot.
    /// Callers queue on the lock, so concurrent waiters are spaced too.
    pub async fn acquire(&self, min_interval: Duration) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            let wait = *next - now;
            debug!(wait_ms = wait.as_millis() as u64, "rate_limit_wait");
            tokio::time::sleep(wait).await;
        }
        *next = Instant::now() + min_interval;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn spaces_consecutive_calls() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        limiter.acquire(Duration::from_millis(100)).await;
        limiter.acquire(Duration::from_millis(100)).await;
        limiter.acquire(Duration::from_millis(100)).await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn no_wait_after_idle_gap() {
        let limiter = RateLimiter::new();
        limiter.acquire(Duration::from_millis(100)).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        let before = Instant::now();
        limiter.acquire(Duration::from_millis(100)).await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_are_serialized() {
        let limiter = Arc::new(RateLimiter::new());
        let start = Instant::now();
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let l = Arc::clone(&limiter);
                tokio::spawn(async move { l.acquire(Duration::from_millis(50)).await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
