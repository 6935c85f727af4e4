//! Minimum-interval call gate for the external endpoint.
//!
//! NetSuite allows roughly one in-flight request per integration user, so
//! calls are spaced by a fixed interval instead of parallelized. A 429
//! response can push the gate further out via [`Throttle::penalize`].

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

#[derive(Debug)]
struct ThrottleState {
    next_allowed: Instant,
}

/// Shared call gate. Cheap to clone behind an `Arc`.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    state: Mutex<ThrottleState>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Mutex::new(ThrottleState {
                next_allowed: Instant::now(),
            }),
        }
    }

    /// Wait until a call slot is available, reserving the next slot before
    /// sleeping so concurrent waiters queue up rather than stampede.
    pub async fn acquire(&self) {
        let wait_until = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let slot = state.next_allowed.max(now);
            state.next_allowed = slot + self.min_interval;
            slot
        };
        sleep_until(wait_until).await;
    }

    /// Push the gate out by `cooldown` from now, e.g. after a 429.
    pub async fn penalize(&self, cooldown: Duration) {
        let mut state = self.state.lock().await;
        let candidate = Instant::now() + cooldown;
        if candidate > state.next_allowed {
            state.next_allowed = candidate;
        }
    }

    /// Configured minimum interval between calls.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Remaining delay before the next call slot, for diagnostics.
    pub async fn current_delay(&self) -> Duration {
        let state = self.state.lock().await;
        state.next_allowed.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn spaces_calls_by_min_interval() {
        let throttle = Throttle::new(Duration::from_millis(1000));
        let start = Instant::now();

        throttle.acquire().await;
        throttle.acquire().await;
        throttle.acquire().await;

        // First call is immediate, the next two each wait a full interval
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn penalty_extends_the_gate() {
        let throttle = Throttle::new(Duration::from_millis(100));
        throttle.acquire().await;
        throttle.penalize(Duration::from_secs(30)).await;

        let start = Instant::now();
        throttle.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn penalty_never_moves_the_gate_earlier() {
        let throttle = Throttle::new(Duration::from_secs(60));
        throttle.acquire().await;
        throttle.acquire().await;
        // Gate already sits one minute out; a short penalty must not shrink it
        throttle.penalize(Duration::from_secs(1)).await;
        assert!(throttle.current_delay().await >= Duration::from_secs(59));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_are_serialized() {
        let throttle = Arc::new(Throttle::new(Duration::from_millis(500)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let throttle = Arc::clone(&throttle);
            handles.push(tokio::spawn(async move {
                throttle.acquire().await;
                start.elapsed()
            }));
        }

        let mut elapsed: Vec<Duration> = Vec::new();
        for handle in handles {
            elapsed.push(handle.await.unwrap());
        }
        elapsed.sort();

        for (i, e) in elapsed.iter().enumerate() {
            assert_eq!(*e, Duration::from_millis(500 * i as u64));
        }
    }
}
