//! Per-source request pacing.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token bucket with one token per `min_interval`, sleep-to-refill.
///
/// Owned by a single adapter; every concurrent call to that adapter
/// contends here. The slot lock is never held across the sleep, so a slow
/// waiter does not block faster callers from reserving later slots.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait until a request slot is available.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let wait = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            match *next {
                Some(slot) if slot > now => {
                    *next = Some(slot + self.min_interval);
                    slot - now
                }
                _ => {
                    *next = Some(now + self.min_interval);
                    Duration::ZERO
                }
            }
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
