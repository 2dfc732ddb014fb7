//! Shared upload pacing.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Spaces calls at least `1s / rate` apart across all callers.
///
/// A rate of zero disables limiting. The first call never waits.
#[derive(Debug)]
pub struct RateLimiter {
    period: Option<Duration>,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(per_second: u32) -> Self {
        let period = (per_second > 0).then(|| Duration::from_nanos(1_000_000_000 / per_second as u64));
        Self {
            period,
            next_slot: Mutex::new(None),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    /// Wait for the next free slot.
    pub async fn acquire(&self) {
        let Some(period) = self.period else {
            return;
        };
        let slot = {
            let mut next = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + period);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}
