// src/utils/rate_limit.rs
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Spaces outbound requests at least `min_spacing` apart.
///
/// Callers reserve the next free slot under the lock and sleep outside it, so
/// concurrent callers queue up instead of bursting.
#[derive(Debug)]
pub struct RequestSpacer {
    min_spacing: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestSpacer {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            next_slot: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let wait_until = {
            let mut slot = self.next_slot.lock();
            let now = Instant::now();
            let start = match *slot {
                Some(next) if next > now => next,
                _ => now,
            };
            *slot = Some(start + self.min_spacing);
            start
        };
        tokio::time::sleep_until(wait_until).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_request_waits_for_spacing() {
        let spacer = RequestSpacer::new(Duration::from_millis(40));
        let started = Instant::now();
        spacer.acquire().await;
        spacer.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn zero_spacing_never_waits() {
        let spacer = RequestSpacer::new(Duration::ZERO);
        let started = Instant::now();
        for _ in 0..5 {
            spacer.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_millis(20));
    }
}
