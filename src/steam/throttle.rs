use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitSettings {
    /// Steam tolerates a little under two calls a second per key. Zero or less means no limit.
    pub requests_per_second: f64,
}

impl RateLimitSettings {
    pub fn per_second(requests_per_second: f64) -> Self {
        Self {
            requests_per_second,
        }
    }
}

/// Process-wide request pacer for the Steam key.
///
/// Each `acquire` books the next free slot on a shared timeline and waits for it, so clones
/// handed to concurrent accounts never exceed the combined rate.
#[derive(Clone)]
pub struct RequestThrottle {
    spacing: Option<Duration>,
    next_slot: Arc<Mutex<Instant>>,
}

impl RequestThrottle {
    pub fn new(settings: RateLimitSettings) -> Self {
        let rps = settings.requests_per_second;
        let spacing = (rps.is_finite() && rps > 0.0).then(|| Duration::from_secs_f64(1.0 / rps));
        Self {
            spacing,
            next_slot: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(RateLimitSettings::per_second(0.0))
    }

    /// Minimum gap between two granted requests, `None` when unlimited.
    pub fn spacing(&self) -> Option<Duration> {
        self.spacing
    }

    pub async fn acquire(&self) {
        let Some(spacing) = self.spacing else {
            return;
        };

        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + spacing;
            slot
        };

        let wait = slot.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "steam request slot booked");
            sleep_until(slot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RateLimitSettings, RequestThrottle};
    use tokio::time::{Duration, Instant};

    #[test]
    fn spacing_follows_the_configured_rate() {
        let steam = RequestThrottle::new(RateLimitSettings::per_second(1.8));
        assert_eq!(steam.spacing().unwrap().as_millis(), 555);
        assert_eq!(
            RequestThrottle::new(RateLimitSettings::per_second(2.0)).spacing(),
            Some(Duration::from_millis(500))
        );
        assert!(RequestThrottle::new(RateLimitSettings::per_second(-1.0))
            .spacing()
            .is_none());
        assert!(RequestThrottle::new(RateLimitSettings::per_second(f64::NAN))
            .spacing()
            .is_none());
    }

    #[tokio::test]
    async fn unlimited_never_waits() {
        let throttle = RequestThrottle::unlimited();
        assert!(throttle.spacing().is_none());
        let start = Instant::now();
        for _ in 0..1_000 {
            throttle.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn clones_share_one_schedule() {
        let throttle = RequestThrottle::new(RateLimitSettings::per_second(50.0));
        let other = throttle.clone();
        let start = Instant::now();
        throttle.acquire().await;
        other.acquire().await;
        throttle.acquire().await;
        // The first grant is immediate; the next two each wait one 20ms slot.
        assert!(start.elapsed() >= Duration::from_millis(39));
    }
}
