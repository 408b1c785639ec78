use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.min(16);
        let exp = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        let delay_ms = if self.jitter {
            rng.gen_range(0..=exp)
        } else {
            exp
        };
        Duration::from_millis(delay_ms)
    }
}

/// Spacing between automatic sync passes: the regular interval while passes
/// succeed, exponential backoff while they keep failing.
#[derive(Debug, Clone)]
pub struct PassSchedule {
    interval: Duration,
    backoff: Backoff,
    consecutive_failures: u32,
}

impl PassSchedule {
    pub fn new(interval: Duration, backoff: Backoff) -> Self {
        Self {
            interval,
            backoff,
            consecutive_failures: 0,
        }
    }

    pub fn on_success(&mut self) -> Duration {
        self.consecutive_failures = 0;
        self.interval
    }

    pub fn on_failure(&mut self) -> Duration {
        let mut rng = rand::thread_rng();
        self.on_failure_with_rng(&mut rng)
    }

    pub fn on_failure_with_rng<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let delay = self.backoff.delay_with_rng(self.consecutive_failures, rng);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        delay
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
