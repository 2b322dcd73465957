use core::fmt::Debug;
use core::time::Duration;

/// Generic abstraction for a check/countdown timer. Should also be cheap to copy and clone.
pub trait Countdown: Debug {
    fn has_expired(&self) -> bool;
    fn reset(&mut self);
}

/// Simple implementation of the [Countdown] trait assuming a standard runtime.
#[derive(Debug, Copy, Clone)]
pub struct StdCountdown {
    expiry_time: Duration,
    start_time: std::time::Instant,
}

impl StdCountdown {
    pub fn new(expiry_time: Duration) -> Self {
        Self {
            expiry_time,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn expiry_time(&self) -> Duration {
        self.expiry_time
    }
}

impl Countdown for StdCountdown {
    fn has_expired(&self) -> bool {
        self.start_time.elapsed() > self.expiry_time
    }

    fn reset(&mut self) {
        self.start_time = std::time::Instant::now();
    }
}
