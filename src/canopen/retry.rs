// Bounded retry with a fixed pause between attempts
//
// The bus adapter reports failures per frame, so every transmit and every
// receive wait is retried on its own budget rather than per transaction.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of attempts per frame
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Default pause between attempts
pub const DEFAULT_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Pause between two consecutive attempts
    pub interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt number. The error of the last
    /// attempt is returned when every attempt failed.
    pub fn run<T, E>(&self, mut op: impl FnMut(u32) -> Result<T, E>) -> Result<T, E> {
        let attempts = self.max_attempts.max(1);
        let interval = self.interval();
        let mut attempt = 1;

        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => return Err(e),
                Err(_) => {
                    if !interval.is_zero() {
                        thread::sleep(interval);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
