//! Call-level retry policy: exponential backoff with jitter.

use std::time::Duration;

use crate::config::CallRetrySettings;
use crate::error::GenerationCallError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&CallRetrySettings::default())
    }
}

impl From<&CallRetrySettings> for RetryPolicy {
    fn from(s: &CallRetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            multiplier: s.multiplier,
            jitter: s.jitter,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay after the `attempt`-th attempt (1-based) failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(attempt as i32 - 1);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // Up to 25% jitter
            capped_delay * (1.0 + rand_jitter() * 0.25)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Like [`delay_for_attempt`](Self::delay_for_attempt), but never shorter
    /// than a provider's `retry-after` hint.
    pub fn delay_after(&self, attempt: u32, error: Option<&GenerationCallError>) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        match error {
            Some(GenerationCallError::RateLimited {
                retry_after_secs: Some(secs),
            }) => delay.max(Duration::from_secs(*secs)),
            _ => delay,
        }
    }
}

/// Pseudo-random value in `[0, 1)` from the clock's sub-second nanos.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}
