//! Deterministic backoff curves applied between retry attempts.

use std::time::Duration;

/// Delay function from the number of attempts made so far to the wait before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// `attempts² × unit` (1s, 4s, 9s, ... with a one second unit)
    Quadratic { unit: Duration },
    /// `attempts × step` (1m, 2m, 3m, ... with a one minute step)
    Linear { step: Duration },
}

impl RetryPolicy {
    /// Generic job curve: attempts² seconds.
    pub const fn quadratic_seconds() -> Self {
        RetryPolicy::Quadratic {
            unit: Duration::from_secs(1),
        }
    }

    /// Email queue curve: attempts × one minute.
    pub const fn linear_minutes() -> Self {
        RetryPolicy::Linear {
            step: Duration::from_secs(60),
        }
    }

    /// Delay to wait after the given (1-based) attempt failed.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        match *self {
            RetryPolicy::Quadratic { unit } => unit.saturating_mul(attempts.saturating_mul(attempts)),
            RetryPolicy::Linear { step } => step.saturating_mul(attempts),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::quadratic_seconds()
    }
}
