//! # Reconnect Backoff
//!
//! Delay schedule used by the change subscription between reconnect attempts.
//!
//! ## Features
//!
//! - **Exponential Backoff**: Double the delay on every failed attempt
//! - **Jitter**: Add randomness to prevent thundering herd
//! - **Cap**: Never wait longer than the configured maximum
//! - **Floor**: Never retry without a delay
//!
//! ## Usage
//!
//! ```rust
//! use contact_sync::sync::retry::{Backoff, BackoffStrategy};
//! use std::time::Duration;
//!
//! let mut backoff = Backoff::new(BackoffStrategy::Fixed {
//!     interval: Duration::from_millis(250),
//! });
//! assert_eq!(backoff.next_delay(), Duration::from_millis(250));
//! ```

use rand::Rng;
use std::time::Duration;

/// Lower bound on any retry delay
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Backoff strategy configuration
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed interval between retries
    Fixed {
        interval: Duration,
    },
    /// Exponential backoff with jitter
    Exponential {
        /// Delay before the first retry
        base: Duration,
        /// Maximum delay before jitter
        max: Duration,
        /// Jitter factor (0.0 to 1.0)
        jitter: f64,
    },
}

/// Retry delay tracker for one reconnect loop
#[derive(Debug, Clone)]
pub struct Backoff {
    strategy: BackoffStrategy,
    attempt: u32,
}

impl Backoff {
    pub fn new(strategy: BackoffStrategy) -> Self {
        Self { strategy, attempt: 0 }
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = match &self.strategy {
            BackoffStrategy::Fixed { interval } => *interval,
            BackoffStrategy::Exponential { base, max, jitter } => {
                let factor = 2u32.saturating_pow(self.attempt.min(31));
                let delay = base.saturating_mul(factor).min(*max);
                delay + jitter_for(delay, *jitter)
            }
        };

        self.attempt = self.attempt.saturating_add(1);
        delay.max(MIN_RETRY_DELAY)
    }

    /// Start over after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn jitter_for(delay: Duration, jitter: f64) -> Duration {
    let jitter = jitter.clamp(0.0, 1.0);
    let spread_ms = (delay.as_millis() as f64 * jitter) as u64;
    if spread_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=spread_ms))
}
