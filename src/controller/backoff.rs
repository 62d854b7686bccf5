//! # Exponential Backoff
//!
//! Retry delays for failed reconciles, handed to the controller as requeue
//! actions. Each failure doubles the delay, starting at the configured base
//! and capped at the configured ceiling.
//!
//! ## Usage
//!
//! ```rust
//! use monitoring_operator::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
//! ```

use std::time::Duration;

/// Exponential backoff calculator
///
/// # Example
///
/// ```
/// use monitoring_operator::controller::backoff::ExponentialBackoff;
/// use std::time::Duration;
///
/// let mut backoff = ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(10));
/// println!("Backoff: {:?}", backoff.next_backoff());
/// ```
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    /// Failures since the last reset
    failures: u32,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `base` and never exceeding `max`
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    /// Delay for the next retry; advances the sequence
    ///
    /// # Example
    ///
    /// ```
    /// use monitoring_operator::controller::backoff::ExponentialBackoff;
    /// use std::time::Duration;
    ///
    /// let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(3));
    /// backoff.next_backoff();
    /// backoff.next_backoff();
    /// assert_eq!(backoff.next_backoff(), Duration::from_secs(3));
    /// ```
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.peek();
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Delay the next call to [`next_backoff`](Self::next_backoff) would return
    #[must_use]
    pub fn peek(&self) -> Duration {
        // 2^31 * base overflows any sensible ceiling long before it matters
        let factor = 1u32.checked_shl(self.failures.min(31)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Number of failures since the last reset
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Reset to the base delay after a success
    ///
    /// # Example
    ///
    /// ```
    /// use monitoring_operator::controller::backoff::ExponentialBackoff;
    /// use std::time::Duration;
    ///
    /// let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
    /// backoff.next_backoff();
    /// backoff.next_backoff();
    /// backoff.reset();
    /// assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
    /// ```
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
