// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Bounded retry with exponential backoff.
//!
//! SUT and annotator clients wrap their network calls with this policy.
//! Ordinary failures get a few quick attempts; failures the caller marks as
//! long-retry (rate limits, provider hiccups) are retried for up to a day,
//! since batch runs would rather wait than lose work.

use std::time::{Duration, Instant};

/// Default number of attempts for ordinary failures.
pub const BASE_ATTEMPTS: u32 = 3;
/// Default ceiling on total retry time for long-retry failures.
pub const MAX_RETRY_DURATION: Duration = Duration::from_secs(86_400);
/// Default ceiling on a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// A bounded retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed for ordinary failures.
    pub base_attempts: u32,
    /// Total time allowed for long-retry failures.
    pub max_duration: Duration,
    /// Longest single sleep between attempts.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_attempts: BASE_ATTEMPTS,
            max_duration: MAX_RETRY_DURATION,
            max_backoff: MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Runs `operation` until it succeeds or the policy is exhausted.
    ///
    /// `is_long_retry` classifies an error: `true` means keep retrying until
    /// [`max_duration`](RetryPolicy::max_duration) has elapsed, `false`
    /// counts the failure against
    /// [`base_attempts`](RetryPolicy::base_attempts). Sleeps
    /// `min(2^attempts, max_backoff)` between tries.
    ///
    /// # Errors
    ///
    /// Returns the last error once the policy is exhausted.
    pub fn call<T, E, F, P>(&self, mut operation: F, is_long_retry: P) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let started = Instant::now();
        let mut attempts: u32 = 0;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if is_long_retry(&error) {
                        if started.elapsed() >= self.max_duration {
                            return Err(error);
                        }
                    } else {
                        attempts += 1;
                        if attempts >= self.base_attempts {
                            return Err(error);
                        }
                    }
                }
            }
            let backoff = Duration::from_secs(2u64.saturating_pow(attempts));
            std::thread::sleep(backoff.min(self.max_backoff));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_attempts: 3,
            max_duration: Duration::from_millis(50),
            max_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_success_needs_one_attempt() {
        let calls = Cell::new(0);
        let result: Result<i32, &str> = fast_policy().call(
            || {
                calls.set(calls.get() + 1);
                Ok(42)
            },
            |_| false,
        );
        assert_eq!(result, Ok(42));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_ordinary_failures_get_base_attempts() {
        let calls = Cell::new(0);
        let result: Result<i32, &str> = fast_policy().call(
            || {
                calls.set(calls.get() + 1);
                Err("nope")
            },
            |_| false,
        );
        assert_eq!(result, Err("nope"));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_recovery_within_base_attempts() {
        let calls = Cell::new(0);
        let result: Result<i32, &str> = fast_policy().call(
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 { Err("flaky") } else { Ok(7) }
            },
            |_| false,
        );
        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_long_retry_failures_run_until_the_duration_cap() {
        let calls = Cell::new(0);
        let result: Result<i32, &str> = fast_policy().call(
            || {
                calls.set(calls.get() + 1);
                Err("rate limited")
            },
            |_| true,
        );
        assert_eq!(result, Err("rate limited"));
        // Far more than base_attempts tries fit in the duration window.
        assert!(calls.get() > 3);
    }
}
