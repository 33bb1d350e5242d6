// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use awgboard_log::{debug, error};

use crate::{Error, Result};

/// Bounded retry with linear back-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, backoff: Duration) -> Self {
        RetryPolicy { attempts, backoff }
    }

    /// A single attempt; failures are reported as they are.
    pub const fn single() -> Self {
        RetryPolicy::new(1, Duration::ZERO)
    }

    fn pause_before(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

/// Run `attempt` against `state` until it succeeds, fails with a
/// non-transient error, or the policy's attempts are used up.
///
/// `recover` runs between attempts, e.g. to drain stray datagrams. When the
/// policy allows more than one attempt and all fail, the last cause is
/// wrapped in [`Error::RetriesExhausted`].
pub fn with_retry<S: ?Sized, T>(
    state: &mut S,
    policy: RetryPolicy,
    operation: &'static str,
    mut attempt: impl FnMut(&mut S) -> Result<T>,
    mut recover: impl FnMut(&mut S),
) -> Result<T> {
    let attempts = policy.attempts.max(1);
    let mut n = 1;
    loop {
        let err = match attempt(state) {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => err,
        };
        if n >= attempts {
            if attempts == 1 {
                return Err(err);
            }
            error!("{} failed after {} attempts: {}", operation, attempts, err);
            return Err(Error::RetriesExhausted {
                operation,
                attempts,
                source: Box::new(err),
            });
        }
        debug!("{} attempt {}/{} failed: {}", operation, n, attempts, err);
        recover(state);
        let pause = policy.pause_before(n);
        if !pause.is_zero() {
            std::thread::sleep(pause);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        calls: u32,
        recoveries: u32,
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let mut counter = Counter::default();
        let value = with_retry(
            &mut counter,
            RetryPolicy::new(5, Duration::ZERO),
            "count",
            |p| {
                p.calls += 1;
                if p.calls < 3 {
                    Err(Error::StaleReply)
                } else {
                    Ok(p.calls)
                }
            },
            |p| p.recoveries += 1,
        )
        .expect("third attempt succeeds");
        assert_eq!(value, 3);
        assert_eq!(counter.recoveries, 2);
    }

    #[test]
    fn test_precondition_is_not_retried() {
        let mut counter = Counter::default();
        let result: Result<()> = with_retry(
            &mut counter,
            RetryPolicy::new(5, Duration::ZERO),
            "count",
            |p| {
                p.calls += 1;
                Err(Error::precondition("bad length"))
            },
            |p| p.recoveries += 1,
        );
        assert!(matches!(result, Err(Error::Precondition(_))));
        assert_eq!(counter.calls, 1);
        assert_eq!(counter.recoveries, 0);
    }

    #[test]
    fn test_exhaustion_keeps_last_cause() {
        let mut counter = Counter::default();
        let result: Result<()> = with_retry(
            &mut counter,
            RetryPolicy::new(5, Duration::ZERO),
            "count",
            |p| {
                p.calls += 1;
                Err(Error::Timeout {
                    timeout: Duration::from_millis(10),
                })
            },
            |_| {},
        );
        match result {
            Err(Error::RetriesExhausted {
                attempts, source, ..
            }) => {
                assert_eq!(attempts, 5);
                assert!(matches!(*source, Error::Timeout { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(counter.calls, 5);
    }

    #[test]
    fn test_single_attempt_reports_cause() {
        let mut counter = Counter::default();
        let result: Result<()> =
            with_retry(&mut counter, RetryPolicy::single(), "count", |_| Err(Error::StaleReply), |_| {});
        assert!(matches!(result, Err(Error::StaleReply)));
    }
}
