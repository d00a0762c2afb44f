//! The single poll-until primitive every bounded wait in the harness goes through.
//!
//! Readiness waits, convergence waits and group-level checks all call
//! [`poll_until`], so retry cadence and timeout accounting behave the same
//! everywhere.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tracing::trace;

use crate::Error;
use crate::Result;

/// Result of one probe.
#[derive(Debug)]
pub enum Probe<T, S> {
    /// Predicate satisfied, carrying the observed value
    Ready(T),
    /// Not there yet, carrying the state observed on this attempt
    Pending(S),
}

/// Interval, overall timeout and stability threshold of a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    /// Consecutive `Ready` probes required before the wait succeeds
    pub settle: u32,
}

impl PollPolicy {
    pub fn new(
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            interval,
            timeout,
            settle: 1,
        }
    }

    pub fn with_settle(
        mut self,
        settle: u32,
    ) -> Self {
        self.settle = settle.max(1);
        self
    }
}

/// What a timed-out wait knew when it gave up.
#[derive(Debug)]
pub struct PollTimeout<S> {
    pub waited: Duration,
    pub attempts: u32,
    pub last: Option<S>,
}

/// Polls `probe` every `policy.interval` until it has returned `Ready`
/// `policy.settle` times in a row, or until `policy.timeout` elapses.
///
/// A probe that returns `Err` aborts the wait immediately with that error; a
/// probe that wants a failure retried must report it as `Pending`. On timeout,
/// `on_timeout` turns the last observed state into the caller's error.
pub async fn poll_until<T, S, F, Fut, E>(
    policy: PollPolicy,
    mut probe: F,
    on_timeout: E,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T, S>>>,
    E: FnOnce(PollTimeout<S>) -> Error,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let settle = policy.settle.max(1);

    let mut attempts = 0u32;
    let mut streak = 0u32;
    let mut last = None;

    loop {
        attempts += 1;
        match timeout_at(deadline, probe()).await {
            Ok(Ok(Probe::Ready(value))) => {
                streak += 1;
                if streak >= settle {
                    trace!(attempts, "poll satisfied");
                    return Ok(value);
                }
            }
            Ok(Ok(Probe::Pending(state))) => {
                streak = 0;
                last = Some(state);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => break,
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        sleep(policy.interval.min(deadline - now)).await;
    }

    Err(on_timeout(PollTimeout {
        waited: started.elapsed(),
        attempts,
        last,
    }))
}
