use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Runs `task` until it succeeds or the policy is exhausted.
///
/// Each attempt is bounded by `policy.timeout_ms`. Between attempts the delay
/// doubles from `base_delay_ms` up to `max_delay_ms`, with up to 10% jitter.
/// The error of the last attempt is returned once `max_retries` attempts failed.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, U>(
    task: F,
    policy: BackoffPolicy,
) -> Result<U>
where
    F: Fn() -> T,
    T: std::future::Future<Output = Result<U>>,
{
    let attempts = policy.max_retries.max(1);
    let timeout_duration = Duration::from_millis(policy.timeout_ms);
    let mut delay = Duration::from_millis(policy.base_delay_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);

    let mut last_error = None;
    for attempt in 1..=attempts {
        match timeout(timeout_duration, task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(e)) => {
                warn!(attempt, "task failed: {}", e);
                last_error = Some(e);
            }
            Err(_) => {
                warn!(attempt, "task timed out after {:?}", timeout_duration);
                last_error = Some(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("attempt timed out after {timeout_duration:?}"),
                )));
            }
        }

        if attempt < attempts {
            let jitter = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 10);
            let wait = delay + Duration::from_millis(jitter);
            debug!(attempt, ?wait, "backing off before retry");
            sleep(wait).await;
            delay = (delay * 2).min(max_delay);
        }
    }

    Err(last_error.unwrap_or_else(|| Error::IllegalState("retry loop ran zero attempts".into())))
}
