use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::poll::poll_until;
use super::poll::PollPolicy;
use super::poll::Probe;
use crate::Error;

fn timeout_error(t: super::poll::PollTimeout<u32>) -> Error {
    Error::ConvergenceTimeout {
        goal: "counter".into(),
        waited: t.waited,
        attempts: t.attempts,
        last_observed: format!("{:?}", t.last),
    }
}

#[tokio::test(start_paused = true)]
async fn poll_until_returns_once_predicate_holds() {
    let counter = Arc::new(AtomicU32::new(0));
    let policy = PollPolicy::new(Duration::from_millis(100), Duration::from_secs(5));

    let c = counter.clone();
    let value = poll_until(
        policy,
        move || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(if n >= 3 { Probe::Ready(n) } else { Probe::Pending(n) })
            }
        },
        timeout_error,
    )
    .await
    .unwrap();

    assert_eq!(value, 3);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn poll_until_times_out_with_last_observed_state() {
    let policy = PollPolicy::new(Duration::from_millis(100), Duration::from_millis(350));

    let err = poll_until(
        policy,
        || async { Ok::<Probe<(), u32>, Error>(Probe::Pending(42)) },
        timeout_error,
    )
    .await
    .unwrap_err();

    match err {
        Error::ConvergenceTimeout {
            attempts,
            last_observed,
            waited,
            ..
        } => {
            assert!(attempts >= 3, "attempts = {attempts}");
            assert_eq!(last_observed, "Some(42)");
            assert!(waited >= Duration::from_millis(350));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn poll_until_aborts_on_probe_error() {
    let counter = Arc::new(AtomicU32::new(0));
    let policy = PollPolicy::new(Duration::from_millis(10), Duration::from_secs(5));

    let c = counter.clone();
    let err = poll_until(
        policy,
        move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<Probe<(), u32>, _>(Error::IllegalState("boom".into()))
            }
        },
        timeout_error,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::IllegalState(_)));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn poll_until_requires_consecutive_ready_probes_when_settling() {
    // Ready, Pending, Ready, Ready -> succeeds on the 4th probe with settle = 2.
    let script = [true, false, true, true];
    let counter = Arc::new(AtomicU32::new(0));
    let policy = PollPolicy::new(Duration::from_millis(10), Duration::from_secs(5)).with_settle(2);

    let c = counter.clone();
    let value = poll_until(
        policy,
        move || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                Ok(if script[n as usize] { Probe::Ready(n) } else { Probe::Pending(n) })
            }
        },
        timeout_error,
    )
    .await
    .unwrap();

    assert_eq!(value, 3);
}

#[test]
fn with_settle_never_goes_below_one() {
    let policy = PollPolicy::new(Duration::from_millis(1), Duration::from_millis(1)).with_settle(0);
    assert_eq!(policy.settle, 1);
}
