use std::time::Duration;

use tempfile::tempdir;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::runner_test::config;
use super::runner_test::target;
use super::*;
use crate::Error;
use crate::WorkloadConfig;
use crate::WorkloadError;

const UNTIL_INTERRUPTED: &str = "trap 'exit 0' INT; while true; do sleep 0.1; done";

fn workload(
    dir: &TempDir,
    command: &str,
    config: WorkloadConfig,
    cancel: CancellationToken,
) -> ContinuousWorkload {
    ContinuousWorkload::new(
        WorkloadSpec::new("cont", command, target()),
        config,
        dir.path().to_path_buf(),
        cancel,
    )
}

async fn wait_until_exited(workload: &mut ContinuousWorkload) {
    for _ in 0..100 {
        if !workload.is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("workload still running");
}

#[tokio::test]
async fn test_start_check_stop() {
    let dir = tempdir().unwrap();
    let mut w = workload(&dir, UNTIL_INTERRUPTED, config(), CancellationToken::new());

    w.start().unwrap();
    assert!(w.is_running());
    tokio::time::sleep(Duration::from_millis(200)).await;
    w.check().unwrap();

    w.stop().await.unwrap();
    assert!(!w.is_running());
    assert!(dir.path().join("cont-continuous.log").exists());
}

#[tokio::test]
async fn test_lifecycle_misuse() {
    let dir = tempdir().unwrap();
    let mut w = workload(&dir, UNTIL_INTERRUPTED, config(), CancellationToken::new());

    assert!(matches!(w.check(), Err(Error::Workload(WorkloadError::NotRunning(_)))));
    assert!(matches!(w.stop().await, Err(Error::Workload(WorkloadError::NotRunning(_)))));

    w.start().unwrap();
    assert!(matches!(w.start(), Err(Error::Workload(WorkloadError::AlreadyRunning(_)))));
    w.stop().await.unwrap();
}

#[tokio::test]
async fn test_early_success_still_passes() {
    let dir = tempdir().unwrap();
    let mut w = workload(&dir, "exit 0", config(), CancellationToken::new());

    w.start().unwrap();
    wait_until_exited(&mut w).await;

    w.check().unwrap();
    w.stop().await.unwrap();
}

#[tokio::test]
async fn test_early_failure_is_reported_by_check() {
    let dir = tempdir().unwrap();
    let mut w = workload(&dir, "echo 'inconsistent read'; exit 2", config(), CancellationToken::new());

    w.start().unwrap();
    wait_until_exited(&mut w).await;

    assert!(matches!(w.check(), Err(Error::Workload(WorkloadError::Failed { .. }))));
    assert!(matches!(w.stop().await, Err(Error::Workload(WorkloadError::NotRunning(_)))));
}

#[tokio::test]
async fn test_ignoring_the_stop_signal_times_out() {
    let dir = tempdir().unwrap();
    let mut config = config();
    config.stop_timeout_ms = 300;
    let mut w = workload(
        &dir,
        "trap '' INT; while true; do sleep 0.1; done",
        config,
        CancellationToken::new(),
    );

    w.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let err = w.stop().await.unwrap_err();

    assert!(err.is_timeout());
    assert!(!w.is_running());
}

#[tokio::test]
async fn test_teardown_kills_a_running_workload() {
    let dir = tempdir().unwrap();
    let cancel = CancellationToken::new();
    let mut w = workload(&dir, "sleep 30", config(), cancel.clone());

    w.start().unwrap();
    cancel.cancel();
    wait_until_exited(&mut w).await;

    assert!(w.check().is_err());
}
