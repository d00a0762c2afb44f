use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tempfile::tempdir;
use tempfile::TempDir;
use tracing_test::traced_test;

use super::*;
use crate::test_utils::fake_server;
use crate::Error;
use crate::ProcessError;

const READY_WAIT: Duration = Duration::from_secs(5);

struct Fixture {
    dir: TempDir,
    settings: Arc<LaunchSettings>,
}

impl Fixture {
    fn new(body: &str) -> Self {
        let dir = tempdir().unwrap();
        let script = fake_server::write_script(dir.path(), "server", body);
        let settings = fake_server::launch_settings(&dir.path().join("logs"), &script);
        Self { dir, settings }
    }

    fn with_script(script: impl FnOnce(&std::path::Path) -> PathBuf) -> Self {
        let dir = tempdir().unwrap();
        let script = script(dir.path());
        let settings = fake_server::launch_settings(&dir.path().join("logs"), &script);
        Self { dir, settings }
    }

    fn identity(
        &self,
        name: &str,
    ) -> NodeIdentity {
        NodeIdentity::new(name, self.dir.path().join("data").join(name))
    }

    fn process(
        &self,
        identity: NodeIdentity,
    ) -> ServerProcess {
        ServerProcess::new(identity, ServeOptions::default(), self.settings.clone())
    }
}

fn fixed_ports() -> ServerPorts {
    ServerPorts {
        cluster: 41001,
        http_admin: 41002,
        client_driver: 41003,
    }
}

#[tokio::test]
async fn start_wait_and_stop_with_fixed_ports() {
    let fx = Fixture::new(fake_server::HEALTHY);
    let identity = fx.identity("n1").with_port_strategy(PortStrategy::Fixed(fixed_ports()));
    let mut process = fx.process(identity);

    assert_eq!(process.state(), ServerState::Unstarted);
    process.start(&[]).await.unwrap();
    assert_eq!(process.state(), ServerState::Starting);

    let ports = process.wait_until_ready(READY_WAIT).await.unwrap();
    assert_eq!(ports, fixed_ports());
    assert_eq!(process.state(), ServerState::Ready);
    assert!(process.is_alive());
    assert!(process.identity().is_leased());
    assert!(process.data_dir().exists());
    process.check().unwrap();

    process.stop().await.unwrap();
    assert_eq!(process.state(), ServerState::Stopped);
    assert!(!process.is_alive());
    assert!(process.last_exit().unwrap().requested);
    assert!(!process.identity().is_leased());
    process.check().unwrap();

    let log = std::fs::read_to_string(process.log_path()).unwrap();
    assert!(log.contains("launching /bin/sh"));
    assert!(log.contains("Server ready"));
    // stderr lands in the same file
    assert!(log.contains("Listening for administrative HTTP connections on port 41002"));
}

#[tokio::test]
async fn reported_ports_are_read_back_from_the_log() {
    let fx = Fixture::new(fake_server::HEALTHY);
    let identity = fx.identity("reported").with_port_strategy(PortStrategy::Reported);
    let mut process = fx.process(identity);

    process.start(&[]).await.unwrap();
    assert!(process.ports().is_none());

    let ports = process.wait_until_ready(READY_WAIT).await.unwrap();
    assert!(ports.cluster >= 30000);
    assert_eq!(ports.http_admin, ports.cluster + 1);
    assert_eq!(ports.client_driver, ports.cluster + 2);
    assert_eq!(process.ports(), Some(ports));
    assert_eq!(process.admin_addr().unwrap().port(), ports.http_admin);

    process.kill().await.unwrap();
}

#[tokio::test]
async fn unexpected_exit_is_reported_by_check_with_output() {
    let fx = Fixture::new(fake_server::CRASH_AFTER_READY);
    let mut process = fx.process(fx.identity("crashy"));

    process.start(&[]).await.unwrap();
    process.wait_until_ready(READY_WAIT).await.unwrap();

    let mut outcome = Ok(());
    for _ in 0..100 {
        outcome = process.check();
        if outcome.is_err() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    match outcome {
        Err(Error::Process(ProcessError::Crashed { name, output, .. })) => {
            assert_eq!(name, "crashy");
            assert!(output.contains("disk on fire"), "output: {output}");
        }
        other => panic!("expected crash, got {other:?}"),
    }
    assert_eq!(process.state(), ServerState::Crashed);
    assert!(!process.identity().is_leased());
    // the crash keeps being reported
    assert!(process.check().is_err());
}

#[tokio::test]
async fn silent_server_times_out_with_last_state() {
    let fx = Fixture::with_script(fake_server::write_silent_script);
    let mut process = fx.process(fx.identity("silent"));

    process.start(&[]).await.unwrap();
    let err = process.wait_until_ready(Duration::from_millis(300)).await.unwrap_err();

    assert!(err.is_timeout());
    match err {
        Error::Process(ProcessError::StartupTimeout { name, last_state, .. }) => {
            assert_eq!(name, "silent");
            assert!(last_state.contains("ready marker not seen"), "{last_state}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(process.state(), ServerState::Starting);

    process.kill().await.unwrap();
    assert_eq!(process.state(), ServerState::Stopped);
}

#[tokio::test]
async fn early_exit_aborts_readiness_wait() {
    let fx = Fixture::with_script(fake_server::write_failing_script);
    let mut process = fx.process(fx.identity("failing"));

    process.start(&[]).await.unwrap();
    let err = process.wait_until_ready(READY_WAIT).await.unwrap_err();

    match err {
        Error::Process(ProcessError::Crashed { output, status, .. }) => {
            assert!(output.contains("cannot open data directory"));
            assert!(status.contains('1'), "{status}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(process.state(), ServerState::Crashed);
}

#[tokio::test]
async fn missing_binary_is_a_launch_error_and_releases_the_lease() {
    let dir = tempdir().unwrap();
    let mut config = fake_server::server_config(&dir.path().join("unused.sh"));
    config.binary = dir.path().join("no-such-binary");
    let settings = Arc::new(LaunchSettings::new(config, "127.0.0.1", dir.path()).unwrap());
    let identity = NodeIdentity::new("ghost", dir.path().join("ghost"));
    let mut process = ServerProcess::new(identity.clone(), ServeOptions::default(), settings);

    let err = process.start(&[]).await.unwrap_err();

    assert!(matches!(err, Error::Process(ProcessError::Launch { .. })));
    assert!(!identity.is_leased());
    assert_eq!(process.state(), ServerState::Unstarted);
}

#[tokio::test]
async fn one_data_dir_one_live_process() {
    let fx = Fixture::new(fake_server::HEALTHY);
    let identity = fx.identity("shared");
    let mut first = fx.process(identity.clone());
    let mut second = fx.process(identity);

    first.start(&[]).await.unwrap();
    let err = second.start(&[]).await.unwrap_err();
    assert!(matches!(err, Error::Process(ProcessError::DataDirInUse(_))));

    first.stop().await.unwrap();
    second.start(&[]).await.unwrap();
    second.wait_until_ready(READY_WAIT).await.unwrap();
    second.stop().await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn stop_escalates_to_sigkill_after_grace_period() {
    let fx = Fixture::new(fake_server::STUBBORN);
    let mut process = fx.process(fx.identity("stubborn"));

    process.start(&[]).await.unwrap();
    process.wait_until_ready(READY_WAIT).await.unwrap();
    process.stop().await.unwrap();

    assert_eq!(process.state(), ServerState::Stopped);
    assert!(logs_contain("Graceful shutdown deadline exceeded"));
}

#[tokio::test]
async fn kill_is_not_a_crash() {
    let fx = Fixture::new(fake_server::HEALTHY);
    let mut process = fx.process(fx.identity("victim"));

    process.start(&[]).await.unwrap();
    process.wait_until_ready(READY_WAIT).await.unwrap();
    process.kill().await.unwrap();

    assert_eq!(process.state(), ServerState::Stopped);
    assert!(process.check().is_ok());
    assert!(process.last_exit().unwrap().to_string().contains("signal"));
}

#[tokio::test]
async fn restart_against_same_identity_appends_to_one_log() {
    let fx = Fixture::new(fake_server::HEALTHY);
    let mut process = fx.process(fx.identity("phoenix"));

    process.start(&[]).await.unwrap();
    process.wait_until_ready(READY_WAIT).await.unwrap();
    process.stop().await.unwrap();

    process.start(&[]).await.unwrap();
    process.wait_until_ready(READY_WAIT).await.unwrap();
    process.stop().await.unwrap();

    let log = std::fs::read_to_string(process.log_path()).unwrap();
    assert_eq!(log.matches("launching").count(), 2);
    assert_eq!(log.matches("Server ready").count(), 2);
}

#[tokio::test]
async fn start_while_running_is_illegal() {
    let fx = Fixture::new(fake_server::HEALTHY);
    let mut process = fx.process(fx.identity("twice"));

    process.start(&[]).await.unwrap();
    assert!(matches!(process.start(&[]).await, Err(Error::IllegalState(_))));
    process.kill().await.unwrap();
}

#[tokio::test]
async fn dropping_the_handle_kills_the_process() {
    let fx = Fixture::new(fake_server::HEALTHY);
    let mut process = fx.process(fx.identity("dropped"));

    process.start(&[]).await.unwrap();
    process.wait_until_ready(READY_WAIT).await.unwrap();
    let pid = Pid::from_raw(process.pid().unwrap());
    drop(process);

    let mut gone = false;
    for _ in 0..100 {
        if kill(pid, None) == Err(Errno::ESRCH) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone, "process {pid} survived drop");
}

#[test]
fn launch_args_follow_flag_surface() {
    let dir = tempdir().unwrap();
    let settings = fake_server::launch_settings(dir.path(), &dir.path().join("s.sh"));
    let identity = NodeIdentity::new("n1", "/data/n1").with_tag("east").with_tag("ssd");
    let options = ServeOptions::default()
        .with_cache_size_mb(256)
        .with_durability(Durability::Soft)
        .with_extra_arg("--no-update-check");
    let process = ServerProcess::new(identity, options, settings);

    let args = process.launch_args(&fixed_ports());
    let script = dir.path().join("s.sh").to_string_lossy().into_owned();

    assert_eq!(
        args,
        vec![
            script.as_str(),
            "serve",
            "--directory",
            "/data/n1",
            "--server-name",
            "n1",
            "--server-tag",
            "east",
            "--server-tag",
            "ssd",
            "--bind",
            "127.0.0.1",
            "--cluster-port",
            "41001",
            "--http-port",
            "41002",
            "--driver-port",
            "41003",
            "--cache-size",
            "256",
            "--durability",
            "soft",
            "--no-update-check",
        ]
    );
}
