use std::path::Path;
use std::path::PathBuf;

use cluster_harness::HarnessConfig;
use cluster_harness::ServerConfig;
use tracing_subscriber::EnvFilter;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

/// Announces the ports it was given and then idles, like a server that never
/// serves anything.
const IDLE_SERVER: &str = r#"
cluster=0; http=0; driver=0; dir=""
while [ $# -gt 0 ]; do
  case "$1" in
    --cluster-port) cluster="$2"; shift 2 ;;
    --http-port) http="$2"; shift 2 ;;
    --driver-port) driver="$2"; shift 2 ;;
    --directory) dir="$2"; shift 2 ;;
    *) shift ;;
  esac
done
[ -n "$dir" ] && mkdir -p "$dir"
echo "Listening for intracluster connections on port $cluster"
echo "Listening for administrative HTTP connections on port $http"
echo "Listening for client driver connections on port $driver"
echo "Server ready"
exec sleep 60
"#;

pub fn idle_server(dir: &Path) -> PathBuf {
    let path = dir.join("idle-server.sh");
    std::fs::write(&path, IDLE_SERVER).unwrap();
    path
}

/// Defaults with every directory under `dir` and the idle server as binary.
pub fn harness_config(dir: &Path) -> HarnessConfig {
    let script = idle_server(dir);
    let mut config = HarnessConfig::default();
    config.cluster.work_dir = dir.join("data");
    config.cluster.log_dir = dir.join("logs");
    config.cluster.unique_run_dir = false;
    config.server = ServerConfig {
        binary: PathBuf::from("/bin/sh"),
        binary_args: vec![script.to_string_lossy().into_owned()],
        ready_timeout_ms: 5_000,
        ready_poll_interval_ms: 20,
        stop_grace_ms: 500,
        probe_admin_port: false,
        ..ServerConfig::default()
    };
    config.retry.relay_connect.base_delay_ms = 10;
    config
}
