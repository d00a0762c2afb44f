//! Shell scripts standing in for the server binary.
//!
//! Every script is run as `/bin/sh <script> serve --directory ... --cluster-port N ...`
//! so nothing has to be marked executable.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::node::LaunchSettings;

const PARSE_FLAGS: &str = r#"
cluster=0; http=0; driver=0; dir=""
while [ $# -gt 0 ]; do
  case "$1" in
    --cluster-port) cluster="$2"; shift 2 ;;
    --http-port) http="$2"; shift 2 ;;
    --driver-port) driver="$2"; shift 2 ;;
    --directory) dir="$2"; shift 2 ;;
    *) echo "arg: $1"; shift ;;
  esac
done
if [ "$cluster" = "0" ]; then
  base=$((30000 + $$ % 20000))
  cluster=$base; http=$((base + 1)); driver=$((base + 2))
fi
[ -n "$dir" ] && mkdir -p "$dir"
"#;

const ANNOUNCE: &str = r#"
echo "Listening for intracluster connections on port $cluster"
echo "Listening for administrative HTTP connections on port $http" 1>&2
echo "Listening for client driver connections on port $driver"
echo "Server ready"
"#;

/// Announces its ports, becomes ready and idles until signalled.
pub(crate) const HEALTHY: &str = "exec sleep 60\n";

/// Becomes ready, then dies shortly after.
pub(crate) const CRASH_AFTER_READY: &str = "sleep 1\necho \"fatal: disk on fire\"\nexit 3\n";

/// Crashes after becoming ready the first time; later starts against the
/// same data directory stay up.
pub(crate) const CRASH_ONCE: &str = r#"
if [ -f "$dir/crashed-once" ]; then exec sleep 60; fi
touch "$dir/crashed-once"
sleep 1
echo "fatal: disk on fire"
exit 3
"#;

/// Ignores SIGTERM so only SIGKILL ends it.
pub(crate) const STUBBORN: &str = "trap '' TERM\nwhile true; do sleep 1; done\n";

/// Writes `script_body` after the common flag parsing and announcements.
pub(crate) fn write_script(
    dir: &Path,
    name: &str,
    script_body: &str,
) -> PathBuf {
    let path = dir.join(format!("{name}.sh"));
    std::fs::write(&path, format!("{PARSE_FLAGS}{ANNOUNCE}{script_body}")).unwrap();
    path
}

/// Writes a script that never announces readiness.
pub(crate) fn write_silent_script(dir: &Path) -> PathBuf {
    let path = dir.join("silent.sh");
    std::fs::write(&path, "echo booting\nexec sleep 60\n").unwrap();
    path
}

/// Writes a script that fails before printing anything useful.
pub(crate) fn write_failing_script(dir: &Path) -> PathBuf {
    let path = dir.join("failing.sh");
    std::fs::write(&path, "echo \"cannot open data directory\" 1>&2\nexit 1\n").unwrap();
    path
}

pub(crate) fn server_config(script: &Path) -> ServerConfig {
    ServerConfig {
        binary: PathBuf::from("/bin/sh"),
        binary_args: vec![script.to_string_lossy().into_owned()],
        ready_timeout_ms: 5_000,
        ready_poll_interval_ms: 20,
        stop_grace_ms: 500,
        probe_admin_port: false,
        ..ServerConfig::default()
    }
}

pub(crate) fn launch_settings(
    log_dir: &Path,
    script: &Path,
) -> Arc<LaunchSettings> {
    Arc::new(LaunchSettings::new(server_config(script), "127.0.0.1", log_dir).unwrap())
}
