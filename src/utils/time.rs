use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// return millisecond
pub fn timestamp_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or_default()
}

/// Directory name unique to this run: `<prefix>-<pid>-<millis>`.
pub fn run_dir_name(prefix: &str) -> String {
    format!("{prefix}-{}-{}", std::process::id(), timestamp_millis())
}
