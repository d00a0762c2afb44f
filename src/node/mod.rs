//! A server node: its static identity and the OS process supervising it.
mod identity;
mod log_watch;
mod serve_options;
mod server_process;

pub use identity::*;
pub use log_watch::LogSignals;
pub use serve_options::*;
pub use server_process::*;

#[cfg(test)]
mod log_watch_test;
#[cfg(test)]
mod server_process_test;
