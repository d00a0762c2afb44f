//! Cluster orchestration and fault-injection harness.
//!
//! Starts real server processes, routes every inter-node connection through
//! relays it can cut ([`partition`]), drives the admin HTTP interface
//! ([`control_plane`]) and runs external workloads around topology changes
//! ([`workload`]). [`scenario`] strings these together into the canned tests
//! run by the `cluster-harness` binary.
mod config;
pub mod control_plane;
mod errors;
pub mod metrics;
pub mod node;
pub mod partition;
pub mod scenario;
pub mod utils;
pub mod workload;

pub use config::*;
pub use errors::*;
pub use utils::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
