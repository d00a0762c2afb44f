//! Client for a cluster member's administrative HTTP interface.
//!
//! Covers topology mutation (datacenters, tables, replica placement, shard
//! boundaries), cluster queries, issue assertions and the convergence waits
//! scenarios use between phases.

mod client;
mod convergence;
pub mod issues;
mod protocol;
mod topology;

pub use client::*;
pub use convergence::*;
pub use issues::Issue;
pub use issues::IssueExpectation;
pub use issues::IssueKind;
pub use protocol::*;
pub use topology::*;

#[cfg(test)]
mod topology_test;
