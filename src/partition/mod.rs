//! Partition simulation: connectivity groups of server processes, the relays
//! that carry traffic between them, and the registry that owns it all.
mod group;
mod health_monitor;
mod link_proxy;
mod registry;
mod view;

use std::fmt;

pub use group::*;
pub use health_monitor::*;
pub use link_proxy::*;
pub use registry::*;
pub use view::*;


/// Registry-scoped handle of one server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "process#{}", self.0)
    }
}

/// Registry-scoped handle of one connectivity group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}
