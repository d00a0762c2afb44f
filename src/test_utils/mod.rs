//! Stand-ins shared by unit tests: shell scripts posing as the server binary
//! and in-process admin HTTP interfaces, for one member or a whole cluster.
pub(crate) mod fake_server;
pub(crate) mod mock_control_plane;
pub(crate) mod simulated_cluster;
