use super::log_watch::LogMarkers;
use super::log_watch::LogSignals;
use super::log_watch::OutputTail;
use super::ServerPorts;
use crate::config::ServerConfig;

fn markers() -> LogMarkers {
    LogMarkers::from_config(&ServerConfig::default()).unwrap()
}

#[test]
fn observe_collects_ports_and_ready_marker() {
    let markers = markers();
    let mut signals = LogSignals::default();

    assert!(!markers.observe("Running rethinkdb 2.4", &mut signals));
    assert!(markers.observe("Listening for intracluster connections on port 29015", &mut signals));
    assert!(markers.observe(
        "Listening for administrative HTTP connections on port 8080",
        &mut signals
    ));
    assert!(signals.reported_ports().is_none());
    assert!(markers.observe("Listening for client driver connections on port 28015", &mut signals));
    assert!(!signals.ready_seen);
    assert!(markers.observe("Server ready, \"n1\" 4f3c", &mut signals));

    assert!(signals.ready_seen);
    assert_eq!(signals.lines, 5);
    assert_eq!(
        signals.reported_ports(),
        Some(ServerPorts {
            cluster: 29015,
            http_admin: 8080,
            client_driver: 28015,
        })
    );
}

#[test]
fn observe_uses_configured_patterns() {
    let config = ServerConfig {
        ready_marker: "UP".into(),
        http_port_pattern: r"admin=(\d+)".into(),
        ..ServerConfig::default()
    };
    let markers = LogMarkers::from_config(&config).unwrap();
    let mut signals = LogSignals::default();

    markers.observe("admin=9999", &mut signals);
    markers.observe("UP", &mut signals);

    assert_eq!(signals.http_port, Some(9999));
    assert!(signals.ready_seen);
}

#[test]
fn output_tail_keeps_last_lines() {
    let mut tail = OutputTail::new(2);
    tail.push("a".into());
    tail.push("b".into());
    tail.push("c".into());

    assert_eq!(tail.render(), "b\nc");
}
