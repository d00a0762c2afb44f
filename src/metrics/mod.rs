use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;

use crate::Error;
use crate::Result;


lazy_static! {
    pub static ref PROCESS_STARTS: IntCounterVec = IntCounterVec::new(
        Opts::new("process_starts", "Server processes launched"),
        &["node"]
    )
    .expect("metric can not be created");

    pub static ref PROCESS_CRASHES: IntCounterVec = IntCounterVec::new(
        Opts::new("process_crashes", "Server processes that exited without being asked to"),
        &["node"]
    )
    .expect("metric can not be created");

    pub static ref CONVERGENCE_POLLS: IntCounterVec = IntCounterVec::new(
        Opts::new("convergence_polls", "Control-plane polls issued by convergence waits"),
        &["goal"]
    )
    .expect("metric can not be created");

    pub static ref CONVERGENCE_WAIT_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("convergence_wait_seconds", "Time spent waiting for convergence")
            .buckets(exponential_buckets(0.05, 2.0, 12).expect("valid buckets")),
        &["goal", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref WORKLOAD_PHASES: IntCounterVec = IntCounterVec::new(
        Opts::new("workload_phases", "Workload phases by outcome"),
        &["workload", "phase", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref LINK_CHANGES: IntCounterVec = IntCounterVec::new(
        Opts::new("link_changes", "Relay links severed or restored"),
        &["state"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new_custom(Some("harness".to_string()), None)
            .expect("registry can be created");
        register_custom_metrics(&registry);
        registry
    };
}

pub(crate) fn register_custom_metrics(registry: &Registry) {
    // A collector can only live in one registry once; repeated calls are no-ops.
    let _ = registry.register(Box::new(PROCESS_STARTS.clone()));
    let _ = registry.register(Box::new(PROCESS_CRASHES.clone()));
    let _ = registry.register(Box::new(CONVERGENCE_POLLS.clone()));
    let _ = registry.register(Box::new(CONVERGENCE_WAIT_SECONDS.clone()));
    let _ = registry.register(Box::new(WORKLOAD_PHASES.clone()));
    let _ = registry.register(Box::new(LINK_CHANGES.clone()));
}

/// Encodes every harness metric in the Prometheus text format.
pub fn render() -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&REGISTRY.gather())
        .map_err(|e| Error::Io(std::io::Error::other(e)))
}
