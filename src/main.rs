use std::path::Path;
use std::process::ExitCode;

use cluster_harness::file_io::open_file_for_append;
use cluster_harness::metrics;
use cluster_harness::scenario;
use cluster_harness::Error;
use cluster_harness::HarnessConfig;
use cluster_harness::Result;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> ExitCode {
    let mut config = match HarnessConfig::new().and_then(HarnessConfig::validate) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid harness configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let label = format!("{:?}", config.scenario.name).to_lowercase();
    config.cluster = config.cluster.for_run(&label);

    let _guard = match init_observability(&config.cluster.log_dir) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("cannot set up logging under {:?}: {e}", config.cluster.log_dir);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Running {} scenario; data under {:?}, logs under {:?}",
        label, config.cluster.work_dir, config.cluster.log_dir
    );

    // Dropping the scenario future tears the cluster down.
    let outcome = tokio::select! {
        outcome = scenario::run(&config) => outcome,
        interrupted = shutdown_signal() => match interrupted {
            Ok(()) => Err(Error::IllegalState("interrupted".into())),
            Err(e) => Err(e),
        },
    };

    if let Err(e) = write_metrics(&config.cluster.log_dir) {
        warn!("Failed to write metrics: {}", e);
    }

    match outcome {
        Ok(report) => {
            for step in &report.steps {
                info!("  +{:>7}ms  {}", step.at_ms, step.step);
            }
            info!("Scenario {} passed in {}ms", label, report.elapsed_ms);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Scenario {} failed: {}", label, e);
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT detected."),
        _ = sigterm.recv() => info!("SIGTERM detected."),
    }
    Ok(())
}

fn write_metrics(log_dir: &Path) -> Result<()> {
    let path = log_dir.join("metrics.prom");
    std::fs::write(&path, metrics::render()?)?;
    info!("Metrics written to {:?}", path);
    Ok(())
}

fn init_observability(log_dir: &Path) -> Result<WorkerGuard> {
    let log_file = open_file_for_append(&log_dir.join("harness.log"))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(env_filter());
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).with_filter(env_filter());
    tracing_subscriber::registry().with(file_layer).with(stdout_layer).init();

    Ok(guard)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
