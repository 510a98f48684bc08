// Pulse trigger binary entry point

mod cli;

use anyhow::Context;
use common::bootstrap;
use common::config::{CommandConfig, TriggerConfig};
use common::dispatcher::TasksTrigger;
use common::scheduler::IntervalSupervisor;
use common::status::register_status_upload;
use common::telemetry;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = cli::parse();
    if let Err(err) = run_main(args).await {
        error!(error = %format!("{err:#}"), "Pulse trigger failed");
        eprintln!("pulse-trigger error: {err:#}");
        std::process::exit(1);
    }
}

async fn run_main(args: cli::CliArgs) -> anyhow::Result<()> {
    let log_level = args.log_level.as_str();
    let log_handle = telemetry::init_logging(log_level, args.log_format.into())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting pulse trigger");

    let trigger_config = load_trigger_config(&args.config)?;
    let command_config = load_command_config(&args.cmd_config)?;

    telemetry::apply_log_filter(&log_handle, log_level, &trigger_config.log_filter)?;
    if let Some(port) = trigger_config.metrics_port {
        telemetry::init_metrics(port)?;
    }

    let publisher = bootstrap::init_task_publisher(&trigger_config).await?;
    let probe = bootstrap::init_build_probe()?;
    let state_store = bootstrap::init_state_store(&trigger_config);

    let trigger = TasksTrigger::new(
        command_config.clone(),
        publisher,
        probe,
        state_store.clone(),
    )
    .with_clean_at_begin(args.clean);

    let mut supervisor = IntervalSupervisor::new();
    let registered = trigger
        .run(&mut supervisor, args.skip_first_query)
        .await
        .context("Failed to register dispatch jobs")?;
    supervisor.start()?;

    register_status_upload(
        &mut supervisor,
        &trigger_config,
        command_config,
        state_store,
        bootstrap::connect_b2,
    )?;

    info!(jobs = registered, "Pulse trigger running, waiting for shutdown signal");
    wait_for_shutdown().await?;

    info!("Shutdown signal received, stopping supervisor");
    supervisor.shutdown().await;
    info!("Pulse trigger stopped");
    Ok(())
}

fn load_trigger_config(path: &Path) -> anyhow::Result<Arc<TriggerConfig>> {
    let config = TriggerConfig::load_from_path(path).map_err(|e| {
        error!(path = %path.display(), error = %e, "Failed to load trigger config");
        e
    })?;
    info!(
        path = %path.display(),
        pulse_url = %config.pulse_url,
        stream = %config.pulse_stream,
        "Trigger config loaded"
    );
    Ok(Arc::new(config))
}

fn load_command_config(path: &Path) -> anyhow::Result<Arc<CommandConfig>> {
    let config = CommandConfig::load_from_path(path).map_err(|e| {
        error!(path = %path.display(), error = %e, "Failed to load command config");
        e
    })?;
    info!(
        path = %path.display(),
        jobs = config.jobs.len(),
        enabled = config.enabled_jobs().count(),
        "Command config loaded"
    );
    Ok(Arc::new(config))
}

#[cfg(unix)]
async fn wait_for_shutdown() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")
}
