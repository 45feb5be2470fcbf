//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::StopSignal;
use tracing::{error, info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{load_seed_file, manual_items, Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading settings");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load settings from {}", args.config.display()))?;

    // Apply CLI overrides
    if let Some(workers) = args.workers {
        info!(workers, "Overriding worker count from CLI");
        blueprint.dispatcher.workers = workers;
    }
    if args.wait_forever {
        blueprint.dispatcher.wait_forever = true;
    }
    config_loader::ConfigLoader::validate(&blueprint).context("Invalid CLI overrides")?;

    info!(
        queue = %blueprint.queue.name,
        routes = blueprint.routes.len(),
        workers = blueprint.dispatcher.workers,
        wait_forever = blueprint.dispatcher.wait_forever,
        "Settings loaded"
    );

    if args.dry_run {
        info!("Dry run mode - settings are valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let mut seeds = Vec::new();
    if let Some(bucket) = &args.bucket {
        seeds.extend(manual_items(bucket, &args.key)?);
    }
    if let Some(path) = &args.seed {
        seeds.extend(load_seed_file(path)?);
    }

    let pipeline = Pipeline::new(PipelineConfig {
        blueprint,
        seeds,
        metrics_port: (args.metrics_port != 0).then_some(args.metrics_port),
    });

    let stop = StopSignal::new();
    let signal_task = tokio::spawn(cancel_on_shutdown_signal(stop.clone()));

    info!("Starting dispatcher...");
    let result = pipeline.run(stop).await;
    signal_task.abort();

    let stats = result.context("Dispatcher run failed")?;
    info!(
        popped = stats.dispatch.popped,
        committed = stats.dispatch.committed,
        rejected = stats.dispatch.rejected,
        duration_secs = stats.duration.as_secs_f64(),
        throughput = format!("{:.2}", stats.throughput()),
        "Dispatcher finished"
    );
    stats.print_summary();

    Ok(())
}

/// Cancel `stop` on Ctrl+C or SIGTERM
///
/// Workers finish the item in hand before exiting.
async fn cancel_on_shutdown_signal(stop: StopSignal) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Received shutdown signal, stopping workers...");
    stop.cancel();
}

/// Print settings summary for dry-run mode
fn print_config_summary(blueprint: &contracts::PipelineBlueprint) {
    println!("\n=== Settings Summary ===\n");
    println!("Queue: {}", blueprint.queue.name);
    println!("Storage: {:?}", blueprint.storage);
    println!(
        "Dispatcher: {} worker(s), attempts {}..{}",
        blueprint.dispatcher.workers,
        blueprint.dispatcher.min_attempts,
        blueprint.dispatcher.max_attempts
    );

    println!("\nRoutes ({}):", blueprint.routes.len());
    for route in &blueprint.routes {
        println!(
            "  - {}: {} --{}({:?})--> {}",
            route.name,
            route.source.bucket,
            route.transform,
            route.transform_kind,
            route.destination.name()
        );
    }

    println!();
}
