//! `run` command implementation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use contracts::TopologyBlueprint;
use process_vars::QueueConfig;
use providers::PvManager;
use tracing::{error, info};

use crate::cli::RunArgs;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    // Validate config path
    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    // Load and parse configuration
    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    info!(
        application = %blueprint.application.name,
        devices = blueprint.devices.len(),
        connections = blueprint.connections.len(),
        queue_length = blueprint.application.queue_length,
        "Configuration loaded"
    );

    // Dry run - resolve and print the connection dump
    if args.dry_run {
        info!("Dry run mode - resolving topology without activating it");
        print_resolved_topology(&blueprint)?;
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        blueprint,
        timeout: if args.timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(args.timeout))
        },
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
    };

    let pipeline = Pipeline::new(pipeline_config);

    info!("Starting application...");
    let stats = pipeline
        .run(shutdown_signal())
        .await
        .context("Application run failed")?;

    info!(
        duration_secs = stats.duration.as_secs_f64(),
        updates = stats.summary.total_updates(),
        data_loss = stats.summary.total_data_loss,
        "Application stopped"
    );
    stats.print_summary();

    info!("varnet finished");
    Ok(())
}

/// Completes on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
}

/// Print the resolved connections for dry-run mode
fn print_resolved_topology(blueprint: &TopologyBlueprint) -> Result<()> {
    let control_system = Arc::new(PvManager::new(QueueConfig::from(&blueprint.application)));
    let mut built = app_core::build_from_blueprint(blueprint, control_system)
        .context("Failed to build application from topology")?;
    built
        .app
        .resolve_all()
        .context("Failed to resolve topology")?;

    println!("\n=== Resolved Topology ===\n");
    println!("Application: {}", built.app.name());
    println!("\nConnections:");
    for (name, network) in &built.networks {
        let shape = built
            .app
            .connection_shapes()
            .iter()
            .find(|(id, _)| id == network)
            .map(|(_, shape)| shape.to_string())
            .unwrap_or_else(|| "unresolved".to_string());
        println!("  - {} ({}) -> {}", name, network, shape);
    }
    println!("\nDispatchers: {}", built.app.dispatcher_count());
    println!("\n{}", built.app.dump_connections());
    Ok(())
}
