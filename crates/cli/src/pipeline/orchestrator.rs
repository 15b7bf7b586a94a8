//! Pipeline orchestrator - builds the application and drives its lifecycle.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use app_core::build_from_blueprint;
use contracts::TopologyBlueprint;
use process_vars::QueueConfig;
use providers::PvManager;
use tracing::{info, warn};

use super::PipelineStats;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The topology blueprint
    pub blueprint: TopologyBlueprint,

    /// Pipeline timeout (None = run until shutdown)
    pub timeout: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until `shutdown` completes or the timeout expires, then shut the
    /// application down and report its statistics.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<PipelineStats> {
        let blueprint = &self.config.blueprint;

        // Initialize Metrics (optional)
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let control_system = Arc::new(PvManager::new(QueueConfig::from(&blueprint.application)));
        let built = build_from_blueprint(blueprint, control_system.clone())
            .context("Failed to build application from topology")?;
        let mut app = built.app;

        app.run().await.context("Failed to start application")?;
        let start_time = Instant::now();
        info!(
            application = %app.name(),
            networks = app.connection_shapes().len(),
            dispatchers = app.dispatcher_count(),
            variables = ?control_system.variable_names(),
            "Application running"
        );

        let timeout = async {
            match self.config.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = shutdown => {
                warn!("Received shutdown signal, stopping application...");
            }
            _ = timeout => {
                info!("Timeout reached, stopping application...");
            }
        }

        let shutdown_result = app.shutdown().await;
        let stats = PipelineStats {
            duration: start_time.elapsed(),
            networks: app.connection_shapes().len(),
            dispatchers: app.dispatcher_count(),
            devices: built.devices.len(),
            published_variables: control_system.variable_names().len(),
            all_reached_steady_state: app.all_reached_steady_state(),
            summary: app.metrics_summary(),
        };
        shutdown_result.context("Application did not shut down cleanly")?;
        Ok(stats)
    }
}
