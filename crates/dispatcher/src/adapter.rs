//! ImplementationAdapter - one-way bridge between two fixed implementations

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use contracts::{BoxedProcessVariable, ContractError, UserType};

use crate::handle::{ShutdownSignal, SteadyState, WorkerHandle};
use crate::metrics::{DataLossCounter, FanOutMetrics, MetricsSnapshot};
use crate::module::{DispatcherConfig, InternalModule};

struct Bridge<T: UserType> {
    source: BoxedProcessVariable<T>,
    sink: BoxedProcessVariable<T>,
    config: DispatcherConfig,
    metrics: Arc<FanOutMetrics>,
    data_loss: DataLossCounter,
}

/// Copies every update of `source` into `sink`, e.g. a device register into a
/// control-system variable.
pub struct ImplementationAdapter<T: UserType> {
    name: String,
    bridge: Option<Bridge<T>>,
    worker: Option<WorkerHandle<Bridge<T>>>,
    metrics: Arc<FanOutMetrics>,
}

impl<T: UserType> ImplementationAdapter<T> {
    pub fn new(
        name: impl Into<String>,
        source: BoxedProcessVariable<T>,
        sink: BoxedProcessVariable<T>,
        config: DispatcherConfig,
        data_loss: DataLossCounter,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        if !source.is_readable() || !sink.is_writeable() {
            return Err(ContractError::illegal_parameter(format!(
                "'{name}' needs a readable source and a writeable sink, got '{}' -> '{}'",
                source.name(),
                sink.name()
            )));
        }
        let metrics = Arc::new(FanOutMetrics::new());
        Ok(Self {
            name,
            bridge: Some(Bridge {
                source,
                sink,
                config,
                metrics: Arc::clone(&metrics),
                data_loss,
            }),
            worker: None,
            metrics,
        })
    }
}

#[async_trait]
impl<T: UserType> InternalModule for ImplementationAdapter<T> {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "adapter_activate", skip(self), fields(dispatcher = %self.name))]
    fn activate(&mut self) -> Result<(), ContractError> {
        if self.worker.is_some() {
            return Err(ContractError::logic(format!(
                "adapter '{}' is already running",
                self.name
            )));
        }
        let bridge = self.bridge.take().ok_or_else(|| {
            ContractError::logic(format!("adapter '{}' lost its endpoints", self.name))
        })?;
        let name = self.name.clone();
        self.worker = Some(WorkerHandle::spawn(&self.name, move |shutdown, steady| {
            run_bridge(name, bridge, shutdown, steady)
        })?);
        info!(dispatcher = %self.name, "adapter activated");
        Ok(())
    }

    async fn deactivate(&mut self) -> Result<(), ContractError> {
        if let Some(worker) = self.worker.take() {
            self.bridge = Some(worker.shutdown().await?);
            info!(dispatcher = %self.name, "adapter deactivated");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    fn has_reached_steady_state(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(WorkerHandle::has_reached_steady_state)
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[instrument(name = "adapter_loop", skip(bridge, shutdown, steady), fields(dispatcher = %name))]
async fn run_bridge<T: UserType>(
    name: String,
    mut bridge: Bridge<T>,
    mut shutdown: ShutdownSignal,
    steady: SteadyState,
) -> Bridge<T> {
    loop {
        let read = tokio::select! {
            biased;
            _ = shutdown.requested() => break,
            r = bridge.source.read() => r,
        };
        match read {
            Ok(sample) => {
                steady.mark();
                bridge.metrics.inc_updates();
                match bridge.sink.write_destructively(sample) {
                    Ok(lost) => {
                        bridge.metrics.inc_sink_writes();
                        observability::record_sink_write(bridge.sink.name(), true);
                        if lost {
                            bridge.metrics.inc_data_loss();
                            bridge.data_loss.increment();
                            observability::record_data_loss(&name);
                            warn!(dispatcher = %name, sink = %bridge.sink.name(), "sink dropped a queued value");
                        }
                    }
                    Err(e) => {
                        bridge.metrics.inc_sink_failures();
                        observability::record_sink_write(bridge.sink.name(), false);
                        error!(dispatcher = %name, error = %e, "sink write failed");
                    }
                }
            }
            Err(e) if e.is_disconnect() => {
                warn!(dispatcher = %name, error = %e, "source disconnected, adapter stops");
                break;
            }
            Err(e) => {
                error!(dispatcher = %name, error = %e, "source read failed");
                tokio::select! {
                    biased;
                    _ = shutdown.requested() => break,
                    _ = tokio::time::sleep(bridge.config.retry_interval) => {}
                }
            }
        }
    }
    debug!(dispatcher = %name, "adapter worker stopped");
    bridge
}
