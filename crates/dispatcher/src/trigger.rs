//! TriggerFanOut - poll-type feeder driven by an external trigger

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use contracts::{
    BoxedProcessVariable, ContractError, DataValidity, Sample, TriggerSource, UserType,
};

use crate::handle::{ShutdownSignal, SteadyState, WorkerHandle};
use crate::metrics::{DataLossCounter, FanOutMetrics, MetricsSnapshot};
use crate::module::{DispatcherConfig, InternalModule};
use crate::sink_set::SinkSet;

struct TriggerCore<T: UserType> {
    trigger: Box<dyn TriggerSource>,
    source: BoxedProcessVariable<T>,
    sinks: SinkSet<T>,
    config: DispatcherConfig,
}

/// On every trigger, reads the latest feeder value and writes it to all sinks
/// stamped with the trigger's version.
pub struct TriggerFanOut<T: UserType> {
    name: String,
    core: Option<TriggerCore<T>>,
    worker: Option<WorkerHandle<TriggerCore<T>>>,
    metrics: Arc<FanOutMetrics>,
}

impl<T: UserType> TriggerFanOut<T> {
    pub fn new(
        name: impl Into<String>,
        trigger: Box<dyn TriggerSource>,
        source: BoxedProcessVariable<T>,
        config: DispatcherConfig,
        data_loss: DataLossCounter,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        if !source.is_readable() {
            return Err(ContractError::illegal_parameter(format!(
                "source '{}' of '{name}' is not readable",
                source.name()
            )));
        }
        let metrics = Arc::new(FanOutMetrics::new());
        let sinks = SinkSet::new(
            name.clone(),
            source.n_samples(),
            false,
            Arc::clone(&metrics),
            data_loss,
        );
        Ok(Self {
            name,
            core: Some(TriggerCore {
                trigger,
                source,
                sinks,
                config,
            }),
            worker: None,
            metrics,
        })
    }

    pub fn add_slave(&mut self, sink: BoxedProcessVariable<T>) -> Result<(), ContractError> {
        match self.core.as_mut() {
            Some(core) => core.sinks.add(sink),
            None => Err(ContractError::logic(format!(
                "cannot add sink '{}' to running fan-out '{}'",
                sink.name(),
                self.name
            ))),
        }
    }
}

#[async_trait]
impl<T: UserType> InternalModule for TriggerFanOut<T> {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "trigger_fanout_activate", skip(self), fields(dispatcher = %self.name))]
    fn activate(&mut self) -> Result<(), ContractError> {
        if self.worker.is_some() {
            return Err(ContractError::logic(format!(
                "fan-out '{}' is already running",
                self.name
            )));
        }
        let core = self.core.take().ok_or_else(|| {
            ContractError::logic(format!("fan-out '{}' lost its source", self.name))
        })?;
        let name = self.name.clone();
        self.worker = Some(WorkerHandle::spawn(&self.name, move |shutdown, steady| {
            run_trigger_fan_out(name, core, shutdown, steady)
        })?);
        info!(dispatcher = %self.name, "trigger fan-out activated");
        Ok(())
    }

    #[instrument(name = "trigger_fanout_deactivate", skip(self), fields(dispatcher = %self.name))]
    async fn deactivate(&mut self) -> Result<(), ContractError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.core = Some(worker.shutdown().await?);
        info!(dispatcher = %self.name, "trigger fan-out deactivated");
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

#[instrument(name = "trigger_fanout_loop", skip(core, shutdown, steady), fields(dispatcher = %name))]
async fn run_trigger_fan_out<T: UserType>(
    name: String,
    mut core: TriggerCore<T>,
    mut shutdown: ShutdownSignal,
    steady: SteadyState,
) -> TriggerCore<T> {
    debug!(dispatcher = %name, trigger = %core.trigger.name(), "trigger fan-out worker started");
    let mut last: Option<Sample<T>> = None;

    loop {
        let fired = tokio::select! {
            biased;
            _ = shutdown.requested() => break,
            r = core.trigger.wait_for_trigger() => r,
        };

        let version = match fired {
            Ok(version) => version,
            Err(e) if e.is_disconnect() => {
                warn!(dispatcher = %name, error = %e, "trigger disconnected, fan-out stops");
                break;
            }
            Err(e) => {
                error!(dispatcher = %name, error = %e, "trigger read failed");
                tokio::select! {
                    biased;
                    _ = shutdown.requested() => break,
                    _ = tokio::time::sleep(core.config.retry_interval) => continue,
                }
            }
        };
        steady.mark();

        let sample = match core.source.read_latest() {
            Ok(Some(sample)) => Some(Sample {
                value: sample.value,
                version,
                validity: sample.validity,
            }),
            // Nothing new on a push-type feeder: repeat the last value.
            Ok(None) => last.as_ref().map(|l| Sample {
                value: l.value.clone(),
                version,
                validity: l.validity,
            }),
            Err(e) if e.is_disconnect() => {
                warn!(dispatcher = %name, error = %e, "feeder disconnected, fan-out stops");
                break;
            }
            Err(e) => {
                error!(dispatcher = %name, error = %e, "feeder read failed");
                last.as_ref().map(|l| Sample {
                    value: l.value.clone(),
                    version,
                    validity: DataValidity::Faulty,
                })
            }
        };

        let Some(sample) = sample else {
            debug!(dispatcher = %name, %version, "trigger without feeder value");
            continue;
        };
        if let Err(e) = core.sinks.distribute(sample.clone(), None) {
            error!(dispatcher = %name, error = %e, "distribution incomplete");
        }
        last = Some(sample);
    }

    debug!(dispatcher = %name, "trigger fan-out worker stopped");
    core
}
