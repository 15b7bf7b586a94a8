//! ThreadedFanOut - active fan-out for push-fed networks

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use contracts::{BoxedProcessVariable, ContractError, DataValidity, Sample, UserType, VersionNumber};

use crate::handle::{ShutdownSignal, SteadyState, WorkerHandle};
use crate::metrics::{DataLossCounter, FanOutMetrics, MetricsSnapshot};
use crate::module::{DispatcherConfig, InternalModule};
use crate::sink_set::SinkSet;

/// Source and sinks, owned by the worker while it runs.
struct FanOutCore<T: UserType> {
    source: BoxedProcessVariable<T>,
    sinks: SinkSet<T>,
    config: DispatcherConfig,
}

enum Update<T> {
    Source(Result<Sample<T>, ContractError>),
    Return(Result<Sample<T>, ContractError>),
}

/// Reads from one push-type source and writes every update to all sinks.
///
/// If built with [`ThreadedFanOut::with_return`], one readable sink may act
/// as return channel: values written into it are written back to the source
/// and forwarded to the other sinks.
pub struct ThreadedFanOut<T: UserType> {
    name: String,
    core: Option<FanOutCore<T>>,
    worker: Option<WorkerHandle<FanOutCore<T>>>,
    metrics: Arc<FanOutMetrics>,
}

impl<T: UserType> ThreadedFanOut<T> {
    pub fn new(
        name: impl Into<String>,
        source: BoxedProcessVariable<T>,
        config: DispatcherConfig,
        data_loss: DataLossCounter,
    ) -> Result<Self, ContractError> {
        Self::build(name.into(), source, config, data_loss, false)
    }

    /// Variant with a return channel. The source must be writeable.
    pub fn with_return(
        name: impl Into<String>,
        source: BoxedProcessVariable<T>,
        config: DispatcherConfig,
        data_loss: DataLossCounter,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        if !source.is_writeable() {
            return Err(ContractError::illegal_parameter(format!(
                "source '{}' of '{name}' cannot take values from a return channel",
                source.name()
            )));
        }
        Self::build(name, source, config, data_loss, true)
    }

    fn build(
        name: String,
        source: BoxedProcessVariable<T>,
        config: DispatcherConfig,
        data_loss: DataLossCounter,
        with_return: bool,
    ) -> Result<Self, ContractError> {
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
            with_return,
            Arc::clone(&metrics),
            data_loss,
        );
        Ok(Self {
            name,
            core: Some(FanOutCore {
                source,
                sinks,
                config,
            }),
            worker: None,
            metrics,
        })
    }

    /// Register a sink. Only possible while the worker is stopped.
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

    pub fn n_slaves(&self) -> Option<usize> {
        self.core.as_ref().map(|c| c.sinks.len())
    }
}

#[async_trait]
impl<T: UserType> InternalModule for ThreadedFanOut<T> {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "threaded_fanout_activate", skip(self), fields(dispatcher = %self.name))]
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
            run_fan_out(name, core, shutdown, steady)
        })?);
        info!(dispatcher = %self.name, "fan-out activated");
        Ok(())
    }

    #[instrument(name = "threaded_fanout_deactivate", skip(self), fields(dispatcher = %self.name))]
    async fn deactivate(&mut self) -> Result<(), ContractError> {
        let Some(worker) = self.worker.take() else {
            debug!(dispatcher = %self.name, "fan-out not running");
            return Ok(());
        };
        self.core = Some(worker.shutdown().await?);
        info!(dispatcher = %self.name, "fan-out deactivated");
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

#[instrument(name = "threaded_fanout_loop", skip(core, shutdown, steady), fields(dispatcher = %name))]
async fn run_fan_out<T: UserType>(
    name: String,
    mut core: FanOutCore<T>,
    mut shutdown: ShutdownSignal,
    steady: SteadyState,
) -> FanOutCore<T> {
    debug!(dispatcher = %name, sinks = core.sinks.len(), "fan-out worker started");

    let mut last: Option<Sample<T>> = None;
    let mut pending: Option<(Sample<T>, Option<usize>)> = None;
    // 首个源值到达前只等源和停机，回写通道不参与
    let mut primed = false;

    loop {
        if let Some((sample, skip)) = pending.take() {
            if let Err(e) = core.sinks.distribute(sample.clone(), skip) {
                error!(dispatcher = %name, error = %e, "distribution incomplete");
            }
            last = Some(sample);
        }

        let update = tokio::select! {
            biased;
            _ = shutdown.requested() => break,
            r = core.source.read() => Update::Source(r),
            r = core.sinks.read_return(), if primed => Update::Return(r),
        };

        match update {
            Update::Source(Ok(sample)) => {
                primed = true;
                if steady.mark() {
                    debug!(dispatcher = %name, "initial value received");
                }
                pending = Some((sample, None));
            }
            Update::Return(Ok(returned)) => {
                core.sinks.metrics().inc_return_updates();
                let version = last
                    .as_ref()
                    .map_or(returned.version, |l| l.version.max(returned.version));
                let sample = Sample {
                    value: returned.value,
                    version,
                    validity: returned.validity,
                };
                if let Err(e) = core.source.write(sample.clone()) {
                    error!(dispatcher = %name, error = %e, "write back to source failed");
                }
                pending = Some((sample, core.sinks.return_index()));
            }
            Update::Source(Err(e)) | Update::Return(Err(e)) => {
                if e.is_disconnect() {
                    warn!(dispatcher = %name, error = %e, "input disconnected, fan-out stops");
                    break;
                }
                error!(dispatcher = %name, error = %e, "read failed");
                if let Some((sample, _)) = faulty_copy(&last) {
                    if let Err(e) = core.sinks.distribute(sample.clone(), None) {
                        error!(dispatcher = %name, error = %e, "distribution incomplete");
                    }
                    last = Some(sample);
                }
                tokio::select! {
                    biased;
                    _ = shutdown.requested() => break,
                    _ = tokio::time::sleep(core.config.retry_interval) => {}
                }
            }
        }
    }

    debug!(dispatcher = %name, "fan-out worker stopped");
    core
}

/// Last value re-stamped as faulty, unless it already was.
pub(crate) fn faulty_copy<T: UserType>(last: &Option<Sample<T>>) -> Option<(Sample<T>, Option<usize>)> {
    last.as_ref()
        .filter(|s| !s.validity.is_faulty())
        .map(|s| {
            (
                Sample {
                    value: s.value.clone(),
                    version: VersionNumber::new(),
                    validity: DataValidity::Faulty,
                },
                None,
            )
        })
}
