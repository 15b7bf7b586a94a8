//! FeedingFanOut - passive fan-out driven by an application feeder's writes

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use contracts::{
    AccessCapabilities, BoxedProcessVariable, ContractError, ProcessVariable, Sample,
    TransferElement, TransferElementId, UserType,
};

use crate::metrics::{DataLossCounter, FanOutMetrics, MetricsSnapshot};
use crate::sink_set::SinkSet;

/// Implementation handed to an application feeder whose network has several
/// consumers. Each write is distributed synchronously on the caller's task.
///
/// With a return channel, reading blocks on the return sink and re-broadcasts
/// the returned value to every other sink.
pub struct FeedingFanOut<T: UserType> {
    name: String,
    id: TransferElementId,
    with_return: bool,
    sinks: SinkSet<T>,
    metrics: Arc<FanOutMetrics>,
}

impl<T: UserType> FeedingFanOut<T> {
    pub fn new(
        name: impl Into<String>,
        n_samples: usize,
        with_return: bool,
        data_loss: DataLossCounter,
    ) -> Self {
        let name = name.into();
        let metrics = Arc::new(FanOutMetrics::new());
        let sinks = SinkSet::new(
            name.clone(),
            n_samples,
            with_return,
            Arc::clone(&metrics),
            data_loss,
        );
        Self {
            name,
            id: TransferElementId::new(),
            with_return,
            sinks,
            metrics,
        }
    }

    pub fn add_slave(&mut self, sink: BoxedProcessVariable<T>) -> Result<(), ContractError> {
        self.sinks.add(sink)
    }

    pub fn n_slaves(&self) -> usize {
        self.sinks.len()
    }

    /// Shared handle to the counters, readable after the fan-out was handed away.
    pub fn metrics_handle(&self) -> Arc<FanOutMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn require_return(&self) -> Result<(), ContractError> {
        if self.with_return {
            Ok(())
        } else {
            Err(ContractError::logic(format!(
                "'{}' has no return channel",
                self.name
            )))
        }
    }

    fn rebroadcast(&mut self, sample: &Sample<T>) -> Result<(), ContractError> {
        self.metrics.inc_return_updates();
        observability::record_return_update(&self.name);
        let skip = self.sinks.return_index();
        debug!(dispatcher = %self.name, version = %sample.version, "re-broadcasting returned value");
        self.sinks.distribute(sample.clone(), skip).map(|_| ())
    }
}

impl<T: UserType> TransferElement for FeedingFanOut<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> TransferElementId {
        self.id
    }

    fn capabilities(&self) -> AccessCapabilities {
        AccessCapabilities {
            readable: self.with_return,
            writeable: true,
            with_return: self.with_return,
        }
    }

    fn n_samples(&self) -> usize {
        self.sinks.n_samples()
    }
}

#[async_trait]
impl<T: UserType> ProcessVariable<T> for FeedingFanOut<T> {
    #[instrument(name = "feeding_fanout_read", skip(self), fields(dispatcher = %self.name))]
    async fn read(&mut self) -> Result<Sample<T>, ContractError> {
        self.require_return()?;
        let sample = self.sinks.read_return().await?;
        self.rebroadcast(&sample)?;
        Ok(sample)
    }

    fn read_non_blocking(&mut self) -> Result<Option<Sample<T>>, ContractError> {
        self.require_return()?;
        let polled = match self.sinks.return_sink_mut() {
            Some(sink) => sink.read_non_blocking()?,
            None => None,
        };
        if let Some(sample) = &polled {
            self.rebroadcast(sample)?;
        }
        Ok(polled)
    }

    fn write(&mut self, sample: Sample<T>) -> Result<bool, ContractError> {
        self.sinks.distribute(sample, None)
    }
}
