//! ConsumingFanOut - passive fan-out driven by a polling application consumer

use async_trait::async_trait;
use std::sync::Arc;

use contracts::{
    AccessCapabilities, BoxedProcessVariable, ContractError, ProcessVariable, Sample,
    TransferElement, TransferElementId, UserType,
};

use crate::metrics::{DataLossCounter, FanOutMetrics, MetricsSnapshot};
use crate::sink_set::SinkSet;

/// Implementation of the single polling consumer of a network with a
/// poll-type feeder. Whatever the consumer reads from the feeder is passed on
/// to the remaining consumers.
pub struct ConsumingFanOut<T: UserType> {
    name: String,
    id: TransferElementId,
    source: BoxedProcessVariable<T>,
    sinks: SinkSet<T>,
    metrics: Arc<FanOutMetrics>,
}

impl<T: UserType> ConsumingFanOut<T> {
    pub fn new(
        name: impl Into<String>,
        source: BoxedProcessVariable<T>,
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
            id: TransferElementId::new(),
            source,
            sinks,
            metrics,
        })
    }

    pub fn add_slave(&mut self, sink: BoxedProcessVariable<T>) -> Result<(), ContractError> {
        self.sinks.add(sink)
    }

    pub fn metrics_handle(&self) -> Arc<FanOutMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn pass_on(&mut self, sample: Option<Sample<T>>) -> Result<Option<Sample<T>>, ContractError> {
        if let Some(sample) = &sample {
            if !self.sinks.is_empty() {
                self.sinks.distribute(sample.clone(), None)?;
            }
        }
        Ok(sample)
    }
}

impl<T: UserType> TransferElement for ConsumingFanOut<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> TransferElementId {
        self.id
    }

    fn capabilities(&self) -> AccessCapabilities {
        AccessCapabilities::READ_ONLY
    }

    fn n_samples(&self) -> usize {
        self.source.n_samples()
    }
}

#[async_trait]
impl<T: UserType> ProcessVariable<T> for ConsumingFanOut<T> {
    async fn read(&mut self) -> Result<Sample<T>, ContractError> {
        let sample = self.source.read().await?;
        if !self.sinks.is_empty() {
            self.sinks.distribute(sample.clone(), None)?;
        }
        Ok(sample)
    }

    fn read_non_blocking(&mut self) -> Result<Option<Sample<T>>, ContractError> {
        let polled = self.source.read_non_blocking()?;
        self.pass_on(polled)
    }

    fn read_latest(&mut self) -> Result<Option<Sample<T>>, ContractError> {
        let latest = self.source.read_latest()?;
        self.pass_on(latest)
    }

    fn write(&mut self, _sample: Sample<T>) -> Result<bool, ContractError> {
        Err(ContractError::logic(format!("'{}' is read-only", self.name)))
    }
}
