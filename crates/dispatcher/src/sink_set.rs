//! Ordered sink list shared by all fan-out variants.

use std::sync::Arc;
use tracing::{error, warn};

use contracts::{BoxedProcessVariable, ContractError, Sample, UserType};

use crate::error::ErrorCollector;
use crate::metrics::{DataLossCounter, FanOutMetrics};

/// Sinks of one dispatcher plus the optional return-channel sink.
pub struct SinkSet<T: UserType> {
    owner: String,
    n_samples: usize,
    allow_return: bool,
    sinks: Vec<BoxedProcessVariable<T>>,
    return_index: Option<usize>,
    metrics: Arc<FanOutMetrics>,
    data_loss: DataLossCounter,
}

impl<T: UserType> SinkSet<T> {
    pub fn new(
        owner: impl Into<String>,
        n_samples: usize,
        allow_return: bool,
        metrics: Arc<FanOutMetrics>,
        data_loss: DataLossCounter,
    ) -> Self {
        Self {
            owner: owner.into(),
            n_samples,
            allow_return,
            sinks: Vec::new(),
            return_index: None,
            metrics,
            data_loss,
        }
    }

    /// Register a sink.
    ///
    /// Sinks with a sample count other than zero (trigger receivers) must match
    /// the source shape. With return support, the first readable sink becomes
    /// the return-channel sink; a second one is rejected.
    pub fn add(&mut self, sink: BoxedProcessVariable<T>) -> Result<(), ContractError> {
        if !sink.is_writeable() {
            return Err(ContractError::illegal_parameter(format!(
                "sink '{}' of '{}' is not writeable",
                sink.name(),
                self.owner
            )));
        }
        if sink.n_samples() != 0 && sink.n_samples() != self.n_samples {
            return Err(ContractError::illegal_parameter(format!(
                "sink '{}' has {} samples but '{}' distributes {}",
                sink.name(),
                sink.n_samples(),
                self.owner,
                self.n_samples
            )));
        }
        if self.allow_return && sink.is_readable() {
            if let Some(existing) = self.return_index {
                return Err(ContractError::illegal_parameter(format!(
                    "'{}' already has return-channel sink '{}', cannot add '{}'",
                    self.owner,
                    self.sinks[existing].name(),
                    sink.name()
                )));
            }
            self.return_index = Some(self.sinks.len());
        }
        self.sinks.push(sink);
        Ok(())
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn return_index(&self) -> Option<usize> {
        self.return_index
    }

    pub fn return_sink_mut(&mut self) -> Option<&mut BoxedProcessVariable<T>> {
        self.return_index.map(|idx| &mut self.sinks[idx])
    }

    pub fn metrics(&self) -> &Arc<FanOutMetrics> {
        &self.metrics
    }

    /// Wait for a value on the return channel. Never completes without one.
    pub async fn read_return(&mut self) -> Result<Sample<T>, ContractError> {
        match self.return_sink_mut() {
            Some(sink) => sink.read().await,
            None => std::future::pending().await,
        }
    }

    /// Write `sample` to every sink except `skip`.
    ///
    /// All buffers are prepared before the first write: the first target gets
    /// the sample itself, the others get copies. Every sink is attempted; the
    /// failures are reported together afterwards. Returns whether any sink
    /// had to drop an older queued value.
    pub fn distribute(&mut self, sample: Sample<T>, skip: Option<usize>) -> Result<bool, ContractError> {
        let prepared = self.prepare(sample, skip);
        self.metrics.inc_updates();
        observability::record_fan_out_update(&self.owner);

        let mut errors = ErrorCollector::new();
        let mut data_lost = false;
        for (idx, sample) in prepared {
            let sink = &mut self.sinks[idx];
            match sink.write_destructively(sample) {
                Ok(lost) => {
                    self.metrics.inc_sink_writes();
                    observability::record_sink_write(sink.name(), true);
                    if lost {
                        data_lost = true;
                        self.data_loss.increment();
                        self.metrics.inc_data_loss();
                        observability::record_data_loss(&self.owner);
                        warn!(dispatcher = %self.owner, sink = %sink.name(), "sink dropped a queued value");
                    }
                }
                Err(e) => {
                    self.metrics.inc_sink_failures();
                    observability::record_sink_write(sink.name(), false);
                    error!(dispatcher = %self.owner, sink = %sink.name(), error = %e, "sink write failed");
                    errors.collect(e);
                }
            }
        }
        errors.into_result().map(|()| data_lost)
    }

    fn prepare(&self, sample: Sample<T>, skip: Option<usize>) -> Vec<(usize, Sample<T>)> {
        let targets: Vec<usize> = (0..self.sinks.len()).filter(|i| Some(*i) != skip).collect();
        let Some((&first, rest)) = targets.split_first() else {
            return Vec::new();
        };

        let mut prepared = Vec::with_capacity(targets.len());
        for &idx in rest {
            prepared.push((idx, self.shaped(idx, &sample)));
        }
        let first_sample = if self.sinks[first].n_samples() == 0 {
            Sample::empty(sample.version).with_validity(sample.validity)
        } else {
            sample
        };
        prepared.insert(0, (first, first_sample));
        prepared
    }

    fn shaped(&self, idx: usize, sample: &Sample<T>) -> Sample<T> {
        let value = if self.sinks[idx].n_samples() == 0 {
            Vec::new()
        } else {
            sample.value.clone()
        };
        Sample {
            value,
            version: sample.version,
            validity: sample.validity,
        }
    }
}
