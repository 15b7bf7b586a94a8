//! Version and validity propagation around application endpoints.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use contracts::{
    AccessCapabilities, BoxedProcessVariable, ContractError, DataValidity, EntityOwner,
    ProcessVariable, Sample, TransferElement, TransferElementId, UserType,
};

/// Wraps the runtime implementation of an application endpoint.
///
/// Reads update the owner: a blocking read moves the owner's current version
/// to the version just read, and every ok/faulty transition of the input is
/// reflected in the owner's fault counter. Writes go out faulty if the
/// endpoint was marked faulty locally, otherwise with the owner's validity.
pub struct MetaDataPropagatingDecorator<T: UserType> {
    target: BoxedProcessVariable<T>,
    owner: Arc<EntityOwner>,
    last_read_validity: DataValidity,
    local_validity: DataValidity,
}

impl<T: UserType> MetaDataPropagatingDecorator<T> {
    pub fn new(target: BoxedProcessVariable<T>, owner: Arc<EntityOwner>) -> Self {
        Self {
            target,
            owner,
            last_read_validity: DataValidity::Ok,
            local_validity: DataValidity::Ok,
        }
    }

    pub fn owner(&self) -> &Arc<EntityOwner> {
        &self.owner
    }

    /// Current value of a poll-type input. Counts as a blocking read: the
    /// owner's version follows the value.
    pub fn read_poll(&mut self) -> Result<Option<Sample<T>>, ContractError> {
        let sample = self.target.read_latest()?;
        if let Some(sample) = &sample {
            self.post_read(sample, true);
        }
        Ok(sample)
    }

    /// Validity set by the owning module for this endpoint only.
    pub fn set_data_validity(&mut self, validity: DataValidity) {
        self.local_validity = validity;
    }

    /// Validity the next write will carry.
    pub fn outgoing_validity(&self) -> DataValidity {
        if self.local_validity.is_faulty() {
            DataValidity::Faulty
        } else {
            self.owner.data_validity()
        }
    }

    fn post_read(&mut self, sample: &Sample<T>, blocking: bool) {
        if blocking {
            self.owner.advance_version(sample.version);
        }
        if sample.validity == self.last_read_validity {
            return;
        }
        let count = if sample.validity.is_faulty() {
            let count = self.owner.increment_fault_counter();
            warn!(
                owner = %self.owner.name(),
                variable = %self.target.name(),
                version = %sample.version,
                fault_count = count,
                "input became faulty"
            );
            count
        } else {
            let count = self.owner.decrement_fault_counter();
            info!(
                owner = %self.owner.name(),
                variable = %self.target.name(),
                version = %sample.version,
                fault_count = count,
                "input recovered"
            );
            count
        };
        observability::record_validity_transition(self.owner.name(), sample.validity, count);
        self.last_read_validity = sample.validity;
    }

    fn prepare_write(&self, mut sample: Sample<T>) -> Sample<T> {
        sample.validity = self.outgoing_validity();
        sample
    }
}

impl<T: UserType> TransferElement for MetaDataPropagatingDecorator<T> {
    fn name(&self) -> &str {
        self.target.name()
    }

    fn id(&self) -> TransferElementId {
        self.target.id()
    }

    fn capabilities(&self) -> AccessCapabilities {
        self.target.capabilities()
    }

    fn n_samples(&self) -> usize {
        self.target.n_samples()
    }
}

#[async_trait]
impl<T: UserType> ProcessVariable<T> for MetaDataPropagatingDecorator<T> {
    async fn read(&mut self) -> Result<Sample<T>, ContractError> {
        let sample = self.target.read().await?;
        self.post_read(&sample, true);
        Ok(sample)
    }

    fn read_non_blocking(&mut self) -> Result<Option<Sample<T>>, ContractError> {
        let sample = self.target.read_non_blocking()?;
        if let Some(sample) = &sample {
            self.post_read(sample, false);
        }
        Ok(sample)
    }

    fn read_latest(&mut self) -> Result<Option<Sample<T>>, ContractError> {
        let sample = self.target.read_latest()?;
        if let Some(sample) = &sample {
            self.post_read(sample, false);
        }
        Ok(sample)
    }

    fn write(&mut self, sample: Sample<T>) -> Result<bool, ContractError> {
        let sample = self.prepare_write(sample);
        self.target.write(sample)
    }

    fn write_destructively(&mut self, sample: Sample<T>) -> Result<bool, ContractError> {
        let sample = self.prepare_write(sample);
        self.target.write_destructively(sample)
    }
}
