//! Application-facing endpoint handles.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use contracts::{
    AccessCapabilities, ContractError, DataValidity, Direction, EntityOwner, ImplementationSlot,
    ProcessVariable, Sample, TransferElementId, UpdateMode, UserType, VariableName,
    VersionNumber,
};
use network::NodeId;

use crate::decorator::MetaDataPropagatingDecorator;

/// Typed endpoint of an application module.
///
/// Holds its own buffer (`value`, version, validity). The runtime
/// implementation is picked up from the slot the resolver filled, on first
/// transfer.
pub struct Accessor<T: UserType> {
    name: VariableName,
    id: TransferElementId,
    node: NodeId,
    owner: Arc<EntityOwner>,
    slot: ImplementationSlot,
    direction: Direction,
    mode: UpdateMode,
    with_return: bool,
    n_samples: usize,
    implementation: Option<MetaDataPropagatingDecorator<T>>,
    local_validity: DataValidity,
    value: Vec<T>,
    version: VersionNumber,
    validity: DataValidity,
}

pub(crate) struct AccessorDecl {
    pub name: VariableName,
    pub node: NodeId,
    pub owner: Arc<EntityOwner>,
    pub slot: ImplementationSlot,
    pub direction: Direction,
    pub mode: UpdateMode,
    pub with_return: bool,
    pub n_samples: usize,
}

impl<T: UserType> Accessor<T> {
    pub(crate) fn new(decl: AccessorDecl) -> Self {
        Self {
            name: decl.name,
            id: TransferElementId::new(),
            node: decl.node,
            owner: decl.owner,
            slot: decl.slot,
            direction: decl.direction,
            mode: decl.mode,
            with_return: decl.with_return,
            value: vec![T::default(); decl.n_samples],
            n_samples: decl.n_samples,
            implementation: None,
            local_validity: DataValidity::Ok,
            version: VersionNumber::null(),
            validity: DataValidity::Ok,
        }
    }

    pub fn name(&self) -> &VariableName {
        &self.name
    }

    pub fn id(&self) -> TransferElementId {
        self.id
    }

    /// Node to pass to `Application::connect`.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn owner(&self) -> &Arc<EntityOwner> {
        &self.owner
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    pub fn capabilities(&self) -> AccessCapabilities {
        AccessCapabilities::for_direction(self.direction, self.with_return)
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn value(&self) -> &[T] {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut Vec<T> {
        &mut self.value
    }

    /// First element of the buffer.
    pub fn get(&self) -> T {
        self.value.first().cloned().unwrap_or_default()
    }

    /// Set the first element of the buffer.
    pub fn set(&mut self, value: T) {
        match self.value.first_mut() {
            Some(first) => *first = value,
            None => self.value.push(value),
        }
    }

    pub fn version(&self) -> VersionNumber {
        self.version
    }

    /// Validity of the last value read or written.
    pub fn data_validity(&self) -> DataValidity {
        self.validity
    }

    /// Mark this endpoint's outgoing values faulty (or ok again).
    pub fn set_data_validity(&mut self, validity: DataValidity) {
        self.local_validity = validity;
        if let Some(implementation) = self.implementation.as_mut() {
            implementation.set_data_validity(validity);
        }
    }

    /// Wait for the next value. Poll-type inputs return at once with the
    /// current value.
    pub async fn read(&mut self) -> Result<(), ContractError> {
        self.require(self.capabilities().readable, "read")?;
        if self.mode == UpdateMode::Poll {
            let polled = self.bind()?.read_poll()?;
            self.store_polled(polled);
            return Ok(());
        }
        let sample = self.bind()?.read().await?;
        self.store(sample);
        Ok(())
    }

    /// Returns whether a new value was received.
    pub fn read_non_blocking(&mut self) -> Result<bool, ContractError> {
        self.require(self.capabilities().readable, "read")?;
        let polled = self.bind()?.read_non_blocking()?;
        Ok(self.store_polled(polled))
    }

    /// Returns whether a new value was received.
    pub fn read_latest(&mut self) -> Result<bool, ContractError> {
        self.require(self.capabilities().readable, "read")?;
        let polled = self.bind()?.read_latest()?;
        Ok(self.store_polled(polled))
    }

    /// Write the buffer with the owner's current version. Returns whether a
    /// receiver had to drop an older value.
    pub fn write(&mut self) -> Result<bool, ContractError> {
        let version = self.next_version();
        self.write_with_version(version)
    }

    /// Like [`Accessor::write`]; the buffer content is unspecified afterwards.
    pub fn write_destructively(&mut self) -> Result<bool, ContractError> {
        self.require(self.capabilities().writeable, "write")?;
        self.bind()?;
        let version = self.next_version();
        let value = std::mem::take(&mut self.value);
        let implementation = self.bind()?;
        let lost = implementation.write_destructively(Sample::new(value, version))?;
        let validity = implementation.outgoing_validity();
        self.validity = validity;
        self.version = version;
        self.value = vec![T::default(); self.n_samples];
        Ok(lost)
    }

    pub fn write_with_version(&mut self, version: VersionNumber) -> Result<bool, ContractError> {
        self.require(self.capabilities().writeable, "write")?;
        let sample = Sample::new(self.value.clone(), version);
        let implementation = self.bind()?;
        let lost = implementation.write(sample)?;
        let validity = implementation.outgoing_validity();
        self.validity = validity;
        self.version = version;
        Ok(lost)
    }

    /// Owner's current version, or a fresh one if this accessor already
    /// wrote it.
    fn next_version(&self) -> VersionNumber {
        let current = self.owner.current_version();
        if current.is_null() || current <= self.version {
            let fresh = VersionNumber::new();
            self.owner.advance_version(fresh);
            fresh
        } else {
            current
        }
    }

    fn require(&self, allowed: bool, operation: &str) -> Result<(), ContractError> {
        if allowed {
            Ok(())
        } else {
            Err(ContractError::logic(format!(
                "cannot {operation} '{}' ({} endpoint)",
                self.name, self.direction
            )))
        }
    }

    fn bind(&mut self) -> Result<&mut MetaDataPropagatingDecorator<T>, ContractError> {
        if self.implementation.is_none() {
            let erased = self.slot.take().ok_or_else(|| {
                ContractError::logic(format!(
                    "'{}' has no implementation; is it connected and the application resolved?",
                    self.name
                ))
            })?;
            let mut decorator = MetaDataPropagatingDecorator::new(erased.downcast::<T>()?, self.owner.clone());
            decorator.set_data_validity(self.local_validity);
            debug!(variable = %self.name, owner = %self.owner.name(), "accessor bound");
            self.implementation = Some(decorator);
        }
        self.implementation
            .as_mut()
            .ok_or_else(|| ContractError::logic(format!("'{}' lost its implementation", self.name)))
    }

    fn store(&mut self, sample: Sample<T>) {
        // trigger-only networks deliver no payload
        if !sample.value.is_empty() {
            self.value = sample.value;
        }
        self.version = sample.version;
        self.validity = sample.validity;
    }

    fn store_polled(&mut self, polled: Option<Sample<T>>) -> bool {
        match polled {
            Some(sample) => {
                self.store(sample);
                true
            }
            None => false,
        }
    }
}

/// Value-type independent view of an [`Accessor`], used by the group helpers
/// in [`crate::module`].
#[async_trait]
pub trait VariableHandle: Send {
    fn name(&self) -> &str;

    fn id(&self) -> TransferElementId;

    fn direction(&self) -> Direction;

    fn mode(&self) -> UpdateMode;

    fn version(&self) -> VersionNumber;

    async fn read(&mut self) -> Result<(), ContractError>;

    fn read_non_blocking(&mut self) -> Result<bool, ContractError>;

    fn read_latest(&mut self) -> Result<bool, ContractError>;

    fn write_with_version(&mut self, version: VersionNumber) -> Result<bool, ContractError>;
}

#[async_trait]
impl<T: UserType> VariableHandle for Accessor<T> {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn id(&self) -> TransferElementId {
        self.id
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn mode(&self) -> UpdateMode {
        self.mode
    }

    fn version(&self) -> VersionNumber {
        self.version
    }

    async fn read(&mut self) -> Result<(), ContractError> {
        Accessor::read(self).await
    }

    fn read_non_blocking(&mut self) -> Result<bool, ContractError> {
        Accessor::read_non_blocking(self)
    }

    fn read_latest(&mut self) -> Result<bool, ContractError> {
        Accessor::read_latest(self)
    }

    fn write_with_version(&mut self, version: VersionNumber) -> Result<bool, ContractError> {
        Accessor::write_with_version(self, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Application;
    use contracts::{ApplicationConfig, ValueType};
    use providers::{DummyDevice, PvManager};

    #[tokio::test]
    async fn test_poll_input_read_moves_owner_version() {
        let pv = Arc::new(PvManager::default());
        let mut app = Application::new("tank", ApplicationConfig::new("tank"), pv);
        let device = Arc::new(
            DummyDevice::new("tank")
                .with_register("LEVEL", ValueType::Int32, 1)
                .unwrap(),
        );
        app.register_device(device.clone()).unwrap();
        let owner = app.module("level_watch").unwrap();
        let mut level = app.poll_input::<i32>(&owner, "level", 1).unwrap();
        let feeder = app.device_feeder("tank", "LEVEL", UpdateMode::Poll).unwrap();
        app.connect(feeder, level.node()).unwrap();
        app.run().await.unwrap();

        let written = device.write_register("LEVEL", vec![9i32]).unwrap();
        level.read().await.unwrap();
        assert_eq!(level.get(), 9);
        assert_eq!(level.version(), written);
        assert_eq!(owner.current_version(), written);

        // a later non-blocking poll leaves the owner where it was
        let newer = device.write_register("LEVEL", vec![10i32]).unwrap();
        level.read_latest().unwrap();
        assert_eq!(level.version(), newer);
        assert_eq!(owner.current_version(), written);

        app.shutdown().await.unwrap();
    }
}
