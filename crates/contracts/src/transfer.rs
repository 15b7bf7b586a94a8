//! Runtime endpoint traits.
//!
//! Every runtime path (paired variables, device registers, control-system
//! variables, fan-outs, decorators) implements [`ProcessVariable`]. The trait
//! is object safe; the resolver wires endpoints as `Box<dyn ProcessVariable<T>>`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::{
    AccessCapabilities, ContractError, Sample, TransferElementId, UserType, ValueType,
    VersionNumber,
};

/// Type-independent part of an endpoint.
pub trait TransferElement: Send {
    fn name(&self) -> &str;

    fn id(&self) -> TransferElementId;

    fn capabilities(&self) -> AccessCapabilities;

    /// Samples per update. Zero for trigger receivers, which carry no payload.
    fn n_samples(&self) -> usize;

    fn is_readable(&self) -> bool {
        self.capabilities().readable
    }

    fn is_writeable(&self) -> bool {
        self.capabilities().writeable
    }
}

/// Typed endpoint.
///
/// `write` returns `true` when the endpoint had to discard a still-queued older
/// value to accept the new one.
#[async_trait]
pub trait ProcessVariable<T: UserType>: TransferElement {
    /// Wait for the next update.
    async fn read(&mut self) -> Result<Sample<T>, ContractError>;

    /// Take an update if one is pending. Never suspends.
    fn read_non_blocking(&mut self) -> Result<Option<Sample<T>>, ContractError>;

    /// Drain pending updates and return the newest one.
    ///
    /// Endpoints that always have a value available (poll registers) must
    /// override this.
    fn read_latest(&mut self) -> Result<Option<Sample<T>>, ContractError> {
        let mut latest = None;
        while let Some(sample) = self.read_non_blocking()? {
            latest = Some(sample);
        }
        Ok(latest)
    }

    fn write(&mut self, sample: Sample<T>) -> Result<bool, ContractError>;

    /// Write without the caller keeping a usable copy of the sample.
    fn write_destructively(&mut self, sample: Sample<T>) -> Result<bool, ContractError> {
        self.write(sample)
    }
}

pub type BoxedProcessVariable<T> = Box<dyn ProcessVariable<T>>;

/// Payload-free view of an endpoint used to drive refresh timing.
#[async_trait]
pub trait TriggerSource: Send {
    fn name(&self) -> &str;

    /// Wait for the next trigger and return its version.
    async fn wait_for_trigger(&mut self) -> Result<VersionNumber, ContractError>;
}

struct TriggerAdapter<T: UserType>(BoxedProcessVariable<T>);

#[async_trait]
impl<T: UserType> TriggerSource for TriggerAdapter<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn wait_for_trigger(&mut self) -> Result<VersionNumber, ContractError> {
        Ok(self.0.read().await?.version)
    }
}

/// Erase the value type of a readable endpoint so it can serve as a trigger.
pub fn into_trigger<T: UserType>(source: BoxedProcessVariable<T>) -> Box<dyn TriggerSource> {
    Box::new(TriggerAdapter(source))
}

/// Typed endpoint behind an untyped handle.
///
/// Crosses the provider and graph boundaries, where the value kind is only
/// known at runtime.
pub struct ErasedProcessVariable {
    name: String,
    value_type: ValueType,
    inner: Box<dyn Any + Send>,
}

impl ErasedProcessVariable {
    pub fn new<T: UserType>(pv: BoxedProcessVariable<T>) -> Self {
        Self {
            name: pv.name().to_string(),
            value_type: T::VALUE_TYPE,
            inner: Box::new(pv),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Recover the typed endpoint.
    pub fn downcast<T: UserType>(self) -> Result<BoxedProcessVariable<T>, ContractError> {
        let Self {
            name,
            value_type,
            inner,
        } = self;
        inner
            .downcast::<BoxedProcessVariable<T>>()
            .map(|boxed| *boxed)
            .map_err(|_| {
                ContractError::illegal_parameter(format!(
                    "endpoint '{name}' carries {value_type}, requested {}",
                    T::VALUE_TYPE
                ))
            })
    }
}

impl fmt::Debug for ErasedProcessVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedProcessVariable")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .finish()
    }
}

#[derive(Default)]
struct SlotState {
    assigned: bool,
    implementation: Option<ErasedProcessVariable>,
}

/// Single-assignment cell holding the runtime implementation of one
/// application endpoint.
///
/// The resolver fills it; the owning accessor takes it on first use.
#[derive(Clone, Default)]
pub struct ImplementationSlot(Arc<Mutex<SlotState>>);

impl ImplementationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill(&self, implementation: ErasedProcessVariable) -> Result<(), ContractError> {
        let mut state = self.0.lock();
        if state.assigned {
            return Err(ContractError::logic(format!(
                "endpoint '{}' already has an implementation",
                implementation.name()
            )));
        }
        state.assigned = true;
        state.implementation = Some(implementation);
        Ok(())
    }

    pub fn take(&self) -> Option<ErasedProcessVariable> {
        self.0.lock().implementation.take()
    }

    /// True once the resolver assigned an implementation, even if already taken.
    pub fn is_assigned(&self) -> bool {
        self.0.lock().assigned
    }
}

impl fmt::Debug for ImplementationSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplementationSlot")
            .field("assigned", &self.is_assigned())
            .finish()
    }
}
