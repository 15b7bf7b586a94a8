//! Interfaces of the collaborators that own fixed runtime implementations.

use crate::{ContractError, Direction, ErasedProcessVariable, UpdateMode, ValueType};

/// Shape of a register as declared by its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInfo {
    pub value_type: ValueType,
    pub n_samples: usize,
}

/// Register access for one logical device.
///
/// `direction` is the direction of the returned accessor as seen from the
/// network: `Consuming` yields a readable accessor that feeds the network,
/// `Feeding` yields a writeable accessor the network writes into.
pub trait DeviceBackend: Send + Sync {
    fn alias(&self) -> &str;

    /// Open the backend. Calling it on an open backend is a no-op.
    fn open(&self) -> Result<(), ContractError>;

    fn is_open(&self) -> bool;

    fn register_info(&self, register: &str) -> Option<RegisterInfo>;

    fn create_accessor(
        &self,
        register: &str,
        value_type: ValueType,
        direction: Direction,
        mode: UpdateMode,
        n_samples: usize,
    ) -> Result<ErasedProcessVariable, ContractError>;
}

/// Publishes variables to an external control system.
///
/// Returns the half used inside the application; the provider keeps the peer
/// half for the control-system side. `direction` has the same meaning as for
/// [`DeviceBackend::create_accessor`].
pub trait ControlSystemProvider: Send + Sync {
    fn create_process_variable(
        &self,
        name: &str,
        value_type: ValueType,
        direction: Direction,
        n_samples: usize,
        with_return: bool,
    ) -> Result<ErasedProcessVariable, ContractError>;
}
