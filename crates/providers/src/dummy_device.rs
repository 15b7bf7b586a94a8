//! In-memory device backend.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use contracts::{
    for_value_type, AccessCapabilities, ContractError, DeviceBackend, Direction,
    ErasedProcessVariable, ProcessVariable, RegisterInfo, Sample, TransferElement,
    TransferElementId, UpdateMode, UserType, ValueType, VersionNumber,
};

/// Register storage with its value type erased.
trait RegisterCell: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    /// Wake blocked readers without changing the content.
    fn notify(&self);
}

struct TypedCell<T: UserType> {
    tx: watch::Sender<Sample<T>>,
}

impl<T: UserType> RegisterCell for TypedCell<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn notify(&self) {
        self.tx.send_modify(|_| {});
    }
}

struct Register {
    info: RegisterInfo,
    cell: Arc<dyn RegisterCell>,
}

/// Device backend keeping its registers in memory.
///
/// Test code drives the "hardware" side through [`DummyDevice::write_register`]
/// and [`DummyDevice::read_register`]. While [`DummyDevice::set_faulty`] is on,
/// every accessor transfer fails with `RuntimeTransfer`.
pub struct DummyDevice {
    alias: String,
    open_count: AtomicUsize,
    faulty: Arc<AtomicBool>,
    registers: RwLock<HashMap<String, Register>>,
}

impl DummyDevice {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            open_count: AtomicUsize::new(0),
            faulty: Arc::new(AtomicBool::new(false)),
            registers: RwLock::new(HashMap::new()),
        }
    }

    /// Builder form of [`DummyDevice::add_register`].
    pub fn with_register(
        self,
        name: &str,
        value_type: ValueType,
        n_samples: usize,
    ) -> Result<Self, ContractError> {
        self.add_register(name, value_type, n_samples)?;
        Ok(self)
    }

    /// Declare a register holding `n_samples` default values.
    pub fn add_register(
        &self,
        name: &str,
        value_type: ValueType,
        n_samples: usize,
    ) -> Result<(), ContractError> {
        if n_samples == 0 {
            return Err(ContractError::illegal_parameter(format!(
                "register '{}/{name}' needs at least one sample",
                self.alias
            )));
        }
        let cell: Arc<dyn RegisterCell> = for_value_type!(
            value_type,
            T => Arc::new(new_cell::<T>(n_samples)) as Arc<dyn RegisterCell>,
            any => {
                return Err(ContractError::illegal_parameter(format!(
                    "register '{}/{name}' needs a concrete value type",
                    self.alias
                )))
            }
        );

        let mut registers = self.registers.write();
        if registers.contains_key(name) {
            return Err(ContractError::illegal_parameter(format!(
                "register '{}/{name}' declared twice",
                self.alias
            )));
        }
        registers.insert(
            name.to_string(),
            Register {
                info: RegisterInfo {
                    value_type,
                    n_samples,
                },
                cell,
            },
        );
        debug!(device = %self.alias, register = %name, %value_type, n_samples, "register declared");
        Ok(())
    }

    /// Set the register content as the hardware would. Returns the new version.
    pub fn write_register<T: UserType>(
        &self,
        register: &str,
        value: Vec<T>,
    ) -> Result<VersionNumber, ContractError> {
        let tx = self.sender::<T>(register)?;
        let version = VersionNumber::new();
        tx.send_replace(Sample::new(value, version));
        Ok(version)
    }

    /// Current register content.
    pub fn read_register<T: UserType>(&self, register: &str) -> Result<Sample<T>, ContractError> {
        Ok(self.sender::<T>(register)?.borrow().clone())
    }

    /// Switch fault injection on or off. Blocked readers are woken so they
    /// observe the fault.
    pub fn set_faulty(&self, faulty: bool) {
        let was = self.faulty.swap(faulty, Ordering::AcqRel);
        if was == faulty {
            return;
        }
        if faulty {
            warn!(device = %self.alias, "fault injected");
            for register in self.registers.read().values() {
                register.cell.notify();
            }
        } else {
            info!(device = %self.alias, "fault cleared");
        }
    }

    pub fn is_faulty(&self) -> bool {
        self.faulty.load(Ordering::Acquire)
    }

    /// How often `open` actually opened the device.
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::Acquire)
    }

    pub fn register_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registers.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn sender<T: UserType>(&self, register: &str) -> Result<watch::Sender<Sample<T>>, ContractError> {
        let registers = self.registers.read();
        let entry = registers.get(register).ok_or_else(|| {
            ContractError::illegal_parameter(format!(
                "device '{}' has no register '{register}'",
                self.alias
            ))
        })?;
        entry
            .cell
            .as_any()
            .downcast_ref::<TypedCell<T>>()
            .map(|cell| cell.tx.clone())
            .ok_or_else(|| {
                ContractError::illegal_parameter(format!(
                    "register '{}/{register}' holds {}, requested {}",
                    self.alias,
                    entry.info.value_type,
                    T::VALUE_TYPE
                ))
            })
    }

    fn accessor<T: UserType>(
        &self,
        register: &str,
        direction: Direction,
        mode: UpdateMode,
        n_samples: usize,
    ) -> Result<ErasedProcessVariable, ContractError> {
        let tx = self.sender::<T>(register)?;
        let access = RegisterAccess {
            name: format!("{}/{register}", self.alias),
            id: TransferElementId::new(),
            n_samples,
            faulty: Arc::clone(&self.faulty),
        };
        Ok(match direction {
            Direction::Consuming => {
                let rx = tx.subscribe();
                ErasedProcessVariable::new::<T>(Box::new(RegisterReader { access, rx, mode }))
            }
            Direction::Feeding => {
                ErasedProcessVariable::new::<T>(Box::new(RegisterWriter { access, tx }))
            }
        })
    }
}

fn new_cell<T: UserType>(n_samples: usize) -> TypedCell<T> {
    let initial = Sample::new(vec![T::default(); n_samples], VersionNumber::null());
    let (tx, _rx) = watch::channel(initial);
    TypedCell { tx }
}

impl DeviceBackend for DummyDevice {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn open(&self) -> Result<(), ContractError> {
        if self.open_count.load(Ordering::Acquire) == 0 {
            self.open_count.fetch_add(1, Ordering::AcqRel);
            info!(device = %self.alias, "device opened");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open_count() > 0
    }

    fn register_info(&self, register: &str) -> Option<RegisterInfo> {
        self.registers.read().get(register).map(|r| r.info)
    }

    fn create_accessor(
        &self,
        register: &str,
        value_type: ValueType,
        direction: Direction,
        mode: UpdateMode,
        n_samples: usize,
    ) -> Result<ErasedProcessVariable, ContractError> {
        if !self.is_open() {
            return Err(ContractError::logic(format!(
                "device '{}' is not open",
                self.alias
            )));
        }
        let info = self.register_info(register).ok_or_else(|| {
            ContractError::illegal_parameter(format!(
                "device '{}' has no register '{register}'",
                self.alias
            ))
        })?;
        if info.n_samples != n_samples {
            return Err(ContractError::illegal_parameter(format!(
                "register '{}/{register}' has {} samples, requested {n_samples}",
                self.alias, info.n_samples
            )));
        }
        if direction == Direction::Feeding && mode == UpdateMode::Poll {
            debug!(device = %self.alias, register = %register, "poll mode ignored for write accessor");
        }
        for_value_type!(
            value_type,
            T => self.accessor::<T>(register, direction, mode, n_samples),
            any => Err(ContractError::illegal_parameter(format!(
                "accessor for '{}/{register}' needs a concrete value type",
                self.alias
            )))
        )
    }
}

/// Common part of register accessors.
struct RegisterAccess {
    name: String,
    id: TransferElementId,
    n_samples: usize,
    faulty: Arc<AtomicBool>,
}

impl RegisterAccess {
    fn check(&self) -> Result<(), ContractError> {
        if self.faulty.load(Ordering::Acquire) {
            Err(ContractError::transfer(&self.name, "device reports a fault"))
        } else {
            Ok(())
        }
    }
}

/// Readable accessor: feeds the register content into the network.
struct RegisterReader<T: UserType> {
    access: RegisterAccess,
    rx: watch::Receiver<Sample<T>>,
    mode: UpdateMode,
}

impl<T: UserType> RegisterReader<T> {
    fn current(&mut self) -> Sample<T> {
        self.rx.borrow_and_update().clone()
    }
}

impl<T: UserType> TransferElement for RegisterReader<T> {
    fn name(&self) -> &str {
        &self.access.name
    }

    fn id(&self) -> TransferElementId {
        self.access.id
    }

    fn capabilities(&self) -> AccessCapabilities {
        AccessCapabilities::READ_ONLY
    }

    fn n_samples(&self) -> usize {
        self.access.n_samples
    }
}

#[async_trait]
impl<T: UserType> ProcessVariable<T> for RegisterReader<T> {
    async fn read(&mut self) -> Result<Sample<T>, ContractError> {
        self.access.check()?;
        if self.mode == UpdateMode::Push {
            self.rx
                .changed()
                .await
                .map_err(|_| ContractError::channel_closed(&self.access.name))?;
            self.access.check()?;
        }
        Ok(self.current())
    }

    fn read_non_blocking(&mut self) -> Result<Option<Sample<T>>, ContractError> {
        self.access.check()?;
        match self.mode {
            UpdateMode::Poll => Ok(Some(self.current())),
            UpdateMode::Push => {
                let changed = self
                    .rx
                    .has_changed()
                    .map_err(|_| ContractError::channel_closed(&self.access.name))?;
                Ok(changed.then(|| self.current()))
            }
        }
    }

    fn read_latest(&mut self) -> Result<Option<Sample<T>>, ContractError> {
        // A watch channel only ever holds the newest value.
        self.read_non_blocking()
    }

    fn write(&mut self, _sample: Sample<T>) -> Result<bool, ContractError> {
        Err(ContractError::logic(format!(
            "'{}' is read-only",
            self.access.name
        )))
    }
}

/// Writeable accessor: the network writes into the register.
struct RegisterWriter<T: UserType> {
    access: RegisterAccess,
    tx: watch::Sender<Sample<T>>,
}

impl<T: UserType> TransferElement for RegisterWriter<T> {
    fn name(&self) -> &str {
        &self.access.name
    }

    fn id(&self) -> TransferElementId {
        self.access.id
    }

    fn capabilities(&self) -> AccessCapabilities {
        AccessCapabilities::WRITE_ONLY
    }

    fn n_samples(&self) -> usize {
        self.access.n_samples
    }
}

#[async_trait]
impl<T: UserType> ProcessVariable<T> for RegisterWriter<T> {
    async fn read(&mut self) -> Result<Sample<T>, ContractError> {
        Err(ContractError::logic(format!(
            "'{}' is write-only",
            self.access.name
        )))
    }

    fn read_non_blocking(&mut self) -> Result<Option<Sample<T>>, ContractError> {
        Err(ContractError::logic(format!(
            "'{}' is write-only",
            self.access.name
        )))
    }

    fn write(&mut self, sample: Sample<T>) -> Result<bool, ContractError> {
        self.access.check()?;
        self.tx.send_replace(sample);
        Ok(false)
    }
}
