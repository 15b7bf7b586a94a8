//! Device backends by alias, opened lazily.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use contracts::{
    BoxedProcessVariable, ContractError, DeviceBackend, Direction, RegisterInfo, UpdateMode,
    UserType,
};

/// One backend per logical device alias.
#[derive(Default)]
pub struct DeviceRegistry {
    backends: BTreeMap<String, Arc<dyn DeviceBackend>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn DeviceBackend>) -> Result<(), ContractError> {
        let alias = backend.alias().to_string();
        if self.backends.contains_key(&alias) {
            return Err(ContractError::illegal_parameter(format!(
                "device alias '{alias}' registered twice"
            )));
        }
        debug!(device = %alias, "device registered");
        self.backends.insert(alias, backend);
        Ok(())
    }

    pub fn get(&self, alias: &str) -> Result<&Arc<dyn DeviceBackend>, ContractError> {
        self.backends
            .get(alias)
            .ok_or_else(|| ContractError::illegal_parameter(format!("unknown device alias '{alias}'")))
    }

    pub fn register_info(&self, alias: &str, register: &str) -> Result<RegisterInfo, ContractError> {
        self.get(alias)?.register_info(register).ok_or_else(|| {
            ContractError::illegal_parameter(format!("device '{alias}' has no register '{register}'"))
        })
    }

    /// Typed register accessor. The backend is opened on first use.
    pub fn accessor<T: UserType>(
        &self,
        alias: &str,
        register: &str,
        direction: Direction,
        mode: UpdateMode,
        n_samples: usize,
    ) -> Result<BoxedProcessVariable<T>, ContractError> {
        let backend = self.get(alias)?;
        if !backend.is_open() {
            backend.open()?;
        }
        backend
            .create_accessor(register, T::VALUE_TYPE, direction, mode, n_samples)?
            .downcast::<T>()
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ValueType;
    use providers::DummyDevice;

    #[test]
    fn test_lazy_open_once() {
        let dev = Arc::new(
            DummyDevice::new("dev")
                .with_register("A", ValueType::Int32, 1)
                .unwrap(),
        );
        let mut registry = DeviceRegistry::new();
        registry.register(dev.clone()).unwrap();
        assert_eq!(dev.open_count(), 0);

        registry
            .accessor::<i32>("dev", "A", Direction::Consuming, UpdateMode::Push, 1)
            .unwrap();
        registry
            .accessor::<i32>("dev", "A", Direction::Feeding, UpdateMode::Push, 1)
            .unwrap();
        assert_eq!(dev.open_count(), 1);
    }

    #[test]
    fn test_unknown_and_duplicate_alias() {
        let mut registry = DeviceRegistry::new();
        registry.register(Arc::new(DummyDevice::new("dev"))).unwrap();
        assert!(matches!(
            registry.register(Arc::new(DummyDevice::new("dev"))),
            Err(ContractError::IllegalParameter { .. })
        ));
        assert!(matches!(
            registry.get("nope"),
            Err(ContractError::IllegalParameter { .. })
        ));
        assert_eq!(registry.aliases().collect::<Vec<_>>(), vec!["dev"]);
    }
}
