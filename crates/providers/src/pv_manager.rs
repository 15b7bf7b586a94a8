//! In-memory control-system variable manager.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::debug;

use contracts::{
    for_value_type, BoxedProcessVariable, ContractError, ControlSystemProvider, Direction,
    ErasedProcessVariable, UserType, ValueType,
};
use process_vars::{synchronized_pair, QueueConfig};

/// Description of one published variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedVariable {
    pub name: String,
    pub value_type: ValueType,
    /// Direction of the application-side half.
    pub direction: Direction,
    pub n_samples: usize,
    pub with_return: bool,
}

struct Entry {
    info: PublishedVariable,
    peer: Option<ErasedProcessVariable>,
}

/// Control-system provider backed by paired in-process variables.
///
/// The application side receives one half of each pair; the other half stays
/// here until the control-system side claims it with
/// [`PvManager::take_control_system_side`].
pub struct PvManager {
    queue: QueueConfig,
    variables: Mutex<BTreeMap<String, Entry>>,
}

impl Default for PvManager {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl PvManager {
    pub fn new(queue: QueueConfig) -> Self {
        Self {
            queue,
            variables: Mutex::new(BTreeMap::new()),
        }
    }

    /// Claim the control-system half of `name`.
    pub fn take_control_system_side<T: UserType>(
        &self,
        name: &str,
    ) -> Result<BoxedProcessVariable<T>, ContractError> {
        let mut variables = self.variables.lock();
        let entry = variables.get_mut(name).ok_or_else(|| {
            ContractError::illegal_parameter(format!("no control-system variable '{name}'"))
        })?;
        let peer = entry.peer.take().ok_or_else(|| {
            ContractError::logic(format!("control-system side of '{name}' already taken"))
        })?;
        peer.downcast::<T>()
    }

    /// Names of all published variables, sorted.
    pub fn variable_names(&self) -> Vec<String> {
        self.variables.lock().keys().cloned().collect()
    }

    pub fn describe(&self) -> Vec<PublishedVariable> {
        self.variables
            .lock()
            .values()
            .map(|e| e.info.clone())
            .collect()
    }

    fn pair<T: UserType>(
        &self,
        name: &str,
        direction: Direction,
        n_samples: usize,
        with_return: bool,
    ) -> (ErasedProcessVariable, ErasedProcessVariable) {
        let (feeding, consuming) = synchronized_pair::<T>(name, n_samples, self.queue, with_return);
        let feeding = ErasedProcessVariable::new::<T>(Box::new(feeding));
        let consuming = ErasedProcessVariable::new::<T>(Box::new(consuming));
        match direction {
            // the application reads what the control system writes
            Direction::Consuming => (consuming, feeding),
            Direction::Feeding => (feeding, consuming),
        }
    }
}

impl ControlSystemProvider for PvManager {
    fn create_process_variable(
        &self,
        name: &str,
        value_type: ValueType,
        direction: Direction,
        n_samples: usize,
        with_return: bool,
    ) -> Result<ErasedProcessVariable, ContractError> {
        let mut variables = self.variables.lock();
        if variables.contains_key(name) {
            return Err(ContractError::illegal_parameter(format!(
                "control-system variable '{name}' published twice"
            )));
        }
        let (app_side, peer) = for_value_type!(
            value_type,
            T => self.pair::<T>(name, direction, n_samples, with_return),
            any => {
                return Err(ContractError::illegal_parameter(format!(
                    "control-system variable '{name}' needs a concrete value type"
                )))
            }
        );
        variables.insert(
            name.to_string(),
            Entry {
                info: PublishedVariable {
                    name: name.to_string(),
                    value_type,
                    direction,
                    n_samples,
                    with_return,
                },
                peer: Some(peer),
            },
        );
        debug!(variable = %name, %value_type, %direction, with_return, "control-system variable published");
        Ok(app_side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Sample, VersionNumber};

    #[tokio::test]
    async fn test_control_system_writes_reach_application() {
        let pvs = PvManager::default();
        let mut app = pvs
            .create_process_variable("setpoint", ValueType::Float32, Direction::Consuming, 1, false)
            .unwrap()
            .downcast::<f32>()
            .unwrap();
        let mut cs = pvs.take_control_system_side::<f32>("setpoint").unwrap();

        assert!(app.is_readable() && !app.is_writeable());
        cs.write(Sample::scalar(1.5, VersionNumber::new())).unwrap();
        assert_eq!(app.read().await.unwrap().first(), Some(&1.5));
    }

    #[tokio::test]
    async fn test_return_channel_both_ways() {
        let pvs = PvManager::default();
        let mut app = pvs
            .create_process_variable("out", ValueType::Int32, Direction::Feeding, 1, true)
            .unwrap()
            .downcast::<i32>()
            .unwrap();
        let mut cs = pvs.take_control_system_side::<i32>("out").unwrap();

        app.write(Sample::scalar(1, VersionNumber::new())).unwrap();
        assert_eq!(cs.read().await.unwrap().first(), Some(&1));
        cs.write(Sample::scalar(2, VersionNumber::new())).unwrap();
        assert_eq!(app.read().await.unwrap().first(), Some(&2));
    }

    #[test]
    fn test_bookkeeping() {
        let pvs = PvManager::default();
        pvs.create_process_variable("b", ValueType::Uint8, Direction::Feeding, 1, false)
            .unwrap();
        pvs.create_process_variable("a", ValueType::String, Direction::Consuming, 1, false)
            .unwrap();
        assert_eq!(pvs.variable_names(), vec!["a".to_string(), "b".to_string()]);
        assert!(pvs
            .create_process_variable("a", ValueType::String, Direction::Consuming, 1, false)
            .is_err());
        assert!(pvs
            .create_process_variable("c", ValueType::Any, Direction::Consuming, 1, false)
            .is_err());

        assert!(pvs.take_control_system_side::<String>("a").is_ok());
        assert!(matches!(
            pvs.take_control_system_side::<String>("a"),
            Err(ContractError::Logic { .. })
        ));
        assert!(matches!(
            pvs.take_control_system_side::<u8>("zzz"),
            Err(ContractError::IllegalParameter { .. })
        ));
        assert_eq!(pvs.describe()[1].direction, Direction::Feeding);
    }
}
