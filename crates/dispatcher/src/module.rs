//! Common lifecycle of runtime adapters owned by the application.

use async_trait::async_trait;
use std::time::Duration;

use contracts::ContractError;

use crate::metrics::MetricsSnapshot;

/// Dispatcher configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Pause after a failed source read before trying again
    pub retry_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(100),
        }
    }
}

/// Runtime object that owns a worker task.
///
/// `activate` on a running module is an error; `deactivate` on a stopped one
/// is a no-op.
#[async_trait]
pub trait InternalModule: Send {
    fn name(&self) -> &str;

    fn activate(&mut self) -> Result<(), ContractError>;

    /// Stop the worker and wait for it. No sink is written after this returns.
    async fn deactivate(&mut self) -> Result<(), ContractError>;

    fn is_running(&self) -> bool;

    fn has_reached_steady_state(&self) -> bool;

    fn metrics(&self) -> MetricsSnapshot;
}
