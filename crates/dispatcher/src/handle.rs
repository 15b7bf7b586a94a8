//! WorkerHandle - one spawned task per active dispatcher

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument};

use contracts::ContractError;

/// Cancellation side handed to a worker.
#[derive(Debug, Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    /// Completes once shutdown was requested (or the handle is gone).
    pub async fn requested(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_requested(&self) -> bool {
        *self.0.borrow()
    }
}

/// Set by a worker once its initial read completed.
#[derive(Debug, Clone, Default)]
pub struct SteadyState(Arc<AtomicBool>);

impl SteadyState {
    /// Returns true on the first call only.
    pub fn mark(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_reached(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Handle to a running worker task.
///
/// The worker returns its state `S` when it stops so the owner can restart it.
pub struct WorkerHandle<S> {
    /// Worker name
    name: String,
    /// Cancellation signal
    shutdown_tx: watch::Sender<bool>,
    /// Steady-state flag shared with the worker
    steady: SteadyState,
    /// Worker task handle
    join: JoinHandle<S>,
}

impl<S: Send + 'static> WorkerHandle<S> {
    /// Spawn `body` on the current tokio runtime.
    pub fn spawn<F, Fut>(name: &str, body: F) -> Result<Self, ContractError>
    where
        F: FnOnce(ShutdownSignal, SteadyState) -> Fut,
        Fut: Future<Output = S> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| {
            ContractError::logic(format!("cannot start worker '{name}' outside a runtime: {e}"))
        })?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let steady = SteadyState::default();
        let join = runtime.spawn(body(ShutdownSignal(shutdown_rx), steady.clone()));
        debug!(worker = %name, "worker spawned");

        Ok(Self {
            name: name.to_string(),
            shutdown_tx,
            steady,
            join,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_reached_steady_state(&self) -> bool {
        self.steady.is_reached()
    }

    /// True once the worker returned on its own (e.g. source disconnected).
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request cancellation and wait for the worker to return its state.
    #[instrument(name = "worker_handle_shutdown", skip(self), fields(worker = %self.name))]
    pub async fn shutdown(self) -> Result<S, ContractError> {
        // The worker may already have stopped and dropped its receiver.
        let _ = self.shutdown_tx.send(true);
        match self.join.await {
            Ok(state) => {
                debug!(worker = %self.name, "worker joined");
                Ok(state)
            }
            Err(e) => {
                error!(worker = %self.name, error = %e, "worker task failed");
                Err(ContractError::Thread {
                    message: format!("worker '{}' could not be joined: {e}", self.name),
                })
            }
        }
    }
}
