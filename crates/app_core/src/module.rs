//! Application modules and helpers over groups of accessors.

use futures::future::select_all;
use tracing::trace;

use contracts::{ContractError, Direction, EntityOwner, TransferElementId, UpdateMode, VersionNumber};
use dispatcher::ErrorCollector;

use crate::accessor::VariableHandle;

/// Unit of application logic. Its main loop runs on its own task once the
/// application is running.
#[trait_variant::make(ApplicationModule: Send)]
pub trait LocalApplicationModule {
    /// Module name (used for logging)
    fn name(&self) -> &str;

    /// Runs until the application shuts down. Returning an error stops only
    /// this module.
    async fn main_loop(&mut self) -> Result<(), ContractError>;
}

fn is_input(handle: &dyn VariableHandle) -> bool {
    handle.direction() == Direction::Consuming
}

fn is_push_input(handle: &dyn VariableHandle) -> bool {
    is_input(handle) && handle.mode() == UpdateMode::Push
}

/// Wait until any push-type input of the group receives a value and return
/// the id of that input.
pub async fn read_any(
    group: &mut [&mut dyn VariableHandle],
) -> Result<TransferElementId, ContractError> {
    let reads: Vec<_> = group
        .iter_mut()
        .filter(|h| is_push_input(&***h))
        .map(|h| {
            Box::pin(async move {
                let id = h.id();
                h.read().await.map(|()| id)
            })
        })
        .collect();
    if reads.is_empty() {
        return Err(ContractError::logic("read_any needs at least one push-type input"));
    }
    let (result, _index, _pending) = select_all(reads).await;
    let id = result?;
    trace!(element = %id, "read_any completed");
    Ok(id)
}

/// Blocking read of every push-type input, then the latest value of every
/// poll-type input.
pub async fn read_all(group: &mut [&mut dyn VariableHandle]) -> Result<(), ContractError> {
    for handle in group.iter_mut().filter(|h| is_push_input(&***h)) {
        handle.read().await?;
    }
    for handle in group
        .iter_mut()
        .filter(|h| is_input(&***h) && h.mode() == UpdateMode::Poll)
    {
        handle.read_latest()?;
    }
    Ok(())
}

/// Returns whether any input received a new value.
pub fn read_all_non_blocking(group: &mut [&mut dyn VariableHandle]) -> Result<bool, ContractError> {
    let mut any = false;
    for handle in group.iter_mut().filter(|h| is_input(&***h)) {
        any |= handle.read_non_blocking()?;
    }
    Ok(any)
}

/// Returns whether any input received a new value.
pub fn read_all_latest(group: &mut [&mut dyn VariableHandle]) -> Result<bool, ContractError> {
    let mut any = false;
    for handle in group.iter_mut().filter(|h| is_input(&***h)) {
        any |= handle.read_latest()?;
    }
    Ok(any)
}

/// Write every output of the group with one common version: the owner's
/// current version, or a fresh one if an output already carries it.
///
/// All outputs are attempted; failures are reported together.
pub fn write_all(
    group: &mut [&mut dyn VariableHandle],
    owner: &EntityOwner,
) -> Result<bool, ContractError> {
    let mut version = owner.current_version();
    let stale = group
        .iter()
        .filter(|h| h.direction() == Direction::Feeding)
        .any(|h| h.version() >= version);
    if version.is_null() || stale {
        version = VersionNumber::new();
        owner.advance_version(version);
    }

    let mut errors = ErrorCollector::new();
    let mut data_lost = false;
    for handle in group.iter_mut().filter(|h| h.direction() == Direction::Feeding) {
        if let Some(lost) = errors.wrap(|| handle.write_with_version(version)) {
            data_lost |= lost;
        }
    }
    errors.into_result().map(|()| data_lost)
}
