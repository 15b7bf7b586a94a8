//! Per-module causal and quality state.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

use crate::{DataValidity, VersionNumber};

/// State shared by all endpoints of one application module.
///
/// The current version only moves forward. The fault counter counts inputs
/// that are currently faulty; the module's outputs are faulty while it is
/// non-zero.
#[derive(Debug)]
pub struct EntityOwner {
    name: String,
    current_version: Mutex<VersionNumber>,
    fault_counter: AtomicUsize,
}

impl EntityOwner {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current_version: Mutex::new(VersionNumber::null()),
            fault_counter: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_version(&self) -> VersionNumber {
        *self.current_version.lock()
    }

    /// Move the current version to `version` unless it is already newer.
    pub fn advance_version(&self, version: VersionNumber) {
        let mut current = self.current_version.lock();
        if version > *current {
            *current = version;
        }
    }

    /// Returns the new count.
    pub fn increment_fault_counter(&self) -> usize {
        self.fault_counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the new count. An unmatched decrement is ignored.
    pub fn decrement_fault_counter(&self) -> usize {
        match self
            .fault_counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => {
                warn!(owner = %self.name, "fault counter decrement without matching increment");
                0
            }
        }
    }

    pub fn fault_count(&self) -> usize {
        self.fault_counter.load(Ordering::Acquire)
    }

    pub fn data_validity(&self) -> DataValidity {
        if self.fault_count() > 0 {
            DataValidity::Faulty
        } else {
            DataValidity::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_only_advances() {
        let owner = EntityOwner::new("m");
        let older = VersionNumber::new();
        let newer = VersionNumber::new();
        owner.advance_version(newer);
        owner.advance_version(older);
        assert_eq!(owner.current_version(), newer);
    }

    #[test]
    fn test_fault_counter_symmetry() {
        let owner = EntityOwner::new("m");
        assert_eq!(owner.data_validity(), DataValidity::Ok);
        owner.increment_fault_counter();
        owner.increment_fault_counter();
        assert_eq!(owner.decrement_fault_counter(), 1);
        assert_eq!(owner.data_validity(), DataValidity::Faulty);
        assert_eq!(owner.decrement_fault_counter(), 0);
        assert_eq!(owner.data_validity(), DataValidity::Ok);
    }

    #[test]
    fn test_fault_counter_never_negative() {
        let owner = EntityOwner::new("m");
        assert_eq!(owner.decrement_fault_counter(), 0);
        assert_eq!(owner.fault_count(), 0);
    }
}
