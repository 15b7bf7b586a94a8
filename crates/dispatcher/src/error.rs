//! Collects per-sink failures of one distribution pass.

use contracts::ContractError;

/// Gathers errors so every sink is attempted before anything is reported.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Vec<ContractError>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, error: ContractError) {
        self.errors.push(error);
    }

    /// Run `f` and keep its error, if any.
    pub fn wrap<R>(&mut self, f: impl FnOnce() -> Result<R, ContractError>) -> Option<R> {
        match f() {
            Ok(value) => Some(value),
            Err(e) => {
                self.collect(e);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// A single error is returned as is; several are combined.
    pub fn into_result(mut self) -> Result<(), ContractError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(ContractError::Combined(self.errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_collector_is_ok() {
        assert!(ErrorCollector::new().into_result().is_ok());
    }

    #[test]
    fn test_single_error_passes_through() {
        let mut ec = ErrorCollector::new();
        assert_eq!(ec.wrap(|| Ok(3)), Some(3));
        ec.wrap::<()>(|| Err(ContractError::transfer("a", "x")));
        assert!(matches!(
            ec.into_result(),
            Err(ContractError::RuntimeTransfer { .. })
        ));
    }

    #[test]
    fn test_multiple_errors_combined() {
        let mut ec = ErrorCollector::new();
        ec.collect(ContractError::transfer("a", "x"));
        ec.collect(ContractError::channel_closed("b"));
        match ec.into_result() {
            Err(ContractError::Combined(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
