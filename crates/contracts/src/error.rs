//! Layered error definitions
//!
//! Categorized by source: topology / transfer / lifecycle / config

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Topology Errors =====
    /// Network invariant violated (two feeders, no consumer, ambiguous trigger, ...)
    #[error("illegal network {network}: {message}")]
    IllegalNetwork { network: String, message: String },

    /// Unsupported node combination or rejected sink registration
    #[error("illegal parameter: {message}")]
    IllegalParameter { message: String },

    /// No connection rule matched the network
    #[error("not implemented: {message}")]
    NotImplemented { message: String },

    /// API used in the wrong lifecycle state or direction
    #[error("logic error: {message}")]
    Logic { message: String },

    // ===== Transfer Errors =====
    /// Read or write on an endpoint failed
    #[error("transfer error on '{element}': {message}")]
    RuntimeTransfer { element: String, message: String },

    /// Several sinks failed during one fan-out pass
    #[error("{}", join_messages(.0))]
    Combined(Vec<ContractError>),

    /// Peer end of a channel is gone
    #[error("channel closed for '{element}'")]
    ChannelClosed { element: String },

    /// Worker task could not be joined
    #[error("worker thread failure: {message}")]
    Thread { message: String },

    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

fn join_messages(errors: &[ContractError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl ContractError {
    /// Create illegal network error
    pub fn illegal_network(network: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IllegalNetwork {
            network: network.into(),
            message: message.into(),
        }
    }

    /// Create illegal parameter error
    pub fn illegal_parameter(message: impl Into<String>) -> Self {
        Self::IllegalParameter {
            message: message.into(),
        }
    }

    /// Create not implemented error
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented {
            message: message.into(),
        }
    }

    /// Create logic error
    pub fn logic(message: impl Into<String>) -> Self {
        Self::Logic {
            message: message.into(),
        }
    }

    /// Create runtime transfer error
    pub fn transfer(element: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RuntimeTransfer {
            element: element.into(),
            message: message.into(),
        }
    }

    /// Create channel closed error
    pub fn channel_closed(element: impl Into<String>) -> Self {
        Self::ChannelClosed {
            element: element.into(),
        }
    }

    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for errors that end a worker loop instead of being retried.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::ChannelClosed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_message_lists_every_error() {
        let err = ContractError::Combined(vec![
            ContractError::transfer("sink_a", "boom"),
            ContractError::channel_closed("sink_b"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("sink_a"), "got: {msg}");
        assert!(msg.contains("sink_b"), "got: {msg}");
        assert_eq!(msg.lines().count(), 2);
    }

    #[test]
    fn test_illegal_network_names_network() {
        let err = ContractError::illegal_network("network#3", "two feeders");
        assert_eq!(err.to_string(), "illegal network network#3: two feeders");
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(ContractError::channel_closed("x").is_disconnect());
        assert!(!ContractError::transfer("x", "y").is_disconnect());
    }
}
