//! Endpoint identity: direction, transfer mode, capabilities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Direction of data flow as seen from the endpoint's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Writes into the network.
    Feeding,
    /// Reads from the network.
    Consuming,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Self::Feeding => Self::Consuming,
            Self::Consuming => Self::Feeding,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feeding => write!(f, "feeding"),
            Self::Consuming => write!(f, "consuming"),
        }
    }
}

/// Transfer mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Updates are delivered as they happen.
    #[default]
    Push,
    /// The reader fetches the current value when it wants it.
    Poll,
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Poll => write!(f, "poll"),
        }
    }
}

/// Capability flags of a runtime endpoint, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessCapabilities {
    pub readable: bool,
    pub writeable: bool,
    pub with_return: bool,
}

impl AccessCapabilities {
    pub const READ_ONLY: Self = Self {
        readable: true,
        writeable: false,
        with_return: false,
    };

    pub const WRITE_ONLY: Self = Self {
        readable: false,
        writeable: true,
        with_return: false,
    };

    pub const BIDIRECTIONAL: Self = Self {
        readable: true,
        writeable: true,
        with_return: true,
    };

    /// Capabilities of an endpoint with the given direction, seen from its user.
    pub fn for_direction(direction: Direction, with_return: bool) -> Self {
        match (direction, with_return) {
            (_, true) => Self::BIDIRECTIONAL,
            (Direction::Feeding, false) => Self::WRITE_ONLY,
            (Direction::Consuming, false) => Self::READ_ONLY,
        }
    }
}

static NEXT_ELEMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one runtime transfer element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferElementId(u64);

#[allow(clippy::new_without_default)]
impl TransferElementId {
    pub fn new() -> Self {
        Self(NEXT_ELEMENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransferElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
