//! Causal stamps and quality flags carried by every transferred value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// Opaque, strictly ordered version stamp.
///
/// New numbers come from a process-wide source and are always newer than every
/// number handed out before. Only comparison is exposed; there is no arithmetic.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionNumber(u64);

#[allow(clippy::new_without_default)]
impl VersionNumber {
    /// Draw a fresh version, newer than all previously created ones.
    pub fn new() -> Self {
        Self(NEXT_VERSION.fetch_add(1, Ordering::Relaxed))
    }

    /// Version older than any real one ("nothing received yet").
    pub const fn null() -> Self {
        Self(0)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Quality flag transported alongside each value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataValidity {
    #[default]
    Ok,
    Faulty,
}

impl DataValidity {
    pub fn is_faulty(self) -> bool {
        self == Self::Faulty
    }
}

impl fmt::Display for DataValidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Faulty => write!(f, "faulty"),
        }
    }
}
