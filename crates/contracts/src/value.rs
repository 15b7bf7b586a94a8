//! Value kinds and the sample envelope.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ContractError, DataValidity, VersionNumber};

/// Closed set of value kinds a network can carry.
///
/// `Any` is the placeholder held by endpoints whose kind is inferred from the
/// network they join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Any,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    String,
}

impl ValueType {
    pub const ALL_CONCRETE: [ValueType; 11] = [
        Self::Int8,
        Self::Uint8,
        Self::Int16,
        Self::Uint16,
        Self::Int32,
        Self::Uint32,
        Self::Int64,
        Self::Uint64,
        Self::Float32,
        Self::Float64,
        Self::String,
    ];

    pub fn is_any(self) -> bool {
        self == Self::Any
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Int8 => "int8",
            Self::Uint8 => "uint8",
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Int64 => "int64",
            Self::Uint64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::String => "string",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "any" {
            return Ok(Self::Any);
        }
        Self::ALL_CONCRETE
            .into_iter()
            .find(|vt| vt.as_str() == s)
            .ok_or_else(|| ContractError::illegal_parameter(format!("unknown value type '{s}'")))
    }
}

/// Rust primitive bound to one concrete [`ValueType`].
pub trait UserType: Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const VALUE_TYPE: ValueType;
}

macro_rules! impl_user_type {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl UserType for $ty {
            const VALUE_TYPE: ValueType = ValueType::$variant;
        })*
    };
}

impl_user_type! {
    i8 => Int8,
    u8 => Uint8,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    u32 => Uint32,
    i64 => Int64,
    u64 => Uint64,
    f32 => Float32,
    f64 => Float64,
    String => String,
}

/// Instantiate a generic body for the primitive matching a runtime [`ValueType`].
///
/// ```
/// use contracts::{for_value_type, UserType, ValueType};
///
/// fn name_of<T: UserType>() -> &'static str { T::VALUE_TYPE.as_str() }
///
/// let name = for_value_type!(ValueType::Int16, T => name_of::<T>(), any => "unresolved");
/// assert_eq!(name, "int16");
/// ```
#[macro_export]
macro_rules! for_value_type {
    ($vt:expr, $t:ident => $body:expr, any => $fallback:expr) => {
        match $vt {
            $crate::ValueType::Int8 => {
                type $t = i8;
                $body
            }
            $crate::ValueType::Uint8 => {
                type $t = u8;
                $body
            }
            $crate::ValueType::Int16 => {
                type $t = i16;
                $body
            }
            $crate::ValueType::Uint16 => {
                type $t = u16;
                $body
            }
            $crate::ValueType::Int32 => {
                type $t = i32;
                $body
            }
            $crate::ValueType::Uint32 => {
                type $t = u32;
                $body
            }
            $crate::ValueType::Int64 => {
                type $t = i64;
                $body
            }
            $crate::ValueType::Uint64 => {
                type $t = u64;
                $body
            }
            $crate::ValueType::Float32 => {
                type $t = f32;
                $body
            }
            $crate::ValueType::Float64 => {
                type $t = f64;
                $body
            }
            $crate::ValueType::String => {
                type $t = ::std::string::String;
                $body
            }
            $crate::ValueType::Any => $fallback,
        }
    };
}

/// One transferred update: payload, causal stamp and quality flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<T> {
    pub value: Vec<T>,
    pub version: VersionNumber,
    pub validity: DataValidity,
}

impl<T: UserType> Sample<T> {
    pub fn new(value: Vec<T>, version: VersionNumber) -> Self {
        Self {
            value,
            version,
            validity: DataValidity::Ok,
        }
    }

    /// Single-element sample.
    pub fn scalar(value: T, version: VersionNumber) -> Self {
        Self::new(vec![value], version)
    }

    /// Payload-free sample, as delivered to trigger receivers.
    pub fn empty(version: VersionNumber) -> Self {
        Self::new(Vec::new(), version)
    }

    pub fn with_validity(mut self, validity: DataValidity) -> Self {
        self.validity = validity;
        self
    }

    /// First element, if any.
    pub fn first(&self) -> Option<&T> {
        self.value.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of<T: UserType>() -> ValueType {
        T::VALUE_TYPE
    }

    #[test]
    fn test_dispatch_covers_every_concrete_type() {
        for vt in ValueType::ALL_CONCRETE {
            let resolved = for_value_type!(vt, T => kind_of::<T>(), any => ValueType::Any);
            assert_eq!(resolved, vt);
        }
        let any = for_value_type!(ValueType::Any, T => kind_of::<T>(), any => ValueType::Any);
        assert!(any.is_any());
    }

    #[test]
    fn test_value_type_parse() {
        assert_eq!("float64".parse::<ValueType>().unwrap(), ValueType::Float64);
        assert_eq!("any".parse::<ValueType>().unwrap(), ValueType::Any);
        assert!("double".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_sample_builders() {
        let v = VersionNumber::new();
        let s = Sample::scalar(5i32, v).with_validity(DataValidity::Faulty);
        assert_eq!(s.first(), Some(&5));
        assert_eq!(s.version, v);
        assert!(s.validity.is_faulty());
        assert!(Sample::<f64>::empty(v).value.is_empty());
    }
}
