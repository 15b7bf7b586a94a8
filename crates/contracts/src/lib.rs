//! # Contracts
//!
//! Frozen interface contracts, defining the data structures and traits shared
//! by the network model, the dispatchers and the providers.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Data Model
//! - Every transfer carries a [`Sample`]: payload, [`VersionNumber`] and [`DataValidity`]
//! - Endpoints implement [`ProcessVariable`] for one of the [`UserType`] primitives
//! - Value kinds are dispatched at runtime with [`for_value_type!`]

mod blueprint;
mod endpoint;
mod error;
mod owner;
mod provider;
mod transfer;
mod value;
mod variable_name;
mod version;

pub use blueprint::*;
pub use endpoint::*;
pub use error::*;
pub use owner::EntityOwner;
pub use provider::*;
pub use transfer::*;
pub use value::*;
pub use variable_name::VariableName;
pub use version::*;
