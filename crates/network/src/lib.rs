//! # Network
//!
//! Declarative variable networks.
//!
//! Responsibilities:
//! - Model declared endpoints as [`NetworkNode`]s with a fixed [`NodeOrigin`]
//! - Group them into [`Network`]s through [`NetworkGraph::connect`]
//! - Classify what triggers each network and validate it before resolution
//! - Produce the textual connection dump

mod graph;
mod network;
mod node;

pub use graph::NetworkGraph;
pub use network::{Network, NetworkId, TriggerType};
pub use node::{AppBinding, NetworkNode, NodeId, NodeKind, NodeOrigin, ARBITRARY_UNIT};
