//! Network members.
//!
//! The origin of a node is a closed enum decided when the node is declared.

use std::fmt;
use std::sync::Arc;

use contracts::{
    Direction, EntityOwner, ImplementationSlot, UpdateMode, ValueType, VariableName,
};

use crate::NetworkId;

/// Unit placeholder that any concrete unit overrides.
pub const ARBITRARY_UNIT: &str = "arbitrary";

/// Node handle inside a [`NetworkGraph`](crate::NetworkGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Where an application endpoint receives its runtime implementation.
#[derive(Debug, Clone)]
pub struct AppBinding {
    pub owner: Arc<EntityOwner>,
    pub slot: ImplementationSlot,
}

/// Origin of a node, with what the resolver needs to build it.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Endpoint declared by an application module.
    Application(AppBinding),
    /// Register of a device backend.
    Device { alias: String, register: String },
    /// Variable published to the control system.
    ControlSystem { name: String },
    /// Receives the updates of a trigger network on behalf of `target`.
    TriggerReceiver { target: NetworkId },
}

/// Payload-free tag of [`NodeKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeOrigin {
    Application,
    Device,
    ExternalSystem,
    TriggerReceiver,
}

impl fmt::Display for NodeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Application => "Application",
            Self::Device => "Device",
            Self::ExternalSystem => "ControlSystem",
            Self::TriggerReceiver => "TriggerReceiver",
        };
        f.write_str(s)
    }
}

impl NodeKind {
    pub fn origin(&self) -> NodeOrigin {
        match self {
            Self::Application(_) => NodeOrigin::Application,
            Self::Device { .. } => NodeOrigin::Device,
            Self::ControlSystem { .. } => NodeOrigin::ExternalSystem,
            Self::TriggerReceiver { .. } => NodeOrigin::TriggerReceiver,
        }
    }
}

/// One declared endpoint.
#[derive(Debug, Clone)]
pub struct NetworkNode {
    pub(crate) id: Option<NodeId>,
    name: VariableName,
    kind: NodeKind,
    direction: Direction,
    with_return: bool,
    mode: UpdateMode,
    pub(crate) value_type: ValueType,
    unit: String,
    pub(crate) n_samples: Option<usize>,
}

impl NetworkNode {
    fn new(name: impl Into<VariableName>, kind: NodeKind, direction: Direction) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind,
            direction,
            with_return: false,
            mode: UpdateMode::Push,
            value_type: ValueType::Any,
            unit: ARBITRARY_UNIT.to_string(),
            n_samples: None,
        }
    }

    pub fn application(
        name: impl Into<VariableName>,
        binding: AppBinding,
        direction: Direction,
        value_type: ValueType,
        n_samples: usize,
    ) -> Self {
        Self::new(name, NodeKind::Application(binding), direction)
            .with_value_type(value_type)
            .with_n_samples(n_samples)
    }

    pub fn device(alias: &str, register: &str, direction: Direction, mode: UpdateMode) -> Self {
        let kind = NodeKind::Device {
            alias: alias.to_string(),
            register: register.to_string(),
        };
        Self::new(format!("{alias}/{register}"), kind, direction).with_mode(mode)
    }

    /// Control-system variables are always push.
    pub fn control_system(name: &str, direction: Direction) -> Self {
        let kind = NodeKind::ControlSystem {
            name: name.to_string(),
        };
        Self::new(name, kind, direction)
    }

    pub(crate) fn trigger_receiver(target: NetworkId) -> Self {
        Self::new(
            format!("trigger@{target}"),
            NodeKind::TriggerReceiver { target },
            Direction::Consuming,
        )
        .with_n_samples(0)
    }

    pub fn with_mode(mut self, mode: UpdateMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_return(mut self, with_return: bool) -> Self {
        self.with_return = with_return;
        self
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_n_samples(mut self, n_samples: usize) -> Self {
        self.n_samples = Some(n_samples);
        self
    }

    /// Graph handle. `None` until the node was added to a graph.
    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn name(&self) -> &VariableName {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn origin(&self) -> NodeOrigin {
        self.kind.origin()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_feeding(&self) -> bool {
        self.direction == Direction::Feeding
    }

    pub fn has_return(&self) -> bool {
        self.with_return
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn n_samples(&self) -> Option<usize> {
        self.n_samples
    }

    /// Device and control-system nodes come with their own runtime
    /// implementation; application nodes and trigger receivers do not.
    pub fn has_implementation(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Device { .. } | NodeKind::ControlSystem { .. }
        )
    }

    pub fn app_binding(&self) -> Option<&AppBinding> {
        match &self.kind {
            NodeKind::Application(binding) => Some(binding),
            _ => None,
        }
    }
}

impl fmt::Display for NetworkNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' [{}", self.origin(), self.name, self.direction)?;
        if self.with_return {
            write!(f, "+return")?;
        }
        write!(f, ", {}, {}", self.mode, self.value_type)?;
        if let Some(n) = self.n_samples {
            write!(f, ", n={n}")?;
        }
        if let NodeKind::Application(binding) = &self.kind {
            write!(f, ", owner '{}'", binding.owner.name())?;
        }
        write!(f, "]")
    }
}
