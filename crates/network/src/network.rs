//! A declared distribution group: one feeder, one or more consumers.

use std::fmt;

use contracts::{ContractError, TriggerSource, UpdateMode, ValueType};

use crate::node::{NetworkNode, NodeId, NodeOrigin, ARBITRARY_UNIT};

/// Network handle inside a [`NetworkGraph`](crate::NetworkGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(pub(crate) usize);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "network#{}", self.0)
    }
}

/// What decides when the network distributes a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerType {
    /// The push-mode feeder.
    Feeder,
    /// The single poll-mode consumer, whenever it reads.
    PollingConsumer,
    /// Updates of another network.
    External,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feeder => write!(f, "feeder"),
            Self::PollingConsumer => write!(f, "pollingConsumer"),
            Self::External => write!(f, "external"),
        }
    }
}

pub struct Network {
    id: NetworkId,
    value_type: ValueType,
    unit: String,
    n_samples: Option<usize>,
    nodes: Vec<NetworkNode>,
    feeder: Option<usize>,
    external_trigger: Option<NetworkId>,
    trigger_impl: Option<Box<dyn TriggerSource>>,
    resolved: bool,
}

impl Network {
    pub(crate) fn new(id: NetworkId) -> Self {
        Self {
            id,
            value_type: ValueType::Any,
            unit: ARBITRARY_UNIT.to_string(),
            n_samples: None,
            nodes: Vec::new(),
            feeder: None,
            external_trigger: None,
            trigger_impl: None,
            resolved: false,
        }
    }

    pub fn id(&self) -> NetworkId {
        self.id
    }

    /// Identifies the network in error messages and logs.
    pub fn label(&self) -> String {
        match self.feeder() {
            Some(feeder) => format!("{} (feeder '{}')", self.id, feeder.name()),
            None => format!("{} (no feeder)", self.id),
        }
    }

    /// Attach a node. Adding a node that is already a member is a no-op.
    pub fn add_node(&mut self, node: NetworkNode) -> Result<(), ContractError> {
        if self.contains(node.id) {
            return Ok(());
        }
        if node.is_feeding() {
            if let Some(existing) = self.feeder() {
                return Err(ContractError::illegal_network(
                    self.label(),
                    format!(
                        "'{}' cannot feed the network, '{}' already does",
                        node.name(),
                        existing.name()
                    ),
                ));
            }
            self.feeder = Some(self.nodes.len());
        }
        if self.value_type.is_any() && !node.value_type().is_any() {
            self.value_type = node.value_type();
        }
        if self.unit == ARBITRARY_UNIT && node.unit() != ARBITRARY_UNIT {
            self.unit = node.unit().to_string();
        }
        if self.n_samples.is_none() {
            self.n_samples = node.n_samples().filter(|n| *n > 0);
        }
        self.nodes.push(node);
        Ok(())
    }

    pub(crate) fn set_external_trigger(&mut self, trigger: NetworkId) -> Result<(), ContractError> {
        if let Some(existing) = self.external_trigger {
            return Err(ContractError::illegal_network(
                self.label(),
                format!("already triggered by {existing}, cannot add {trigger}"),
            ));
        }
        self.external_trigger = Some(trigger);
        Ok(())
    }

    /// Decide what drives the network's updates.
    pub fn classify_trigger(&self) -> Result<TriggerType, ContractError> {
        let feeder = self.feeder().ok_or_else(|| {
            ContractError::illegal_network(self.label(), "network has no feeding node")
        })?;

        if self.external_trigger.is_some() {
            if feeder.mode() == UpdateMode::Push {
                return Err(ContractError::illegal_network(
                    self.label(),
                    "a push-type feeder cannot take an external trigger",
                ));
            }
            return Ok(TriggerType::External);
        }

        if feeder.mode() == UpdateMode::Push {
            return Ok(TriggerType::Feeder);
        }

        match self
            .consumers()
            .filter(|c| c.mode() == UpdateMode::Poll)
            .count()
        {
            1 => Ok(TriggerType::PollingConsumer),
            0 => Err(ContractError::illegal_network(
                self.label(),
                "poll-type feeder needs an external trigger or one poll-type consumer",
            )),
            n => Err(ContractError::illegal_network(
                self.label(),
                format!("poll-type feeder with {n} poll-type consumers and no external trigger"),
            )),
        }
    }

    /// Check the network can be resolved and coerce placeholder types.
    pub fn validate(&mut self) -> Result<(), ContractError> {
        if self.consumers().next().is_none() {
            return Err(ContractError::illegal_network(
                self.label(),
                "network has no consuming nodes",
            ));
        }
        let feeder = self.feeder().ok_or_else(|| {
            ContractError::illegal_network(self.label(), "network has no feeding node")
        })?;
        if feeder.origin() == NodeOrigin::Application && feeder.mode() == UpdateMode::Poll {
            return Err(ContractError::illegal_network(
                self.label(),
                "application feeders must be push-type",
            ));
        }
        if self.value_type.is_any() {
            return Err(ContractError::illegal_network(
                self.label(),
                "no node of the network has a concrete value type",
            ));
        }

        let value_type = self.value_type;
        if let Some(node) = self
            .nodes
            .iter()
            .find(|n| !n.value_type().is_any() && n.value_type() != value_type)
        {
            return Err(ContractError::illegal_network(
                self.label(),
                format!(
                    "'{}' has type {} but the network carries {value_type}",
                    node.name(),
                    node.value_type()
                ),
            ));
        }
        for node in self.nodes.iter_mut().filter(|n| n.value_type().is_any()) {
            node.value_type = value_type;
        }

        self.classify_trigger()?;
        Ok(())
    }

    pub fn nodes(&self) -> &[NetworkNode] {
        &self.nodes
    }

    pub fn contains(&self, id: Option<NodeId>) -> bool {
        id.is_some() && self.nodes.iter().any(|n| n.id() == id)
    }

    pub fn feeder(&self) -> Option<&NetworkNode> {
        self.feeder.map(|idx| &self.nodes[idx])
    }

    pub fn consumers(&self) -> impl Iterator<Item = &NetworkNode> {
        self.nodes.iter().filter(|n| !n.is_feeding())
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Samples per update, defaulting to a scalar.
    pub fn n_samples(&self) -> usize {
        self.n_samples.unwrap_or(1)
    }

    pub fn external_trigger(&self) -> Option<NetworkId> {
        self.external_trigger
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn mark_resolved(&mut self) {
        self.resolved = true;
    }

    /// Store the trigger input produced while resolving the trigger network.
    pub fn set_trigger_impl(&mut self, trigger: Box<dyn TriggerSource>) -> Result<(), ContractError> {
        if self.trigger_impl.is_some() {
            return Err(ContractError::logic(format!(
                "{} already has a trigger implementation",
                self.label()
            )));
        }
        self.trigger_impl = Some(trigger);
        Ok(())
    }

    pub fn take_trigger_impl(&mut self) -> Option<Box<dyn TriggerSource>> {
        self.trigger_impl.take()
    }

    /// Human readable description of the network.
    pub fn dump(&self) -> String {
        self.to_string()
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("id", &self.id)
            .field("value_type", &self.value_type)
            .field("nodes", &self.nodes.len())
            .field("external_trigger", &self.external_trigger)
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==== {}", self.label())?;
        writeln!(
            f,
            "  value type = {}, engineering unit = {}, samples = {}",
            self.value_type,
            self.unit,
            self.n_samples()
        )?;
        match self.classify_trigger() {
            Ok(trigger) => writeln!(f, "  trigger type = {trigger}")?,
            Err(_) => writeln!(f, "  trigger type = **error**")?,
        }
        match self.feeder() {
            Some(feeder) => writeln!(f, "  feeder: {feeder}")?,
            None => writeln!(f, "  feeder: **error, no feeder found**")?,
        }
        let consumers: Vec<_> = self.consumers().collect();
        writeln!(f, "  consumers: {}", consumers.len())?;
        for (i, consumer) in consumers.iter().enumerate() {
            writeln!(f, "    #{}: {consumer}", i + 1)?;
        }
        if let Some(trigger) = self.external_trigger {
            writeln!(f, "  external trigger network: {trigger}")?;
        }
        writeln!(f, "==========")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::Direction;

    fn network() -> Network {
        Network::new(NetworkId(0))
    }

    fn poll_device_feeder() -> NetworkNode {
        NetworkNode::device("dev", "ADC", Direction::Feeding, UpdateMode::Poll)
            .with_value_type(ValueType::Int32)
    }

    #[test]
    fn test_second_feeder_rejected() {
        let mut net = network();
        net.add_node(NetworkNode::control_system("a", Direction::Feeding))
            .unwrap();
        let err = net
            .add_node(NetworkNode::control_system("b", Direction::Feeding))
            .unwrap_err();
        assert!(matches!(err, ContractError::IllegalNetwork { .. }));
    }

    #[test]
    fn test_adopts_first_concrete_type_and_unit() {
        let mut net = network();
        net.add_node(NetworkNode::control_system("a", Direction::Feeding))
            .unwrap();
        net.add_node(
            NetworkNode::control_system("b", Direction::Consuming)
                .with_value_type(ValueType::Float32)
                .with_unit("mA"),
        )
        .unwrap();
        net.add_node(
            NetworkNode::control_system("c", Direction::Consuming)
                .with_value_type(ValueType::Float32)
                .with_unit("V"),
        )
        .unwrap();
        assert_eq!(net.value_type(), ValueType::Float32);
        assert_eq!(net.unit(), "mA");

        net.validate().unwrap();
        assert!(net.nodes().iter().all(|n| n.value_type() == ValueType::Float32));
    }

    #[test]
    fn test_classify_push_feeder() {
        let mut net = network();
        net.add_node(NetworkNode::control_system("a", Direction::Feeding).with_value_type(ValueType::Int8))
            .unwrap();
        net.add_node(NetworkNode::control_system("b", Direction::Consuming))
            .unwrap();
        assert_eq!(net.classify_trigger().unwrap(), TriggerType::Feeder);
    }

    #[test]
    fn test_classify_external_with_push_feeder_is_illegal() {
        let mut net = network();
        net.add_node(NetworkNode::control_system("a", Direction::Feeding))
            .unwrap();
        net.add_node(NetworkNode::control_system("b", Direction::Consuming))
            .unwrap();
        net.set_external_trigger(NetworkId(1)).unwrap();
        assert!(matches!(
            net.classify_trigger(),
            Err(ContractError::IllegalNetwork { .. })
        ));
    }

    #[test]
    fn test_classify_poll_feeder() {
        let mut net = network();
        net.add_node(poll_device_feeder()).unwrap();
        net.add_node(
            NetworkNode::device("dev2", "OUT", Direction::Consuming, UpdateMode::Poll),
        )
        .unwrap();
        assert_eq!(net.classify_trigger().unwrap(), TriggerType::PollingConsumer);

        net.add_node(
            NetworkNode::device("dev2", "OUT2", Direction::Consuming, UpdateMode::Poll),
        )
        .unwrap();
        assert!(matches!(
            net.classify_trigger(),
            Err(ContractError::IllegalNetwork { .. })
        ));

        net.set_external_trigger(NetworkId(7)).unwrap();
        assert_eq!(net.classify_trigger().unwrap(), TriggerType::External);
    }

    #[test]
    fn test_second_external_trigger_rejected() {
        let mut net = network();
        net.set_external_trigger(NetworkId(1)).unwrap();
        assert!(net.set_external_trigger(NetworkId(2)).is_err());
    }

    #[test]
    fn test_validate_requires_consumer_and_type() {
        let mut net = network();
        net.add_node(poll_device_feeder()).unwrap();
        let err = net.validate().unwrap_err();
        assert!(err.to_string().contains("no consuming nodes"), "got: {err}");

        let mut net = network();
        net.add_node(NetworkNode::control_system("a", Direction::Feeding))
            .unwrap();
        net.add_node(NetworkNode::control_system("b", Direction::Consuming))
            .unwrap();
        let err = net.validate().unwrap_err();
        assert!(err.to_string().contains("concrete value type"), "got: {err}");
    }

    #[test]
    fn test_validate_rejects_mismatched_member_type() {
        let mut net = network();
        net.add_node(NetworkNode::control_system("a", Direction::Feeding).with_value_type(ValueType::Int32))
            .unwrap();
        net.add_node(
            NetworkNode::control_system("b", Direction::Consuming).with_value_type(ValueType::String),
        )
        .unwrap();
        assert!(matches!(
            net.validate(),
            Err(ContractError::IllegalNetwork { .. })
        ));
    }

    #[test]
    fn test_dump_lists_members() {
        let mut net = network();
        net.add_node(poll_device_feeder()).unwrap();
        net.add_node(NetworkNode::device("dev2", "OUT", Direction::Consuming, UpdateMode::Poll))
            .unwrap();
        let text = net.dump();
        assert!(text.contains("trigger type = pollingConsumer"), "got: {text}");
        assert!(text.contains("#1: Device 'dev2/OUT'"), "got: {text}");
    }
}
