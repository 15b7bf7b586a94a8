//! Declaration-time graph of nodes and networks.

use tracing::debug;

use contracts::ContractError;

use crate::network::{Network, NetworkId};
use crate::node::{NetworkNode, NodeId};

struct NodeEntry {
    node: NetworkNode,
    network: Option<NetworkId>,
}

/// Owns every declared node and every network built from them.
#[derive(Default)]
pub struct NetworkGraph {
    nodes: Vec<NodeEntry>,
    networks: Vec<Network>,
}

impl NetworkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node that is not yet part of any network.
    pub fn add_node(&mut self, mut node: NetworkNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.id = Some(id);
        self.nodes.push(NodeEntry {
            node,
            network: None,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&NetworkNode> {
        self.nodes.get(id.0).map(|e| &e.node)
    }

    pub fn network_of(&self, id: NodeId) -> Option<NetworkId> {
        self.nodes.get(id.0).and_then(|e| e.network)
    }

    /// Put `a` and `b` into the same network and return it.
    ///
    /// A node still holding the placeholder type takes the type of its peer.
    /// Connecting two nodes that already belong to different networks is
    /// rejected; merging networks is not supported.
    pub fn connect(&mut self, a: NodeId, b: NodeId) -> Result<NetworkId, ContractError> {
        if a == b {
            return Err(ContractError::illegal_parameter(format!(
                "cannot connect {a} to itself"
            )));
        }
        self.check_node(a)?;
        self.check_node(b)?;
        self.coerce_pair(a, b);

        match (self.network_of(a), self.network_of(b)) {
            (Some(na), Some(nb)) if na == nb => Ok(na),
            (Some(na), Some(nb)) => Err(ContractError::illegal_network(
                self.networks[na.0].label(),
                format!("cannot merge with {nb}: both nodes are already connected"),
            )),
            (Some(net), None) => self.attach(net, b),
            (None, Some(net)) => self.attach(net, a),
            (None, None) => {
                let id = NetworkId(self.networks.len());
                let mut network = Network::new(id);
                network.add_node(self.nodes[a.0].node.clone())?;
                network.add_node(self.nodes[b.0].node.clone())?;
                self.networks.push(network);
                self.nodes[a.0].network = Some(id);
                self.nodes[b.0].network = Some(id);
                debug!(network = %id, a = %a, b = %b, "network created");
                Ok(id)
            }
        }
    }

    /// Let `trigger` drive the updates of `network`.
    ///
    /// A trigger receiver node is added to the trigger network; a network can
    /// have at most one external trigger.
    pub fn add_trigger(&mut self, network: NetworkId, trigger: NetworkId) -> Result<(), ContractError> {
        if network == trigger {
            return Err(ContractError::illegal_network(
                self.network_label(network),
                "a network cannot trigger itself",
            ));
        }
        self.check_network(network)?;
        self.check_network(trigger)?;

        self.networks[network.0].set_external_trigger(trigger)?;
        let receiver = self.add_node(NetworkNode::trigger_receiver(network));
        self.attach(trigger, receiver)?;
        debug!(network = %network, trigger = %trigger, "external trigger added");
        Ok(())
    }

    /// Let the lone `feeder` drive the updates of `network`.
    ///
    /// The trigger network is created from the feeder and the receiver, so the
    /// receiver is its only consumer. An already connected feeder behaves like
    /// [`NetworkGraph::add_trigger`] on its network.
    pub fn add_trigger_feeder(
        &mut self,
        network: NetworkId,
        feeder: NodeId,
    ) -> Result<NetworkId, ContractError> {
        self.check_network(network)?;
        self.check_node(feeder)?;
        if let Some(trigger) = self.network_of(feeder) {
            self.add_trigger(network, trigger)?;
            return Ok(trigger);
        }
        if !self.nodes[feeder.0].node.is_feeding() {
            return Err(ContractError::illegal_parameter(format!(
                "{feeder} does not feed and cannot trigger {network}"
            )));
        }

        let id = NetworkId(self.networks.len());
        self.networks[network.0].set_external_trigger(id)?;
        let receiver = self.add_node(NetworkNode::trigger_receiver(network));
        let mut trigger = Network::new(id);
        trigger.add_node(self.nodes[feeder.0].node.clone())?;
        trigger.add_node(self.nodes[receiver.0].node.clone())?;
        self.networks.push(trigger);
        self.nodes[feeder.0].network = Some(id);
        self.nodes[receiver.0].network = Some(id);
        debug!(network = %network, trigger = %id, "trigger network created from lone feeder");
        Ok(id)
    }

    pub fn network(&self, id: NetworkId) -> Option<&Network> {
        self.networks.get(id.0)
    }

    pub fn network_mut(&mut self, id: NetworkId) -> Option<&mut Network> {
        self.networks.get_mut(id.0)
    }

    pub fn networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.iter()
    }

    pub fn network_ids(&self) -> Vec<NetworkId> {
        self.networks.iter().map(Network::id).collect()
    }

    /// Nodes that were declared but never connected.
    pub fn unconnected_nodes(&self) -> impl Iterator<Item = &NetworkNode> {
        self.nodes
            .iter()
            .filter(|e| e.network.is_none())
            .map(|e| &e.node)
    }

    /// Textual dump of all networks.
    pub fn dump(&self) -> String {
        self.networks.iter().map(Network::dump).collect()
    }

    fn attach(&mut self, network: NetworkId, node: NodeId) -> Result<NetworkId, ContractError> {
        let copy = self.nodes[node.0].node.clone();
        self.networks[network.0].add_node(copy)?;
        self.nodes[node.0].network = Some(network);
        debug!(network = %network, node = %node, "node attached");
        Ok(network)
    }

    fn coerce_pair(&mut self, a: NodeId, b: NodeId) {
        let (ta, tb) = (self.nodes[a.0].node.value_type, self.nodes[b.0].node.value_type);
        if ta.is_any() && !tb.is_any() && self.network_of(a).is_none() {
            self.nodes[a.0].node.value_type = tb;
        } else if tb.is_any() && !ta.is_any() && self.network_of(b).is_none() {
            self.nodes[b.0].node.value_type = ta;
        }
        let (sa, sb) = (self.nodes[a.0].node.n_samples, self.nodes[b.0].node.n_samples);
        if sa.is_none() && self.network_of(a).is_none() {
            self.nodes[a.0].node.n_samples = sb;
        } else if sb.is_none() && self.network_of(b).is_none() {
            self.nodes[b.0].node.n_samples = sa;
        }
    }

    fn check_node(&self, id: NodeId) -> Result<(), ContractError> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(ContractError::illegal_parameter(format!("unknown node {id}")))
        }
    }

    fn check_network(&self, id: NetworkId) -> Result<(), ContractError> {
        if id.0 < self.networks.len() {
            Ok(())
        } else {
            Err(ContractError::illegal_parameter(format!("unknown network {id}")))
        }
    }

    fn network_label(&self, id: NetworkId) -> String {
        self.network(id)
            .map(Network::label)
            .unwrap_or_else(|| id.to_string())
    }
}
