//! Builds an [`Application`] from a loaded topology blueprint.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use contracts::{
    ConnectionConfig, ContractError, ControlSystemProvider, Direction, EndpointConfig,
    TopologyBlueprint,
};
use network::{NetworkId, NetworkNode, NodeId};
use providers::DummyDevice;

use crate::application::Application;

/// Application built from a blueprint, with handles to its in-memory devices.
pub struct BuiltApplication {
    pub app: Application,
    /// Device backends by alias
    pub devices: BTreeMap<String, Arc<DummyDevice>>,
    /// Network of each connection, by connection name
    pub networks: BTreeMap<String, NetworkId>,
}

/// Declare devices, connections and triggers of `blueprint`.
///
/// The blueprint is expected to be validated already; remaining topology
/// errors surface when the application resolves.
#[instrument(name = "build_from_blueprint", skip_all, fields(application = %blueprint.application.name))]
pub fn build_from_blueprint(
    blueprint: &TopologyBlueprint,
    control_system: Arc<dyn ControlSystemProvider>,
) -> Result<BuiltApplication, ContractError> {
    let config = blueprint.application.clone();
    let mut app = Application::new(config.name.clone(), config, control_system);

    let mut devices = BTreeMap::new();
    for device in &blueprint.devices {
        let backend = DummyDevice::new(device.alias.as_str());
        for register in &device.registers {
            backend.add_register(&register.name, register.value_type, register.n_samples)?;
        }
        let backend = Arc::new(backend);
        app.register_device(backend.clone())?;
        devices.insert(device.alias.clone(), backend);
    }

    let mut networks = BTreeMap::new();
    for connection in &blueprint.connections {
        let feeder = endpoint_node(&mut app, connection, &connection.feeder, Direction::Feeding)?;
        let mut network = None;
        for consumer in &connection.consumers {
            let consumer = endpoint_node(&mut app, connection, consumer, Direction::Consuming)?;
            network = Some(app.connect(feeder, consumer)?);
        }
        let network = network.ok_or_else(|| {
            ContractError::illegal_parameter(format!(
                "connection '{}' has no consumer",
                connection.name
            ))
        })?;
        debug!(connection = %connection.name, %network, "connection declared");
        networks.insert(connection.name.clone(), network);
    }

    for connection in &blueprint.connections {
        let Some(trigger) = &connection.trigger else {
            continue;
        };
        let trigger_network = networks.get(trigger).copied().ok_or_else(|| {
            ContractError::illegal_parameter(format!(
                "connection '{}' refers to unknown trigger '{trigger}'",
                connection.name
            ))
        })?;
        if let Some(&network) = networks.get(&connection.name) {
            app.add_trigger(network, trigger_network)?;
        }
    }

    Ok(BuiltApplication {
        app,
        devices,
        networks,
    })
}

fn endpoint_node(
    app: &mut Application,
    connection: &ConnectionConfig,
    endpoint: &EndpointConfig,
    direction: Direction,
) -> Result<NodeId, ContractError> {
    match endpoint {
        EndpointConfig::Device {
            device,
            register,
            mode,
        } => match direction {
            Direction::Feeding => app.device_feeder(device, register, *mode),
            Direction::Consuming => app.device_consumer(device, register),
        },
        EndpointConfig::ControlSystem { name, with_return } => {
            let mut node = NetworkNode::control_system(name, direction).with_return(*with_return);
            if let Some(value_type) = connection.value_type {
                node = node.with_value_type(value_type);
            }
            if let Some(unit) = &connection.unit {
                node = node.with_unit(unit.as_str());
            }
            app.add_node(node)
        }
    }
}
