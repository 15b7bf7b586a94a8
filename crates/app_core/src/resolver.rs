//! Turns declared networks into runtime connections.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use contracts::{
    for_value_type, into_trigger, BoxedProcessVariable, ContractError, ControlSystemProvider,
    Direction, ErasedProcessVariable, TriggerSource, UpdateMode, UserType, ValueType,
};
use dispatcher::{
    ConsumingFanOut, DataLossCounter, DispatcherConfig, FanOutMetrics, FeedingFanOut,
    ImplementationAdapter, InternalModule, ThreadedFanOut, TriggerFanOut,
};
use network::{AppBinding, NetworkGraph, NetworkId, NetworkNode, NodeKind, TriggerType};
use process_vars::{synchronized_pair, QueueConfig};

use crate::devices::DeviceRegistry;

/// Runtime shape chosen for a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionShape {
    /// Feeder and consumer share one endpoint or one variable pair.
    Direct,
    /// Two fixed implementations joined by an adapter task.
    Bridge,
    /// The feeder drives another network's trigger.
    TriggerSource,
    ThreadedFanOut,
    TriggerFanOut,
    FeedingFanOut,
    ConsumingFanOut,
}

impl ConnectionShape {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Bridge => "bridge",
            Self::TriggerSource => "trigger_source",
            Self::ThreadedFanOut => "threaded_fan_out",
            Self::TriggerFanOut => "trigger_fan_out",
            Self::FeedingFanOut => "feeding_fan_out",
            Self::ConsumingFanOut => "consuming_fan_out",
        }
    }
}

impl fmt::Display for ConnectionShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything resolution produced that has to live on at runtime.
#[derive(Default)]
pub struct ResolvedConnections {
    /// Active dispatchers and adapters, in creation order.
    pub internal_modules: Vec<Box<dyn InternalModule>>,
    /// Counters of passive fan-outs, which are owned by application accessors.
    pub passive_fan_outs: Vec<(String, Arc<FanOutMetrics>)>,
    pub shapes: Vec<(NetworkId, ConnectionShape)>,
}

/// Facts about the network being connected.
struct Target {
    id: NetworkId,
    label: String,
    dispatcher: String,
    value_type: ValueType,
    n_samples: usize,
    with_return: bool,
}

pub struct ConnectionResolver<'a> {
    graph: &'a mut NetworkGraph,
    devices: &'a DeviceRegistry,
    control_system: &'a dyn ControlSystemProvider,
    queue: QueueConfig,
    config: DispatcherConfig,
    data_loss: DataLossCounter,
    in_progress: HashSet<NetworkId>,
    output: ResolvedConnections,
}

impl<'a> ConnectionResolver<'a> {
    pub fn new(
        graph: &'a mut NetworkGraph,
        devices: &'a DeviceRegistry,
        control_system: &'a dyn ControlSystemProvider,
        queue: QueueConfig,
        config: DispatcherConfig,
        data_loss: DataLossCounter,
    ) -> Self {
        Self {
            graph,
            devices,
            control_system,
            queue,
            config,
            data_loss,
            in_progress: HashSet::new(),
            output: ResolvedConnections::default(),
        }
    }

    /// Resolve every network not resolved yet.
    #[instrument(name = "resolve_all", skip(self))]
    pub fn resolve_all(mut self) -> Result<ResolvedConnections, ContractError> {
        for id in self.graph.network_ids() {
            self.resolve(id)?;
        }
        info!(
            networks = self.output.shapes.len(),
            dispatchers = self.output.internal_modules.len(),
            "connections resolved"
        );
        Ok(self.output)
    }

    /// Resolve one network, after the network that triggers it.
    pub fn resolve(&mut self, id: NetworkId) -> Result<(), ContractError> {
        let network = self
            .graph
            .network(id)
            .ok_or_else(|| ContractError::logic(format!("unknown {id}")))?;
        if network.is_resolved() {
            return Ok(());
        }
        if !self.in_progress.insert(id) {
            return Err(ContractError::illegal_network(
                network.label(),
                "external triggers form a cycle",
            ));
        }
        let result = self.resolve_unchecked(id);
        self.in_progress.remove(&id);
        result
    }

    fn resolve_unchecked(&mut self, id: NetworkId) -> Result<(), ContractError> {
        let network = self
            .graph
            .network_mut(id)
            .ok_or_else(|| ContractError::logic(format!("unknown {id}")))?;
        network.validate()?;
        let trigger_type = network.classify_trigger()?;
        let label = network.label();

        if let Some(trigger) = network.external_trigger() {
            self.resolve(trigger)?;
        }

        let target = self.describe(id)?;
        debug!(network = %label, %trigger_type, value_type = %target.value_type, "resolving network");
        let shape = for_value_type!(
            target.value_type,
            T => self.connect::<T>(&target, trigger_type)?,
            any => {
                return Err(ContractError::illegal_network(label, "value type still unresolved"))
            }
        );

        if let Some(network) = self.graph.network_mut(id) {
            network.mark_resolved();
        }
        observability::record_network_resolved(shape.as_str());
        debug!(network = %label, %shape, "network resolved");
        self.output.shapes.push((id, shape));
        Ok(())
    }

    fn describe(&self, id: NetworkId) -> Result<Target, ContractError> {
        let network = self
            .graph
            .network(id)
            .ok_or_else(|| ContractError::logic(format!("unknown {id}")))?;
        let n_samples = network.n_samples();
        if let Some(node) = network
            .nodes()
            .iter()
            .find(|n| matches!(n.n_samples(), Some(k) if k > 0 && k != n_samples))
        {
            return Err(ContractError::illegal_parameter(format!(
                "{}: '{}' has {} samples, the network carries {n_samples}",
                network.label(),
                node.name(),
                node.n_samples().unwrap_or_default()
            )));
        }
        let feeder = network.feeder().map(|f| f.name().to_string()).unwrap_or_default();
        Ok(Target {
            id,
            label: network.label(),
            dispatcher: format!("{id}:{feeder}"),
            value_type: network.value_type(),
            n_samples,
            with_return: network.nodes().iter().any(NetworkNode::has_return),
        })
    }

    fn connect<T: UserType>(
        &mut self,
        target: &Target,
        trigger_type: TriggerType,
    ) -> Result<ConnectionShape, ContractError> {
        let network = self
            .graph
            .network(target.id)
            .ok_or_else(|| ContractError::logic(format!("unknown {}", target.id)))?;
        let feeder = network.feeder().cloned().ok_or_else(|| {
            ContractError::illegal_network(&target.label, "network has no feeding node")
        })?;
        let consumers: Vec<NetworkNode> = network.consumers().cloned().collect();

        match feeder.kind() {
            NodeKind::Device { .. } | NodeKind::ControlSystem { .. } => {
                self.connect_fixed_feeder::<T>(target, &feeder, consumers, trigger_type)
            }
            NodeKind::Application(binding) => {
                self.connect_application_feeder::<T>(target, &feeder, binding, consumers)
            }
            NodeKind::TriggerReceiver { .. } => Err(ContractError::not_implemented(format!(
                "{}: no connection rule for feeder {feeder}",
                target.label
            ))),
        }
    }

    /// Feeder with its own runtime implementation (device register or
    /// control-system variable).
    fn connect_fixed_feeder<T: UserType>(
        &mut self,
        target: &Target,
        feeder: &NetworkNode,
        consumers: Vec<NetworkNode>,
        trigger_type: TriggerType,
    ) -> Result<ConnectionShape, ContractError> {
        let source = self.fixed_source::<T>(target, feeder)?;

        match trigger_type {
            TriggerType::External => {
                let trigger = self
                    .graph
                    .network_mut(target.id)
                    .and_then(|n| n.take_trigger_impl())
                    .ok_or_else(|| {
                        ContractError::logic(format!(
                            "{}: trigger network provided no trigger",
                            target.label
                        ))
                    })?;
                let mut fan = TriggerFanOut::new(
                    &target.dispatcher,
                    trigger,
                    source,
                    self.config,
                    self.data_loss.clone(),
                )?;
                for consumer in &consumers {
                    fan.add_slave(self.sink_for::<T>(target, consumer)?)?;
                }
                self.output.internal_modules.push(Box::new(fan));
                Ok(ConnectionShape::TriggerFanOut)
            }
            TriggerType::PollingConsumer => {
                let (pollers, others): (Vec<_>, Vec<_>) = consumers
                    .into_iter()
                    .partition(|c| c.mode() == UpdateMode::Poll);
                let poller = pollers.into_iter().next().ok_or_else(|| {
                    ContractError::illegal_network(&target.label, "no poll-type consumer")
                })?;
                let binding = poller.app_binding().ok_or_else(|| {
                    ContractError::illegal_parameter(format!(
                        "{}: poll-type consumer {poller} must belong to an application module",
                        target.label
                    ))
                })?;
                if others.is_empty() {
                    fill_slot::<T>(binding, source)?;
                    return Ok(ConnectionShape::Direct);
                }
                let mut fan = ConsumingFanOut::new(&target.dispatcher, source, self.data_loss.clone())?;
                for consumer in &others {
                    fan.add_slave(self.sink_for::<T>(target, consumer)?)?;
                }
                self.output
                    .passive_fan_outs
                    .push((target.dispatcher.clone(), fan.metrics_handle()));
                fill_slot::<T>(binding, Box::new(fan))?;
                Ok(ConnectionShape::ConsumingFanOut)
            }
            TriggerType::Feeder => {
                if let [consumer] = consumers.as_slice() {
                    return match consumer.kind() {
                        NodeKind::Application(binding) => {
                            fill_slot::<T>(binding, source)?;
                            Ok(ConnectionShape::Direct)
                        }
                        NodeKind::Device { .. } | NodeKind::ControlSystem { .. } => {
                            let sink = self.fixed_sink::<T>(target, consumer)?;
                            let adapter = ImplementationAdapter::new(
                                &target.dispatcher,
                                source,
                                sink,
                                self.config,
                                self.data_loss.clone(),
                            )?;
                            self.output.internal_modules.push(Box::new(adapter));
                            Ok(ConnectionShape::Bridge)
                        }
                        NodeKind::TriggerReceiver { target: triggered } => {
                            self.install_trigger(*triggered, into_trigger::<T>(source))?;
                            Ok(ConnectionShape::TriggerSource)
                        }
                    };
                }

                let mut fan = if target.with_return {
                    ThreadedFanOut::with_return(
                        &target.dispatcher,
                        source,
                        self.config,
                        self.data_loss.clone(),
                    )?
                } else {
                    ThreadedFanOut::new(
                        &target.dispatcher,
                        source,
                        self.config,
                        self.data_loss.clone(),
                    )?
                };
                for consumer in &consumers {
                    fan.add_slave(self.sink_for::<T>(target, consumer)?)?;
                }
                self.output.internal_modules.push(Box::new(fan));
                Ok(ConnectionShape::ThreadedFanOut)
            }
        }
    }

    /// Feeder declared by an application module.
    fn connect_application_feeder<T: UserType>(
        &mut self,
        target: &Target,
        feeder: &NetworkNode,
        binding: &AppBinding,
        consumers: Vec<NetworkNode>,
    ) -> Result<ConnectionShape, ContractError> {
        if let [consumer] = consumers.as_slice() {
            match consumer.kind() {
                NodeKind::Application(consumer_binding) => {
                    let (feeding, consuming) = synchronized_pair::<T>(
                        feeder.name().as_str(),
                        target.n_samples,
                        self.queue,
                        target.with_return,
                    );
                    fill_slot::<T>(binding, Box::new(feeding))?;
                    fill_slot::<T>(consumer_binding, Box::new(consuming))?;
                }
                NodeKind::Device { .. } | NodeKind::ControlSystem { .. } => {
                    let sink = self.fixed_sink::<T>(target, consumer)?;
                    fill_slot::<T>(binding, sink)?;
                }
                NodeKind::TriggerReceiver { target: triggered } => {
                    let (feeding, consuming) =
                        synchronized_pair::<T>(feeder.name().as_str(), target.n_samples, self.queue, false);
                    fill_slot::<T>(binding, Box::new(feeding))?;
                    self.install_trigger(*triggered, into_trigger::<T>(Box::new(consuming)))?;
                }
            }
            return Ok(ConnectionShape::Direct);
        }

        let mut fan = FeedingFanOut::<T>::new(
            &target.dispatcher,
            target.n_samples,
            target.with_return,
            self.data_loss.clone(),
        );
        for consumer in &consumers {
            fan.add_slave(self.sink_for::<T>(target, consumer)?)?;
        }
        self.output
            .passive_fan_outs
            .push((target.dispatcher.clone(), fan.metrics_handle()));
        fill_slot::<T>(binding, Box::new(fan))?;
        Ok(ConnectionShape::FeedingFanOut)
    }

    /// Endpoint a dispatcher writes into for `consumer`.
    fn sink_for<T: UserType>(
        &mut self,
        target: &Target,
        consumer: &NetworkNode,
    ) -> Result<BoxedProcessVariable<T>, ContractError> {
        match consumer.kind() {
            NodeKind::Application(binding) => {
                let (feeding, consuming) = synchronized_pair::<T>(
                    consumer.name().as_str(),
                    target.n_samples,
                    self.queue,
                    consumer.has_return(),
                );
                fill_slot::<T>(binding, Box::new(consuming))?;
                Ok(Box::new(feeding))
            }
            NodeKind::Device { .. } | NodeKind::ControlSystem { .. } => {
                self.fixed_sink::<T>(target, consumer)
            }
            NodeKind::TriggerReceiver { target: triggered } => {
                let (feeding, consuming) =
                    synchronized_pair::<T>(consumer.name().as_str(), 0, self.queue, false);
                self.install_trigger(*triggered, into_trigger::<T>(Box::new(consuming)))?;
                Ok(Box::new(feeding))
            }
        }
    }

    /// Readable implementation of a fixed feeder.
    fn fixed_source<T: UserType>(
        &self,
        target: &Target,
        feeder: &NetworkNode,
    ) -> Result<BoxedProcessVariable<T>, ContractError> {
        match feeder.kind() {
            NodeKind::Device { alias, register } => {
                if target.with_return {
                    return Err(ContractError::illegal_parameter(format!(
                        "{}: device register {feeder} cannot take a return channel",
                        target.label
                    )));
                }
                self.devices.accessor::<T>(
                    alias,
                    register,
                    Direction::Consuming,
                    feeder.mode(),
                    target.n_samples,
                )
            }
            NodeKind::ControlSystem { name } => self
                .control_system
                .create_process_variable(
                    name,
                    target.value_type,
                    Direction::Consuming,
                    target.n_samples,
                    target.with_return,
                )?
                .downcast::<T>(),
            _ => Err(ContractError::illegal_parameter(format!(
                "{}: {feeder} has no fixed implementation",
                target.label
            ))),
        }
    }

    /// Writeable implementation of a fixed consumer.
    fn fixed_sink<T: UserType>(
        &self,
        target: &Target,
        consumer: &NetworkNode,
    ) -> Result<BoxedProcessVariable<T>, ContractError> {
        match consumer.kind() {
            NodeKind::Device { alias, register } => self.devices.accessor::<T>(
                alias,
                register,
                Direction::Feeding,
                consumer.mode(),
                target.n_samples,
            ),
            NodeKind::ControlSystem { name } => self
                .control_system
                .create_process_variable(
                    name,
                    target.value_type,
                    Direction::Feeding,
                    target.n_samples,
                    consumer.has_return(),
                )?
                .downcast::<T>(),
            _ => Err(ContractError::illegal_parameter(format!(
                "{}: {consumer} has no fixed implementation",
                target.label
            ))),
        }
    }

    fn install_trigger(
        &mut self,
        triggered: NetworkId,
        trigger: Box<dyn TriggerSource>,
    ) -> Result<(), ContractError> {
        self.graph
            .network_mut(triggered)
            .ok_or_else(|| ContractError::logic(format!("unknown {triggered}")))?
            .set_trigger_impl(trigger)
    }
}

fn fill_slot<T: UserType>(
    binding: &AppBinding,
    implementation: BoxedProcessVariable<T>,
) -> Result<(), ContractError> {
    binding.slot.fill(ErasedProcessVariable::new::<T>(implementation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::Application;
    use contracts::{ApplicationConfig, DataValidity, Sample, VersionNumber};
    use providers::{DummyDevice, PvManager};
    use tokio::time::{timeout, Duration};

    fn app() -> (Application, Arc<PvManager>) {
        let pv = Arc::new(PvManager::default());
        let app = Application::new("resolver", ApplicationConfig::new("resolver"), pv.clone());
        (app, pv)
    }

    fn device(alias: &str, registers: &[(&str, ValueType, usize)]) -> Arc<DummyDevice> {
        let dev = DummyDevice::new(alias);
        for (name, vt, n) in registers {
            dev.add_register(name, *vt, *n).unwrap();
        }
        Arc::new(dev)
    }

    #[tokio::test]
    async fn test_application_pair_is_direct() {
        let (mut app, _pv) = app();
        let producer = app.module("producer").unwrap();
        let consumer = app.module("consumer").unwrap();
        let mut out = app.output::<i32>(&producer, "x", 1).unwrap();
        let mut input = app.input::<i32>(&consumer, "x", 1).unwrap();
        app.connect(out.node(), input.node()).unwrap();

        app.resolve_all().unwrap();
        assert_eq!(app.connection_shapes()[0].1, ConnectionShape::Direct);
        assert_eq!(app.dispatcher_count(), 0);

        out.set(11);
        out.write().unwrap();
        input.read().await.unwrap();
        assert_eq!(input.get(), 11);
        assert!(input.version() >= out.version());
        assert_eq!(input.data_validity(), DataValidity::Ok);
    }

    #[tokio::test]
    async fn test_application_feeder_fans_out_passively() {
        let (mut app, _pv) = app();
        let producer = app.module("producer").unwrap();
        let mut out = app.output::<f32>(&producer, "y", 1).unwrap();
        let mut readers = Vec::new();
        for name in ["a", "b", "c"] {
            let owner = app.module(name).unwrap();
            let input = app.input::<f32>(&owner, "y", 1).unwrap();
            app.connect(out.node(), input.node()).unwrap();
            readers.push(input);
        }

        app.resolve_all().unwrap();
        assert_eq!(app.connection_shapes()[0].1, ConnectionShape::FeedingFanOut);
        assert_eq!(app.dispatcher_count(), 0);

        out.set(2.5);
        out.write().unwrap();
        for reader in &mut readers {
            reader.read().await.unwrap();
            assert_eq!(reader.get(), 2.5);
            assert_eq!(reader.version(), out.version());
        }
        let metrics = app.dispatcher_metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].1.updates, 1);
    }

    #[tokio::test]
    async fn test_polling_consumer_drives_other_sinks() {
        let (mut app, pv) = app();
        let dev = device("dev", &[("LEVEL", ValueType::Uint32, 1)]);
        app.register_device(dev.clone()).unwrap();
        let owner = app.module("watcher").unwrap();
        let mut level = app.poll_input::<u32>(&owner, "level", 1).unwrap();
        let feeder = app.device_feeder("dev", "LEVEL", UpdateMode::Poll).unwrap();
        let mirror = app.control_system_consumer("level", false).unwrap();
        app.connect(feeder, level.node()).unwrap();
        app.connect(feeder, mirror).unwrap();

        app.run().await.unwrap();
        assert_eq!(app.connection_shapes()[0].1, ConnectionShape::ConsumingFanOut);

        dev.write_register("LEVEL", vec![9u32]).unwrap();
        level.read().await.unwrap();
        assert_eq!(level.get(), 9);

        let mut cs = pv.take_control_system_side::<u32>("level").unwrap();
        let mirrored = cs.read_non_blocking().unwrap().unwrap();
        assert_eq!(mirrored.first(), Some(&9));
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_external_trigger_stamps_trigger_version() {
        let (mut app, pv) = app();
        let dev = device("adc", &[("V", ValueType::Int16, 1)]);
        app.register_device(dev.clone()).unwrap();

        let clock = app.module("clock").unwrap();
        let mut tick = app.output::<u8>(&clock, "tick", 1).unwrap();
        let tick_cs = app.control_system_consumer("tick", false).unwrap();
        let trigger = app.connect(tick.node(), tick_cs).unwrap();

        let feeder = app.device_feeder("adc", "V", UpdateMode::Poll).unwrap();
        let voltage = app.control_system_consumer("voltage", false).unwrap();
        let network = app.connect(feeder, voltage).unwrap();
        app.add_trigger(network, trigger).unwrap();

        app.run().await.unwrap();
        let shapes: Vec<_> = app.connection_shapes().iter().map(|(_, s)| *s).collect();
        assert!(shapes.contains(&ConnectionShape::TriggerFanOut));
        assert!(shapes.contains(&ConnectionShape::FeedingFanOut));

        dev.write_register("V", vec![-3i16]).unwrap();
        tick.set(1);
        tick.write().unwrap();

        let mut cs = pv.take_control_system_side::<i16>("voltage").unwrap();
        let sample = timeout(Duration::from_secs(1), cs.read()).await.unwrap().unwrap();
        assert_eq!(sample.first(), Some(&-3));
        assert_eq!(sample.version, tick.version());
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_fixed_pair_is_bridged() {
        let (mut app, _pv) = app();
        let src = device("src", &[("OUT", ValueType::Float64, 2)]);
        let dst = device("dst", &[("IN", ValueType::Float64, 2)]);
        app.register_device(src.clone()).unwrap();
        app.register_device(dst.clone()).unwrap();
        let feeder = app.device_feeder("src", "OUT", UpdateMode::Push).unwrap();
        let consumer = app.device_consumer("dst", "IN").unwrap();
        app.connect(feeder, consumer).unwrap();

        app.run().await.unwrap();
        assert_eq!(app.connection_shapes()[0].1, ConnectionShape::Bridge);
        assert_eq!(src.open_count(), 1);
        assert_eq!(dst.open_count(), 1);

        let version = src.write_register("OUT", vec![1.0, 2.0]).unwrap();
        timeout(Duration::from_secs(1), async {
            loop {
                let current = dst.read_register::<f64>("IN").unwrap();
                if current.version == version {
                    assert_eq!(current.value, vec![1.0, 2.0]);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_cycle_is_rejected() {
        let (mut app, _pv) = app();
        app.register_device(device("dev", &[("A", ValueType::Int32, 1), ("B", ValueType::Int32, 1)]))
            .unwrap();
        let a = app.device_feeder("dev", "A", UpdateMode::Poll).unwrap();
        let b = app.device_feeder("dev", "B", UpdateMode::Poll).unwrap();
        let cs_a = app.control_system_consumer("a", false).unwrap();
        let cs_b = app.control_system_consumer("b", false).unwrap();
        let net_a = app.connect(a, cs_a).unwrap();
        let net_b = app.connect(b, cs_b).unwrap();
        app.add_trigger(net_a, net_b).unwrap();
        app.add_trigger(net_b, net_a).unwrap();

        assert!(matches!(
            app.resolve_all(),
            Err(ContractError::IllegalNetwork { .. })
        ));
    }

    #[tokio::test]
    async fn test_poll_consumer_outside_application_is_rejected() {
        let (mut app, _pv) = app();
        app.register_device(device("dev", &[("A", ValueType::Int32, 1)])).unwrap();
        let feeder = app.device_feeder("dev", "A", UpdateMode::Poll).unwrap();
        let poller = app
            .add_node(
                NetworkNode::control_system("a", Direction::Consuming).with_mode(UpdateMode::Poll),
            )
            .unwrap();
        app.connect(feeder, poller).unwrap();

        assert!(matches!(
            app.resolve_all(),
            Err(ContractError::IllegalParameter { .. })
        ));
    }

    #[tokio::test]
    async fn test_sample_count_mismatch_is_rejected() {
        let (mut app, _pv) = app();
        app.register_device(device("dev", &[("WAVE", ValueType::Float32, 4)])).unwrap();
        let owner = app.module("m").unwrap();
        let input = app.input::<f32>(&owner, "wave", 2).unwrap();
        let feeder = app.device_feeder("dev", "WAVE", UpdateMode::Push).unwrap();
        app.connect(feeder, input.node()).unwrap();

        assert!(matches!(
            app.resolve_all(),
            Err(ContractError::IllegalParameter { .. })
        ));
    }

    #[tokio::test]
    async fn test_control_system_with_return_uses_return_fan_out() {
        let (mut app, pv) = app();
        let feeder = app.control_system_feeder("setpoint", true).unwrap();
        let owner = app.module("ctrl").unwrap();
        let mut input = app.input_with_return::<i64>(&owner, "setpoint", 1).unwrap();
        let monitor = app.control_system_consumer("setpoint_rb", false).unwrap();
        app.connect(feeder, input.node()).unwrap();
        app.connect(feeder, monitor).unwrap();

        app.run().await.unwrap();
        assert_eq!(app.connection_shapes()[0].1, ConnectionShape::ThreadedFanOut);

        let mut operator = pv.take_control_system_side::<i64>("setpoint").unwrap();
        operator.write(Sample::scalar(5, VersionNumber::new())).unwrap();
        timeout(Duration::from_secs(1), input.read()).await.unwrap().unwrap();
        assert_eq!(input.get(), 5);

        // the module corrects the value; the operator sees it come back
        input.set(4);
        input.write().unwrap();
        let back = timeout(Duration::from_secs(1), operator.read())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(back.first(), Some(&4));
        assert!(back.version >= input.version());
        app.shutdown().await.unwrap();
    }
}
