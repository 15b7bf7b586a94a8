//! Explicit application context: declaration, resolution and lifecycle.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use contracts::{
    ApplicationConfig, ContractError, ControlSystemProvider, DeviceBackend, Direction,
    EntityOwner, ImplementationSlot, UpdateMode, UserType, VariableName,
};
use dispatcher::{
    DataLossCounter, DispatcherConfig, ErrorCollector, FanOutMetrics, InternalModule,
    MetricsSnapshot, WorkerHandle,
};
use network::{AppBinding, NetworkGraph, NetworkId, NetworkNode, NodeId};
use observability::{DispatcherRow, MetricsSummary};
use process_vars::QueueConfig;

use crate::accessor::{Accessor, AccessorDecl};
use crate::devices::DeviceRegistry;
use crate::module::ApplicationModule;
use crate::resolver::{ConnectionResolver, ConnectionShape};

/// Application lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationState {
    /// Endpoints and connections are being declared
    Declaring,
    /// Every network has its runtime implementation
    Resolved,
    /// Dispatchers and module tasks are running
    Running,
    /// Dispatchers deactivated; may be activated again
    Stopped,
    /// Terminal
    ShutDown,
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Declaring => "declaring",
            Self::Resolved => "resolved",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::ShutDown => "shut down",
        };
        f.write_str(s)
    }
}

/// Object-safe wrapper so modules of different types can share one list.
trait ModuleTask: Send {
    fn task_name(&self) -> &str;

    fn spawn(self: Box<Self>) -> Result<WorkerHandle<Box<dyn ModuleTask>>, ContractError>;
}

impl<M: ApplicationModule + 'static> ModuleTask for M {
    fn task_name(&self) -> &str {
        ApplicationModule::name(self)
    }

    fn spawn(self: Box<Self>) -> Result<WorkerHandle<Box<dyn ModuleTask>>, ContractError> {
        let name = ApplicationModule::name(&*self).to_string();
        WorkerHandle::spawn(&name.clone(), move |mut shutdown, steady| async move {
            let mut module = self;
            steady.mark();
            tokio::select! {
                biased;
                _ = shutdown.requested() => {
                    debug!(module = %name, "module cancelled");
                }
                result = module.main_loop() => match result {
                    Ok(()) => debug!(module = %name, "module main loop returned"),
                    Err(e) => error!(module = %name, error = %e, "module main loop failed"),
                },
            }
            module as Box<dyn ModuleTask>
        })
    }
}

/// The application context. Owns the declared topology, the device
/// registry, the resolved dispatchers and the module tasks.
pub struct Application {
    name: String,
    config: ApplicationConfig,
    control_system: Arc<dyn ControlSystemProvider>,
    devices: DeviceRegistry,
    graph: NetworkGraph,
    owners: BTreeMap<String, Arc<EntityOwner>>,
    modules: Vec<Box<dyn ModuleTask>>,
    module_workers: Vec<WorkerHandle<Box<dyn ModuleTask>>>,
    internal_modules: Vec<Box<dyn InternalModule>>,
    passive_fan_outs: Vec<(String, Arc<FanOutMetrics>)>,
    shapes: Vec<(NetworkId, ConnectionShape)>,
    data_loss: DataLossCounter,
    state: ApplicationState,
}

impl Application {
    pub fn new(
        name: impl Into<String>,
        config: ApplicationConfig,
        control_system: Arc<dyn ControlSystemProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            control_system,
            devices: DeviceRegistry::new(),
            graph: NetworkGraph::new(),
            owners: BTreeMap::new(),
            modules: Vec::new(),
            module_workers: Vec::new(),
            internal_modules: Vec::new(),
            passive_fan_outs: Vec::new(),
            shapes: Vec::new(),
            data_loss: DataLossCounter::new(),
            state: ApplicationState::Declaring,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ApplicationConfig {
        &self.config
    }

    pub fn state(&self) -> ApplicationState {
        self.state
    }

    pub fn graph(&self) -> &NetworkGraph {
        &self.graph
    }

    pub fn register_device(&mut self, backend: Arc<dyn DeviceBackend>) -> Result<(), ContractError> {
        self.require_declaring("register a device")?;
        self.devices.register(backend)
    }

    // ---- declaration ----

    /// Owner for a module's endpoints. Declaring the same name twice returns
    /// the same owner.
    pub fn module(&mut self, name: &str) -> Result<Arc<EntityOwner>, ContractError> {
        self.require_declaring("declare a module")?;
        if name.is_empty() {
            return Err(ContractError::illegal_parameter("module name must not be empty"));
        }
        let owner = self
            .owners
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(EntityOwner::new(name)));
        Ok(owner.clone())
    }

    pub fn input<T: UserType>(
        &mut self,
        owner: &Arc<EntityOwner>,
        name: &str,
        n_samples: usize,
    ) -> Result<Accessor<T>, ContractError> {
        self.declare(owner, name, Direction::Consuming, UpdateMode::Push, false, n_samples)
    }

    pub fn input_with_return<T: UserType>(
        &mut self,
        owner: &Arc<EntityOwner>,
        name: &str,
        n_samples: usize,
    ) -> Result<Accessor<T>, ContractError> {
        self.declare(owner, name, Direction::Consuming, UpdateMode::Push, true, n_samples)
    }

    /// Input that never blocks; reading it pulls the current value.
    pub fn poll_input<T: UserType>(
        &mut self,
        owner: &Arc<EntityOwner>,
        name: &str,
        n_samples: usize,
    ) -> Result<Accessor<T>, ContractError> {
        self.declare(owner, name, Direction::Consuming, UpdateMode::Poll, false, n_samples)
    }

    pub fn output<T: UserType>(
        &mut self,
        owner: &Arc<EntityOwner>,
        name: &str,
        n_samples: usize,
    ) -> Result<Accessor<T>, ContractError> {
        self.declare(owner, name, Direction::Feeding, UpdateMode::Push, false, n_samples)
    }

    pub fn output_with_return<T: UserType>(
        &mut self,
        owner: &Arc<EntityOwner>,
        name: &str,
        n_samples: usize,
    ) -> Result<Accessor<T>, ContractError> {
        self.declare(owner, name, Direction::Feeding, UpdateMode::Push, true, n_samples)
    }

    fn declare<T: UserType>(
        &mut self,
        owner: &Arc<EntityOwner>,
        name: &str,
        direction: Direction,
        mode: UpdateMode,
        with_return: bool,
        n_samples: usize,
    ) -> Result<Accessor<T>, ContractError> {
        self.require_declaring("declare an accessor")?;
        let full_name = VariableName::from(format!("{}/{name}", owner.name()));
        let slot = ImplementationSlot::new();
        let binding = AppBinding {
            owner: owner.clone(),
            slot: slot.clone(),
        };
        let node = NetworkNode::application(
            full_name.clone(),
            binding,
            direction,
            T::VALUE_TYPE,
            n_samples,
        )
        .with_mode(mode)
        .with_return(with_return);
        let node = self.graph.add_node(node);

        Ok(Accessor::new(AccessorDecl {
            name: full_name,
            node,
            owner: owner.clone(),
            slot,
            direction,
            mode,
            with_return,
            n_samples,
        }))
    }

    /// Device register that feeds a network.
    pub fn device_feeder(
        &mut self,
        alias: &str,
        register: &str,
        mode: UpdateMode,
    ) -> Result<NodeId, ContractError> {
        self.device_node(alias, register, Direction::Feeding, mode)
    }

    /// Device register written by a network.
    pub fn device_consumer(&mut self, alias: &str, register: &str) -> Result<NodeId, ContractError> {
        self.device_node(alias, register, Direction::Consuming, UpdateMode::Push)
    }

    fn device_node(
        &mut self,
        alias: &str,
        register: &str,
        direction: Direction,
        mode: UpdateMode,
    ) -> Result<NodeId, ContractError> {
        self.require_declaring("declare a device node")?;
        let info = self.devices.register_info(alias, register)?;
        let node = NetworkNode::device(alias, register, direction, mode)
            .with_value_type(info.value_type)
            .with_n_samples(info.n_samples);
        Ok(self.graph.add_node(node))
    }

    /// Control-system variable that feeds a network. Its value type is taken
    /// from the network.
    pub fn control_system_feeder(
        &mut self,
        name: &str,
        with_return: bool,
    ) -> Result<NodeId, ContractError> {
        self.add_node(NetworkNode::control_system(name, Direction::Feeding).with_return(with_return))
    }

    pub fn control_system_consumer(
        &mut self,
        name: &str,
        with_return: bool,
    ) -> Result<NodeId, ContractError> {
        self.add_node(
            NetworkNode::control_system(name, Direction::Consuming).with_return(with_return),
        )
    }

    /// Add a prepared fixed node (e.g. a control-system node with an explicit
    /// value type or unit).
    pub fn add_node(&mut self, node: NetworkNode) -> Result<NodeId, ContractError> {
        self.require_declaring("add a node")?;
        if node.app_binding().is_some() {
            return Err(ContractError::illegal_parameter(format!(
                "application node {node} must be declared through a module"
            )));
        }
        Ok(self.graph.add_node(node))
    }

    pub fn connect(&mut self, a: NodeId, b: NodeId) -> Result<NetworkId, ContractError> {
        self.require_declaring("connect nodes")?;
        self.graph.connect(a, b)
    }

    /// Let updates of `trigger` drive the poll-type feeder of `network`.
    pub fn add_trigger(&mut self, network: NetworkId, trigger: NetworkId) -> Result<(), ContractError> {
        self.require_declaring("add a trigger")?;
        self.graph.add_trigger(network, trigger)
    }

    /// Let updates of the lone `feeder` drive the poll-type feeder of
    /// `network`. Returns the trigger network.
    pub fn add_trigger_feeder(
        &mut self,
        network: NetworkId,
        feeder: NodeId,
    ) -> Result<NetworkId, ContractError> {
        self.require_declaring("add a trigger")?;
        self.graph.add_trigger_feeder(network, feeder)
    }

    pub fn network_of(&self, node: NodeId) -> Option<NetworkId> {
        self.graph.network_of(node)
    }

    /// Register a module whose main loop runs while the application runs.
    pub fn add_module<M: ApplicationModule + 'static>(&mut self, module: M) -> Result<(), ContractError> {
        match self.state {
            ApplicationState::Declaring | ApplicationState::Resolved => {
                debug!(module = %ApplicationModule::name(&module), "module added");
                self.modules.push(Box::new(module));
                Ok(())
            }
            state => Err(ContractError::logic(format!(
                "cannot add module '{}': application is {state}",
                ApplicationModule::name(&module)
            ))),
        }
    }

    fn require_declaring(&self, what: &str) -> Result<(), ContractError> {
        if self.state == ApplicationState::Declaring {
            Ok(())
        } else {
            Err(ContractError::logic(format!(
                "cannot {what}: application '{}' is {}",
                self.name, self.state
            )))
        }
    }

    // ---- lifecycle ----

    /// Resolve every network. Calling it again is a no-op.
    #[instrument(name = "application_resolve", skip(self), fields(application = %self.name))]
    pub fn resolve_all(&mut self) -> Result<(), ContractError> {
        match self.state {
            ApplicationState::Declaring => {}
            ApplicationState::ShutDown => {
                return Err(ContractError::logic("application was shut down"));
            }
            _ => return Ok(()),
        }
        if self.name.is_empty() {
            return Err(ContractError::illegal_parameter("application name must not be empty"));
        }
        for node in self.graph.unconnected_nodes() {
            warn!(node = %node, "node is not connected to any network");
        }

        let queue = QueueConfig::from(&self.config);
        let dispatcher = DispatcherConfig {
            retry_interval: Duration::from_millis(self.config.retry_interval_ms),
        };
        let resolved = ConnectionResolver::new(
            &mut self.graph,
            &self.devices,
            self.control_system.as_ref(),
            queue,
            dispatcher,
            self.data_loss.clone(),
        )
        .resolve_all()?;

        self.internal_modules.extend(resolved.internal_modules);
        self.passive_fan_outs.extend(resolved.passive_fan_outs);
        self.shapes.extend(resolved.shapes);
        self.state = ApplicationState::Resolved;
        info!(
            networks = self.shapes.len(),
            dispatchers = self.internal_modules.len(),
            "application resolved"
        );
        Ok(())
    }

    /// Start every dispatcher in creation order. If one fails the ones
    /// already started are stopped again.
    #[instrument(name = "application_activate", skip(self), fields(application = %self.name))]
    pub async fn activate_all(&mut self) -> Result<(), ContractError> {
        match self.state {
            ApplicationState::Resolved | ApplicationState::Stopped => {}
            ApplicationState::Running => return Ok(()),
            state => {
                return Err(ContractError::logic(format!(
                    "cannot activate: application is {state}"
                )))
            }
        }

        for index in 0..self.internal_modules.len() {
            if let Err(e) = self.internal_modules[index].activate() {
                error!(
                    module = %self.internal_modules[index].name(),
                    error = %e,
                    "activation failed, rolling back"
                );
                for started in self.internal_modules[..index].iter_mut().rev() {
                    if let Err(rollback) = started.deactivate().await {
                        error!(module = %started.name(), error = %rollback, "rollback failed");
                    }
                }
                return Err(e);
            }
        }
        self.state = ApplicationState::Running;
        debug!(dispatchers = self.internal_modules.len(), "dispatchers activated");
        Ok(())
    }

    /// Stop every dispatcher in reverse creation order. No sink is written
    /// once this returns.
    #[instrument(name = "application_deactivate", skip(self), fields(application = %self.name))]
    pub async fn deactivate_all(&mut self) -> Result<(), ContractError> {
        let mut errors = ErrorCollector::new();
        for module in self.internal_modules.iter_mut().rev() {
            if let Err(e) = module.deactivate().await {
                error!(module = %module.name(), error = %e, "deactivation failed");
                errors.collect(e);
            }
        }
        if self.state == ApplicationState::Running {
            self.state = ApplicationState::Stopped;
        }
        errors.into_result()
    }

    /// Resolve, activate the dispatchers, then start the module tasks.
    #[instrument(name = "application_run", skip(self), fields(application = %self.name))]
    pub async fn run(&mut self) -> Result<(), ContractError> {
        self.resolve_all()?;
        self.activate_all().await?;

        let mut modules = std::mem::take(&mut self.modules).into_iter();
        while let Some(module) = modules.next() {
            let name = module.task_name().to_string();
            match module.spawn() {
                Ok(handle) => self.module_workers.push(handle),
                Err(e) => {
                    error!(module = %name, error = %e, "module could not be started");
                    self.modules.extend(modules);
                    self.stop_modules().await;
                    if let Err(rollback) = self.deactivate_all().await {
                        error!(error = %rollback, "rollback after failed start incomplete");
                    }
                    return Err(e);
                }
            }
        }
        info!(
            modules = self.module_workers.len(),
            dispatchers = self.internal_modules.len(),
            "application running"
        );
        Ok(())
    }

    /// Stop dispatchers first, then module tasks. Calling it again is a no-op.
    #[instrument(name = "application_shutdown", skip(self), fields(application = %self.name))]
    pub async fn shutdown(&mut self) -> Result<(), ContractError> {
        if self.state == ApplicationState::ShutDown {
            return Ok(());
        }
        let result = self.deactivate_all().await;
        self.stop_modules().await;
        self.state = ApplicationState::ShutDown;
        info!(data_loss = self.data_loss.get(), "application shut down");
        result
    }

    async fn stop_modules(&mut self) {
        for handle in self.module_workers.drain(..).rev() {
            let name = handle.name().to_string();
            match handle.shutdown().await {
                Ok(module) => self.modules.push(module),
                Err(e) => error!(module = %name, error = %e, "module task failed"),
            }
        }
    }

    // ---- diagnostics ----

    /// Text listing of every network.
    pub fn dump_connections(&self) -> String {
        self.graph.dump()
    }

    /// Runtime shape chosen for each resolved network.
    pub fn connection_shapes(&self) -> &[(NetworkId, ConnectionShape)] {
        &self.shapes
    }

    /// Active dispatchers first, then passive fan-outs.
    pub fn dispatcher_metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.internal_modules
            .iter()
            .map(|m| (m.name().to_string(), m.metrics()))
            .chain(
                self.passive_fan_outs
                    .iter()
                    .map(|(name, metrics)| (name.clone(), metrics.snapshot())),
            )
            .collect()
    }

    pub fn dispatcher_count(&self) -> usize {
        self.internal_modules.len()
    }

    /// Values dropped by full queues since start.
    pub fn data_loss_count(&self) -> u64 {
        self.data_loss.get()
    }

    /// True once every active dispatcher completed its initial read.
    pub fn all_reached_steady_state(&self) -> bool {
        self.internal_modules
            .iter()
            .all(|m| m.has_reached_steady_state())
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        let mut summary = MetricsSummary::new(self.data_loss_count());
        for (name, snapshot) in self.dispatcher_metrics() {
            summary.push(DispatcherRow {
                name,
                updates: snapshot.updates,
                sink_writes: snapshot.sink_writes,
                sink_failures: snapshot.sink_failures,
                data_loss: snapshot.data_loss,
                return_updates: snapshot.return_updates,
            });
        }
        summary
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        if self.state == ApplicationState::Running {
            error!(
                application = %self.name,
                "application dropped while running; call shutdown() first"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{DataValidity, ValueType};
    use providers::{DummyDevice, PvManager};
    use tokio::time::{sleep, timeout, Duration};

    fn app(name: &str) -> (Application, Arc<PvManager>) {
        let pv = Arc::new(PvManager::default());
        let app = Application::new(name, ApplicationConfig::new(name), pv.clone());
        (app, pv)
    }

    struct Doubler {
        input: Accessor<i32>,
        output: Accessor<i32>,
    }

    impl ApplicationModule for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        async fn main_loop(&mut self) -> Result<(), ContractError> {
            loop {
                self.input.read().await?;
                self.output.set(self.input.get() * 2);
                self.output.write()?;
            }
        }
    }

    #[tokio::test]
    async fn test_module_between_control_system_variables() {
        let (mut app, pv) = app("demo");
        let owner = app.module("doubler").unwrap();
        let input = app.input::<i32>(&owner, "in", 1).unwrap();
        let output = app.output::<i32>(&owner, "out", 1).unwrap();

        let cs_in = app.control_system_feeder("in", false).unwrap();
        let cs_out = app.control_system_consumer("out", false).unwrap();
        app.connect(cs_in, input.node()).unwrap();
        app.connect(output.node(), cs_out).unwrap();
        app.add_module(Doubler { input, output }).unwrap();

        app.run().await.unwrap();
        assert_eq!(app.state(), ApplicationState::Running);

        let mut writer = pv.take_control_system_side::<i32>("in").unwrap();
        let mut reader = pv.take_control_system_side::<i32>("out").unwrap();
        writer
            .write(contracts::Sample::scalar(21, contracts::VersionNumber::new()))
            .unwrap();
        let sample = timeout(Duration::from_secs(1), reader.read())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sample.first(), Some(&42));
        assert_eq!(sample.validity, DataValidity::Ok);

        app.shutdown().await.unwrap();
        assert_eq!(app.state(), ApplicationState::ShutDown);
    }

    #[tokio::test]
    async fn test_resolve_twice_creates_one_dispatcher() {
        let (mut app, _pv) = app("demo");
        app.register_device(Arc::new(
            DummyDevice::new("dev").with_register("T", ValueType::Int32, 1).unwrap(),
        ))
        .unwrap();
        let feeder = app.device_feeder("dev", "T", UpdateMode::Push).unwrap();
        let a = app.control_system_consumer("a", false).unwrap();
        let b = app.control_system_consumer("b", false).unwrap();
        app.connect(feeder, a).unwrap();
        app.connect(feeder, b).unwrap();

        app.resolve_all().unwrap();
        app.resolve_all().unwrap();
        assert_eq!(app.dispatcher_count(), 1);
        assert_eq!(
            app.connection_shapes()[0].1,
            ConnectionShape::ThreadedFanOut
        );
    }

    #[tokio::test]
    async fn test_declarations_rejected_after_resolution() {
        let (mut app, _pv) = app("demo");
        let owner = app.module("m").unwrap();
        let out = app.output::<f64>(&owner, "x", 1).unwrap();
        let cs = app.control_system_consumer("x", false).unwrap();
        app.connect(out.node(), cs).unwrap();
        app.resolve_all().unwrap();

        assert!(matches!(app.module("other"), Err(ContractError::Logic { .. })));
        assert!(matches!(
            app.control_system_consumer("y", false),
            Err(ContractError::Logic { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_name_rejected_at_run() {
        let (mut app, _pv) = app("");
        assert!(matches!(
            app.run().await,
            Err(ContractError::IllegalParameter { .. })
        ));
    }

    struct Unstartable;

    impl ModuleTask for Unstartable {
        fn task_name(&self) -> &str {
            "unstartable"
        }

        fn spawn(self: Box<Self>) -> Result<WorkerHandle<Box<dyn ModuleTask>>, ContractError> {
            Err(ContractError::logic("no worker for this module"))
        }
    }

    #[tokio::test]
    async fn test_failed_module_start_rolls_back_dispatchers() {
        let (mut app, _pv) = app("demo");
        let cs_in = app.control_system_feeder("in", false).unwrap();
        let a = app.control_system_consumer("a", false).unwrap();
        let b = app.control_system_consumer("b", false).unwrap();
        app.connect(cs_in, a).unwrap();
        app.connect(cs_in, b).unwrap();
        let owner = app.module("typer").unwrap();
        let typed = app.input::<i32>(&owner, "in", 1).unwrap();
        app.connect(cs_in, typed.node()).unwrap();
        app.modules.push(Box::new(Unstartable));

        assert!(matches!(app.run().await, Err(ContractError::Logic { .. })));
        assert_eq!(app.state(), ApplicationState::Stopped);
        assert!(!app.internal_modules.is_empty());
        assert!(app.internal_modules.iter().all(|m| !m.is_running()));
        assert!(app.module_workers.is_empty());
        assert_eq!(app.modules.len(), 1);
    }

    #[tokio::test]
    async fn test_activate_deactivate_pairs() {
        let (mut app, pv) = app("demo");
        let cs_in = app.control_system_feeder("in", false).unwrap();
        let a = app.control_system_consumer("a", false).unwrap();
        let b = app
            .add_node(NetworkNode::control_system("b", Direction::Consuming))
            .unwrap();
        app.connect(cs_in, a).unwrap();
        app.connect(cs_in, b).unwrap();

        // the application input fixes the value type
        let owner = app.module("typer").unwrap();
        let typed = app.input::<u16>(&owner, "in", 1).unwrap();
        app.connect(cs_in, typed.node()).unwrap();

        app.resolve_all().unwrap();
        app.activate_all().await.unwrap();
        app.activate_all().await.unwrap();
        assert_eq!(app.state(), ApplicationState::Running);

        app.deactivate_all().await.unwrap();
        assert_eq!(app.state(), ApplicationState::Stopped);
        app.deactivate_all().await.unwrap();

        app.activate_all().await.unwrap();
        let mut writer = pv.take_control_system_side::<u16>("in").unwrap();
        let mut reader = pv.take_control_system_side::<u16>("a").unwrap();
        writer
            .write(contracts::Sample::scalar(5, contracts::VersionNumber::new()))
            .unwrap();
        let sample = timeout(Duration::from_secs(1), reader.read())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sample.first(), Some(&5));
        sleep(Duration::from_millis(10)).await;
        assert!(app.all_reached_steady_state());

        app.shutdown().await.unwrap();
        let summary = app.metrics_summary();
        assert_eq!(summary.dispatchers.len(), 1);
        assert!(summary.total_updates() >= 1);
    }
}
