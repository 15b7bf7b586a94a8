//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置加载到运行的完整链路
//! - 连接拓扑的版本、有效性传播
//! - 非法网络在解析阶段被拒绝

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{ConfigVersion, EndpointConfig, UpdateMode, UserType, ValueType};

    /// TOML 蓝图转成 JSON 后再加载，内容不变
    #[test]
    fn test_blueprint_survives_format_conversion() {
        let blueprint = ConfigLoader::load_from_str(
            r#"
[application]
name = "plant"

[[devices]]
alias = "oven"
registers = [
    { name = "TICK", value_type = "uint32" },
    { name = "PRESSURE", value_type = "float64", n_samples = 2 },
]

[[connections]]
name = "tick"
feeder = { kind = "device", device = "oven", register = "TICK" }
consumers = [{ kind = "control_system", name = "tick" }]

[[connections]]
name = "pressure"
unit = "bar"
feeder = { kind = "device", device = "oven", register = "PRESSURE", mode = "poll" }
consumers = [{ kind = "control_system", name = "pressure", with_return = false }]
trigger = "tick"
"#,
            ConfigFormat::Toml,
        )
        .unwrap();
        assert_eq!(blueprint.version, ConfigVersion::V1);

        let json = ConfigLoader::to_json(&blueprint).unwrap();
        let reloaded = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();

        assert_eq!(reloaded.version, ConfigVersion::V1);
        assert_eq!(reloaded.application.name, "plant");
        assert_eq!(reloaded.application.queue_length, blueprint.application.queue_length);

        let registers = &reloaded.devices[0].registers;
        assert_eq!(registers[0].value_type, u32::VALUE_TYPE);
        assert_eq!(registers[1].value_type, f64::VALUE_TYPE);
        assert_eq!(registers[1].n_samples, 2);

        let pressure = &reloaded.connections[1];
        assert_eq!(pressure.trigger.as_deref(), Some("tick"));
        assert_eq!(pressure.unit.as_deref(), Some("bar"));
        assert_eq!(
            pressure.feeder,
            EndpointConfig::Device {
                device: "oven".into(),
                register: "PRESSURE".into(),
                mode: UpdateMode::Poll,
            }
        );
        assert_eq!(pressure.consumers, blueprint.connections[1].consumers);
    }

    #[test]
    fn test_value_type_names_match_user_types() {
        for (name, expected) in [
            ("int8", i8::VALUE_TYPE),
            ("uint16", u16::VALUE_TYPE),
            ("int64", i64::VALUE_TYPE),
            ("float32", f32::VALUE_TYPE),
            ("string", String::VALUE_TYPE),
        ] {
            let parsed: ValueType = name.parse().unwrap();
            assert_eq!(parsed, expected);
            assert_eq!(parsed.to_string(), name);
        }
        assert!("any".parse::<ValueType>().unwrap().is_any());
        assert!("int128".parse::<ValueType>().is_err());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;

    use app_core::{
        read_any, Accessor, Application, ApplicationModule, ConnectionShape, VariableHandle,
    };
    use contracts::{
        ApplicationConfig, BoxedProcessVariable, ContractError, DataValidity, Direction, Sample,
        UpdateMode, UserType, ValueType, VersionNumber,
    };
    use network::NetworkNode;
    use providers::{DummyDevice, PvManager};
    use tokio::time::{sleep, timeout, Duration};

    const WAIT: Duration = Duration::from_secs(1);

    fn app(name: &str) -> (Application, Arc<PvManager>) {
        let pv = Arc::new(PvManager::default());
        let app = Application::new(name, ApplicationConfig::new(name), pv.clone());
        (app, pv)
    }

    async fn next<T: UserType>(pv: &mut BoxedProcessVariable<T>) -> Sample<T> {
        timeout(WAIT, pv.read()).await.unwrap().unwrap()
    }

    /// Device register -> control system, 1:1
    #[tokio::test]
    async fn test_direct_connection_keeps_version_and_validity() {
        let (mut app, pv) = app("direct");
        let device = Arc::new(
            DummyDevice::new("adc")
                .with_register("CH0", ValueType::Int16, 1)
                .unwrap(),
        );
        app.register_device(device.clone()).unwrap();
        let feeder = app.device_feeder("adc", "CH0", UpdateMode::Push).unwrap();
        let consumer = app.control_system_consumer("ch0", false).unwrap();
        app.connect(feeder, consumer).unwrap();

        app.run().await.unwrap();
        assert_eq!(app.dispatcher_count(), 1);
        let mut reader = pv.take_control_system_side::<i16>("ch0").unwrap();

        let version = device.write_register("CH0", vec![-7i16]).unwrap();
        let sample = next(&mut reader).await;
        assert_eq!(sample.first(), Some(&-7));
        assert_eq!(sample.version, version);
        assert_eq!(sample.validity, DataValidity::Ok);

        app.shutdown().await.unwrap();
    }

    /// One feeder, three consumers: every consumer sees the same value and version
    #[tokio::test]
    async fn test_broadcast_delivers_identical_version() {
        let (mut app, pv) = app("broadcast");
        let device = Arc::new(
            DummyDevice::new("motor")
                .with_register("POS", ValueType::Float64, 3)
                .unwrap(),
        );
        app.register_device(device.clone()).unwrap();
        let feeder = app.device_feeder("motor", "POS", UpdateMode::Push).unwrap();
        for name in ["pos_a", "pos_b", "pos_c"] {
            let consumer = app.control_system_consumer(name, false).unwrap();
            app.connect(feeder, consumer).unwrap();
        }

        app.run().await.unwrap();
        let mut readers: Vec<_> = ["pos_a", "pos_b", "pos_c"]
            .iter()
            .map(|name| pv.take_control_system_side::<f64>(name).unwrap())
            .collect();

        let version = device
            .write_register("POS", vec![1.0, 2.0, 3.0])
            .unwrap();
        for reader in readers.iter_mut() {
            let sample = next(reader).await;
            assert_eq!(sample.value, vec![1.0, 2.0, 3.0]);
            assert_eq!(sample.version, version);
        }

        app.shutdown().await.unwrap();
        assert_eq!(app.data_loss_count(), 0);
    }

    struct Adder {
        a: Accessor<i32>,
        b: Accessor<i32>,
        sum: Accessor<i32>,
    }

    impl ApplicationModule for Adder {
        fn name(&self) -> &str {
            "adder"
        }

        async fn main_loop(&mut self) -> Result<(), ContractError> {
            loop {
                read_any(&mut [
                    &mut self.a as &mut dyn VariableHandle,
                    &mut self.b,
                ])
                .await?;
                self.sum.set(self.a.get() + self.b.get());
                self.sum.write()?;
            }
        }
    }

    /// A fault on either input taints the output until that input recovers
    #[tokio::test]
    async fn test_fault_on_either_input_propagates_symmetrically() {
        let (mut app, pv) = app("adder");
        let owner = app.module("adder").unwrap();
        let a = app.input::<i32>(&owner, "a", 1).unwrap();
        let b = app.input::<i32>(&owner, "b", 1).unwrap();
        let sum = app.output::<i32>(&owner, "sum", 1).unwrap();
        for (name, node) in [("a", a.node()), ("b", b.node())] {
            let feeder = app.control_system_feeder(name, false).unwrap();
            app.connect(feeder, node).unwrap();
        }
        let out = app.control_system_consumer("sum", false).unwrap();
        app.connect(sum.node(), out).unwrap();
        app.add_module(Adder { a, b, sum }).unwrap();

        app.run().await.unwrap();
        let mut cs_a = pv.take_control_system_side::<i32>("a").unwrap();
        let mut cs_b = pv.take_control_system_side::<i32>("b").unwrap();
        let mut cs_sum = pv.take_control_system_side::<i32>("sum").unwrap();

        let faulty = VersionNumber::new();
        cs_a.write(Sample::scalar(1, faulty).with_validity(DataValidity::Faulty))
            .unwrap();
        let sample = next(&mut cs_sum).await;
        assert_eq!(sample.validity, DataValidity::Faulty);
        assert_eq!(sample.version, faulty);

        // b is fine, but a is still faulty
        cs_b.write(Sample::scalar(2, VersionNumber::new())).unwrap();
        let sample = next(&mut cs_sum).await;
        assert_eq!(sample.first(), Some(&3));
        assert_eq!(sample.validity, DataValidity::Faulty);

        cs_a.write(Sample::scalar(5, VersionNumber::new())).unwrap();
        let sample = next(&mut cs_sum).await;
        assert_eq!(sample.first(), Some(&7));
        assert_eq!(sample.validity, DataValidity::Ok);

        // and the same from the other side
        cs_b.write(Sample::scalar(0, VersionNumber::new()).with_validity(DataValidity::Faulty))
            .unwrap();
        assert_eq!(next(&mut cs_sum).await.validity, DataValidity::Faulty);
        cs_b.write(Sample::scalar(1, VersionNumber::new())).unwrap();
        let sample = next(&mut cs_sum).await;
        assert_eq!(sample.first(), Some(&6));
        assert_eq!(sample.validity, DataValidity::Ok);

        app.shutdown().await.unwrap();
    }

    /// A value written back by one consumer reaches the feeder and the other
    /// consumers, never the consumer it came from
    #[tokio::test]
    async fn test_return_channel_round_trip() {
        let (mut app, pv) = app("return");
        let feeder = app.control_system_feeder("limit", true).unwrap();
        let owner = app.module("guard").unwrap();
        let mut input = app.input_with_return::<u32>(&owner, "limit", 1).unwrap();
        let mirror = app.control_system_consumer("limit_mirror", false).unwrap();
        app.connect(feeder, input.node()).unwrap();
        app.connect(feeder, mirror).unwrap();

        app.run().await.unwrap();
        let mut operator = pv.take_control_system_side::<u32>("limit").unwrap();
        let mut mirror = pv.take_control_system_side::<u32>("limit_mirror").unwrap();

        operator.write(Sample::scalar(500, VersionNumber::new())).unwrap();
        timeout(WAIT, input.read()).await.unwrap().unwrap();
        assert_eq!(input.get(), 500);
        assert_eq!(next(&mut mirror).await.first(), Some(&500));

        // clamp and write back
        input.set(100);
        input.write().unwrap();
        let back = next(&mut operator).await;
        assert_eq!(back.first(), Some(&100));
        assert_eq!(next(&mut mirror).await.first(), Some(&100));

        sleep(Duration::from_millis(50)).await;
        assert!(!input.read_non_blocking().unwrap());

        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let (mut app, _pv) = app("idem");
        let feeder = app.control_system_feeder("x", false).unwrap();
        for name in ["x1", "x2"] {
            let consumer = app.control_system_consumer(name, false).unwrap();
            app.connect(feeder, consumer).unwrap();
        }
        let owner = app.module("m").unwrap();
        let input = app.input::<i8>(&owner, "x", 1).unwrap();
        app.connect(feeder, input.node()).unwrap();

        app.resolve_all().unwrap();
        let shapes = app.connection_shapes().to_vec();
        let dispatchers = app.dispatcher_count();
        app.resolve_all().unwrap();
        assert_eq!(app.connection_shapes(), shapes.as_slice());
        assert_eq!(app.dispatcher_count(), dispatchers);
    }

    #[tokio::test]
    async fn test_no_sink_writes_after_deactivation() {
        let (mut app, pv) = app("deact");
        let feeder = app.control_system_feeder("in", false).unwrap();
        for name in ["o1", "o2"] {
            let consumer = app
                .add_node(cs_consumer_node(name).with_value_type(ValueType::Int64))
                .unwrap();
            app.connect(feeder, consumer).unwrap();
        }

        // nothing active yet
        app.deactivate_all().await.unwrap();
        app.run().await.unwrap();

        let mut writer = pv.take_control_system_side::<i64>("in").unwrap();
        let mut readers: Vec<_> = ["o1", "o2"]
            .iter()
            .map(|name| pv.take_control_system_side::<i64>(name).unwrap())
            .collect();
        writer.write(Sample::scalar(1, VersionNumber::new())).unwrap();
        for reader in readers.iter_mut() {
            assert_eq!(next(reader).await.first(), Some(&1));
        }

        app.deactivate_all().await.unwrap();
        app.deactivate_all().await.unwrap();
        writer.write(Sample::scalar(2, VersionNumber::new())).unwrap();
        sleep(Duration::from_millis(50)).await;
        for reader in readers.iter_mut() {
            assert!(reader.read_non_blocking().unwrap().is_none());
        }

        app.shutdown().await.unwrap();
        app.shutdown().await.unwrap();
    }

    fn cs_consumer_node(name: &str) -> NetworkNode {
        NetworkNode::control_system(name, Direction::Consuming)
    }

    fn first_error(
        app: &mut Application,
        steps: impl FnOnce(&mut Application) -> Result<(), ContractError>,
    ) -> ContractError {
        match steps(app).and_then(|()| app.resolve_all()) {
            Ok(()) => panic!("topology should have been rejected"),
            Err(e) => e,
        }
    }

    #[tokio::test]
    async fn test_two_feeders_are_rejected() {
        let (mut app, _pv) = app("two_feeders");
        let err = first_error(&mut app, |app| {
            let owner = app.module("m")?;
            let out = app.output::<f32>(&owner, "v", 1)?;
            let cs_feeder = app.control_system_feeder("v", false)?;
            let cs_consumer = app.control_system_consumer("v_out", false)?;
            app.connect(out.node(), cs_consumer)?;
            app.connect(cs_feeder, cs_consumer)?;
            Ok(())
        });
        assert!(matches!(err, ContractError::IllegalNetwork { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_poll_feeder_with_two_poll_consumers_is_rejected() {
        let (mut app, _pv) = app("two_pollers");
        app.register_device(Arc::new(
            DummyDevice::new("scope")
                .with_register("TRACE", ValueType::Float32, 1)
                .unwrap(),
        ))
        .unwrap();
        let err = first_error(&mut app, |app| {
            let feeder = app.device_feeder("scope", "TRACE", UpdateMode::Poll)?;
            let first = app.module("first")?;
            let second = app.module("second")?;
            let a = app.poll_input::<f32>(&first, "trace", 1)?;
            let b = app.poll_input::<f32>(&second, "trace", 1)?;
            app.connect(feeder, a.node())?;
            app.connect(feeder, b.node())?;
            Ok(())
        });
        assert!(matches!(err, ContractError::IllegalNetwork { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_topology_from_config_runs_end_to_end() {
        let blueprint = config_loader::ConfigLoader::load_from_str(
            r#"
[application]
name = "plant"
queue_length = 4

[[devices]]
alias = "oven"
registers = [
    { name = "TEMP", value_type = "float64" },
    { name = "TICK", value_type = "uint32" },
    { name = "PRESSURE", value_type = "float64", n_samples = 2 },
]

[[connections]]
name = "tick"
feeder = { kind = "device", device = "oven", register = "TICK" }
consumers = [{ kind = "control_system", name = "tick" }]

[[connections]]
name = "pressure"
feeder = { kind = "device", device = "oven", register = "PRESSURE", mode = "poll" }
consumers = [{ kind = "control_system", name = "pressure" }]
trigger = "tick"
"#,
            config_loader::ConfigFormat::Toml,
        )
        .unwrap();

        let pv = Arc::new(PvManager::default());
        let mut built = app_core::build_from_blueprint(&blueprint, pv.clone()).unwrap();
        built.app.run().await.unwrap();

        let oven = built.devices["oven"].clone();
        let mut pressure = pv.take_control_system_side::<f64>("pressure").unwrap();
        oven.write_register("PRESSURE", vec![1.5, 2.5]).unwrap();
        let tick = oven.write_register("TICK", vec![1u32]).unwrap();

        let sample = next(&mut pressure).await;
        assert_eq!(sample.value, vec![1.5, 2.5]);
        assert_eq!(sample.version, tick);

        built.app.shutdown().await.unwrap();
        let summary = built.app.metrics_summary();
        assert!(summary.total_updates() >= 1);
    }

    /// Device fault: the fan-out re-sends the last value as faulty once, then
    /// the next good value goes out again
    #[tokio::test]
    async fn test_source_fault_sends_faulty_copy_then_recovers() {
        let (mut app, pv) = app("pump");
        let device = Arc::new(
            DummyDevice::new("pump")
                .with_register("FLOW", ValueType::Int32, 1)
                .unwrap(),
        );
        app.register_device(device.clone()).unwrap();
        let feeder = app.device_feeder("pump", "FLOW", UpdateMode::Push).unwrap();
        for name in ["flow_a", "flow_b"] {
            let consumer = app.control_system_consumer(name, false).unwrap();
            app.connect(feeder, consumer).unwrap();
        }

        app.run().await.unwrap();
        let mut readers: Vec<_> = ["flow_a", "flow_b"]
            .iter()
            .map(|name| pv.take_control_system_side::<i32>(name).unwrap())
            .collect();

        let good = device.write_register("FLOW", vec![5i32]).unwrap();
        for reader in readers.iter_mut() {
            let sample = next(reader).await;
            assert_eq!(sample.first(), Some(&5));
            assert_eq!(sample.validity, DataValidity::Ok);
        }

        device.set_faulty(true);
        for reader in readers.iter_mut() {
            let sample = next(reader).await;
            assert_eq!(sample.first(), Some(&5));
            assert_eq!(sample.validity, DataValidity::Faulty);
            assert!(sample.version > good);
        }
        // retries while the fault persists do not repeat the faulty copy
        sleep(Duration::from_millis(250)).await;
        for reader in readers.iter_mut() {
            assert!(reader.read_non_blocking().unwrap().is_none());
        }

        device.set_faulty(false);
        let recovered = device.write_register("FLOW", vec![6i32]).unwrap();
        for reader in readers.iter_mut() {
            let sample = next(reader).await;
            assert_eq!(sample.first(), Some(&6));
            assert_eq!(sample.validity, DataValidity::Ok);
            assert_eq!(sample.version, recovered);
        }

        app.shutdown().await.unwrap();
    }

    /// Push register whose only consumer is another network's trigger
    #[tokio::test]
    async fn test_device_register_as_sole_trigger_source() {
        let (mut app, pv) = app("oven");
        let device = Arc::new(
            DummyDevice::new("oven")
                .with_register("TICK", ValueType::Uint32, 1)
                .unwrap()
                .with_register("PRESSURE", ValueType::Float64, 2)
                .unwrap(),
        );
        app.register_device(device.clone()).unwrap();
        let pressure = app.device_feeder("oven", "PRESSURE", UpdateMode::Poll).unwrap();
        let out = app.control_system_consumer("pressure", false).unwrap();
        let pressure_net = app.connect(pressure, out).unwrap();
        let tick = app.device_feeder("oven", "TICK", UpdateMode::Push).unwrap();
        let tick_net = app.add_trigger_feeder(pressure_net, tick).unwrap();

        app.run().await.unwrap();
        assert!(app
            .connection_shapes()
            .contains(&(tick_net, ConnectionShape::TriggerSource)));
        assert!(app
            .connection_shapes()
            .contains(&(pressure_net, ConnectionShape::TriggerFanOut)));

        let mut reader = pv.take_control_system_side::<f64>("pressure").unwrap();
        device.write_register("PRESSURE", vec![1.5, 2.5]).unwrap();
        sleep(Duration::from_millis(20)).await;
        assert!(reader.read_non_blocking().unwrap().is_none());

        let fired = device.write_register("TICK", vec![1u32]).unwrap();
        let sample = next(&mut reader).await;
        assert_eq!(sample.value, vec![1.5, 2.5]);
        assert_eq!(sample.version, fired);

        app.shutdown().await.unwrap();
    }

    /// Application output whose only consumer is another network's trigger
    #[tokio::test]
    async fn test_application_output_as_sole_trigger_source() {
        let (mut app, pv) = app("sampler");
        let device = Arc::new(
            DummyDevice::new("adc")
                .with_register("CH0", ValueType::Int32, 1)
                .unwrap(),
        );
        app.register_device(device.clone()).unwrap();
        let channel = app.device_feeder("adc", "CH0", UpdateMode::Poll).unwrap();
        let out = app.control_system_consumer("ch0", false).unwrap();
        let channel_net = app.connect(channel, out).unwrap();

        let owner = app.module("clock").unwrap();
        let mut tick = app.output::<u32>(&owner, "tick", 1).unwrap();
        let tick_net = app.add_trigger_feeder(channel_net, tick.node()).unwrap();

        app.run().await.unwrap();
        assert!(app
            .connection_shapes()
            .contains(&(tick_net, ConnectionShape::Direct)));

        let mut reader = pv.take_control_system_side::<i32>("ch0").unwrap();
        for value in [11i32, 12] {
            device.write_register("CH0", vec![value]).unwrap();
            tick.set(value as u32);
            tick.write().unwrap();
            let sample = next(&mut reader).await;
            assert_eq!(sample.first(), Some(&value));
            assert_eq!(sample.version, tick.version());
        }

        app.shutdown().await.unwrap();
    }
}
