//! `info` command implementation.

use std::sync::Arc;

use anyhow::{Context, Result};
use contracts::TopologyBlueprint;
use process_vars::QueueConfig;
use providers::PvManager;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    application: ApplicationInfo,
    devices: Vec<DeviceInfo>,
    connections: Vec<ConnectionInfo>,
}

#[derive(Serialize)]
struct ApplicationInfo {
    name: String,
    queue_length: usize,
    drop_policy: String,
    retry_interval_ms: u64,
}

#[derive(Serialize)]
struct DeviceInfo {
    alias: String,
    registers: Vec<RegisterInfo>,
}

#[derive(Serialize)]
struct RegisterInfo {
    name: String,
    value_type: String,
    n_samples: usize,
}

#[derive(Serialize)]
struct ConnectionInfo {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value_type: Option<String>,
    feeder: String,
    consumers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trigger: Option<String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint)?;
    }

    Ok(())
}

fn build_config_info(blueprint: &TopologyBlueprint) -> ConfigInfo {
    let app = &blueprint.application;
    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        application: ApplicationInfo {
            name: app.name.clone(),
            queue_length: app.queue_length,
            drop_policy: format!("{:?}", app.drop_policy),
            retry_interval_ms: app.retry_interval_ms,
        },
        devices: blueprint
            .devices
            .iter()
            .map(|d| DeviceInfo {
                alias: d.alias.clone(),
                registers: d
                    .registers
                    .iter()
                    .map(|r| RegisterInfo {
                        name: r.name.clone(),
                        value_type: r.value_type.to_string(),
                        n_samples: r.n_samples,
                    })
                    .collect(),
            })
            .collect(),
        connections: blueprint
            .connections
            .iter()
            .map(|c| ConnectionInfo {
                name: c.name.clone(),
                value_type: c.value_type.map(|t| t.to_string()),
                feeder: c.feeder.label(),
                consumers: c.consumers.iter().map(|e| e.label()).collect(),
                trigger: c.trigger.clone(),
            })
            .collect(),
    }
}

fn print_config_info(blueprint: &TopologyBlueprint) -> Result<()> {
    let app = &blueprint.application;
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  varnet Topology                             ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("Application");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Name: {}", app.name);
    println!(
        "   ├─ Queue: {} ({:?})",
        app.queue_length, app.drop_policy
    );
    println!("   └─ Retry interval: {} ms", app.retry_interval_ms);

    println!("\nDevices ({})", blueprint.devices.len());
    for (i, device) in blueprint.devices.iter().enumerate() {
        let is_last = i == blueprint.devices.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!("   {} {}", prefix, device.alias);
        for (j, register) in device.registers.iter().enumerate() {
            let register_prefix = if j == device.registers.len() - 1 {
                "└─"
            } else {
                "├─"
            };
            println!(
                "   {}  {} {} ({} x{})",
                child_prefix, register_prefix, register.name, register.value_type, register.n_samples
            );
        }
    }

    println!("\nConnections ({})", blueprint.connections.len());
    for (i, connection) in blueprint.connections.iter().enumerate() {
        let is_last = i == blueprint.connections.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let consumers: Vec<String> = connection.consumers.iter().map(|e| e.label()).collect();
        print!(
            "   {} {}: {} -> [{}]",
            prefix,
            connection.name,
            connection.feeder.label(),
            consumers.join(", ")
        );
        match &connection.trigger {
            Some(trigger) => println!(" (triggered by {})", trigger),
            None => println!(),
        }
    }

    // 连接转储只需声明，不需要解析
    let control_system = Arc::new(PvManager::new(QueueConfig::from(app)));
    let built = app_core::build_from_blueprint(blueprint, control_system)
        .context("Failed to build application from topology")?;
    println!("\n{}", built.app.dump_connections());

    Ok(())
}
