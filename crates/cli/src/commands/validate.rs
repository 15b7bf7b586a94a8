//! `validate` command implementation.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use contracts::{EndpointConfig, TopologyBlueprint};
use process_vars::QueueConfig;
use providers::PvManager;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    application: String,
    device_count: usize,
    register_count: usize,
    connection_count: usize,
    trigger_count: usize,
    dispatcher_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult::invalid(
            config_path,
            format!("File not found: {}", args.config.display()),
        );
    }

    let blueprint = match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => blueprint,
        Err(e) => return ValidationResult::invalid(config_path, e.to_string()),
    };

    // 静态校验之外，还要确认每个网络都能被解析
    let dispatcher_count = match resolve_topology(&blueprint) {
        Ok(count) => count,
        Err(e) => return ValidationResult::invalid(config_path, e.to_string()),
    };

    let warnings = collect_warnings(&blueprint);
    ValidationResult {
        valid: true,
        config_path,
        error: None,
        warnings: if warnings.is_empty() {
            None
        } else {
            Some(warnings)
        },
        summary: Some(ConfigSummary {
            version: format!("{:?}", blueprint.version),
            application: blueprint.application.name.clone(),
            device_count: blueprint.devices.len(),
            register_count: blueprint.devices.iter().map(|d| d.registers.len()).sum(),
            connection_count: blueprint.connections.len(),
            trigger_count: blueprint
                .connections
                .iter()
                .filter(|c| c.trigger.is_some())
                .count(),
            dispatcher_count,
        }),
    }
}

impl ValidationResult {
    fn invalid(config_path: String, error: String) -> Self {
        Self {
            valid: false,
            config_path,
            error: Some(error),
            warnings: None,
            summary: None,
        }
    }
}

/// Build and resolve the topology without activating anything.
fn resolve_topology(blueprint: &TopologyBlueprint) -> Result<usize> {
    let control_system = Arc::new(PvManager::new(QueueConfig::from(&blueprint.application)));
    let mut built = app_core::build_from_blueprint(blueprint, control_system)?;
    built.app.resolve_all()?;
    Ok(built.app.dispatcher_count())
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &TopologyBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    let used: BTreeSet<(&str, &str)> = blueprint
        .connections
        .iter()
        .flat_map(|c| std::iter::once(&c.feeder).chain(c.consumers.iter()))
        .filter_map(|endpoint| match endpoint {
            EndpointConfig::Device {
                device, register, ..
            } => Some((device.as_str(), register.as_str())),
            EndpointConfig::ControlSystem { .. } => None,
        })
        .collect();

    for device in &blueprint.devices {
        if device.registers.is_empty() {
            warnings.push(format!("Device '{}' has no registers", device.alias));
        }
        for register in &device.registers {
            if !used.contains(&(device.alias.as_str(), register.name.as_str())) {
                warnings.push(format!(
                    "Register '{}/{}' is not part of any connection",
                    device.alias, register.name
                ));
            }
        }
    }

    if blueprint.connections.is_empty() {
        warnings.push("No connections configured - nothing will be transferred".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Application: {}", summary.application);
            println!("  Devices: {}", summary.device_count);
            println!("  Registers: {}", summary.register_count);
            println!("  Connections: {}", summary.connection_count);
            println!("  Triggers: {}", summary.trigger_count);
            println!("  Dispatchers: {}", summary.dispatcher_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_topology(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn args(path: PathBuf) -> ValidateArgs {
        ValidateArgs {
            config: path,
            json: false,
        }
    }

    #[test]
    fn test_valid_topology_reports_dispatchers() {
        let file = write_topology(
            r#"
[application]
name = "plant"

[[devices]]
alias = "oven"
registers = [
    { name = "TEMP", value_type = "float64" },
    { name = "SPARE", value_type = "int32" },
]

[[connections]]
name = "temperature"
feeder = { kind = "device", device = "oven", register = "TEMP" }
consumers = [
    { kind = "control_system", name = "temp_a" },
    { kind = "control_system", name = "temp_b" },
]
"#,
        );

        let result = validate_config(&args(file.path().to_path_buf()));
        assert!(result.valid, "{:?}", result.error);
        let summary = result.summary.unwrap();
        assert_eq!(summary.dispatcher_count, 1);
        assert_eq!(summary.register_count, 2);
        let warnings = result.warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("oven/SPARE")));
    }

    #[test]
    fn test_unresolvable_topology_is_invalid() {
        // 轮询型寄存器既没有触发器也没有轮询消费者
        let file = write_topology(
            r#"
[application]
name = "plant"

[[devices]]
alias = "oven"
registers = [{ name = "TEMP", value_type = "float64" }]

[[connections]]
name = "temperature"
feeder = { kind = "device", device = "oven", register = "TEMP", mode = "poll" }
consumers = [{ kind = "control_system", name = "temp" }]
"#,
        );

        let result = validate_config(&args(file.path().to_path_buf()));
        assert!(!result.valid);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_missing_file() {
        let result = validate_config(&args(PathBuf::from("/nonexistent/topology.toml")));
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("File not found"));
    }
}
