//! 配置校验模块
//!
//! 校验规则：
//! - application.name 非空，queue_length > 0
//! - 设备别名唯一，同一设备内寄存器名唯一
//! - 连接名唯一，控制系统变量只出现一次
//! - 设备端点引用已声明的寄存器
//! - 每个连接至少一个 consumer
//! - trigger 引用另一个已存在的连接
//! - 显式 value_type 不能是 any；没有设备端点的连接必须给出 value_type

use std::collections::{HashMap, HashSet};

use contracts::{
    ConnectionConfig, ContractError, EndpointConfig, RegisterConfig, TopologyBlueprint,
};

/// 校验 TopologyBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &TopologyBlueprint) -> Result<(), ContractError> {
    validate_application(blueprint)?;
    let registers = validate_devices(blueprint)?;
    validate_connection_names(blueprint)?;
    validate_endpoints(blueprint, &registers)?;
    validate_value_types(blueprint)?;
    validate_triggers(blueprint)?;
    Ok(())
}

/// 校验应用参数
fn validate_application(blueprint: &TopologyBlueprint) -> Result<(), ContractError> {
    let app = &blueprint.application;
    if app.name.trim().is_empty() {
        return Err(ContractError::config_validation(
            "application.name",
            "application name cannot be empty",
        ));
    }
    if app.queue_length == 0 {
        return Err(ContractError::config_validation(
            "application.queue_length",
            "queue_length must be > 0",
        ));
    }
    Ok(())
}

/// 校验设备别名与寄存器名唯一性，返回 (alias, register) 索引
fn validate_devices(
    blueprint: &TopologyBlueprint,
) -> Result<HashMap<(&str, &str), &RegisterConfig>, ContractError> {
    let mut aliases = HashSet::new();
    let mut registers = HashMap::new();
    for device in &blueprint.devices {
        if !aliases.insert(device.alias.as_str()) {
            return Err(ContractError::config_validation(
                format!("devices[alias={}]", device.alias),
                "duplicate device alias",
            ));
        }
        for register in &device.registers {
            let key = (device.alias.as_str(), register.name.as_str());
            if registers.insert(key, register).is_some() {
                return Err(ContractError::config_validation(
                    format!("devices[{}].registers[name={}]", device.alias, register.name),
                    "duplicate register name",
                ));
            }
            if register.value_type.is_any() {
                return Err(ContractError::config_validation(
                    format!("devices[{}].registers[{}].value_type", device.alias, register.name),
                    "register value_type cannot be 'any'",
                ));
            }
        }
    }
    Ok(registers)
}

/// 校验连接名与控制系统变量名唯一性
fn validate_connection_names(blueprint: &TopologyBlueprint) -> Result<(), ContractError> {
    let mut names = HashSet::new();
    let mut variables = HashSet::new();
    for connection in &blueprint.connections {
        if !names.insert(connection.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("connections[name={}]", connection.name),
                "duplicate connection name",
            ));
        }
        for endpoint in endpoints(connection) {
            if let EndpointConfig::ControlSystem { name, .. } = endpoint {
                if !variables.insert(name.as_str()) {
                    return Err(ContractError::config_validation(
                        format!("connections[{}]", connection.name),
                        format!("control-system variable '{name}' is used more than once"),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// 校验端点引用
fn validate_endpoints(
    blueprint: &TopologyBlueprint,
    registers: &HashMap<(&str, &str), &RegisterConfig>,
) -> Result<(), ContractError> {
    for connection in &blueprint.connections {
        if connection.consumers.is_empty() {
            return Err(ContractError::config_validation(
                format!("connections[{}].consumers", connection.name),
                "connection needs at least one consumer",
            ));
        }
        for endpoint in endpoints(connection) {
            if let EndpointConfig::Device {
                device, register, ..
            } = endpoint
            {
                if !registers.contains_key(&(device.as_str(), register.as_str())) {
                    return Err(ContractError::config_validation(
                        format!("connections[{}]", connection.name),
                        format!("endpoint '{}' refers to an undeclared register", endpoint.label()),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// 校验值类型
fn validate_value_types(blueprint: &TopologyBlueprint) -> Result<(), ContractError> {
    for connection in &blueprint.connections {
        match connection.value_type {
            Some(vt) if vt.is_any() => {
                return Err(ContractError::config_validation(
                    format!("connections[{}].value_type", connection.name),
                    "value_type cannot be 'any'",
                ));
            }
            Some(_) => {}
            None => {
                let has_device = endpoints(connection)
                    .any(|e| matches!(e, EndpointConfig::Device { .. }));
                if !has_device {
                    return Err(ContractError::config_validation(
                        format!("connections[{}].value_type", connection.name),
                        "connection without device endpoints must name its value_type",
                    ));
                }
            }
        }
    }
    Ok(())
}

/// 校验触发引用
fn validate_triggers(blueprint: &TopologyBlueprint) -> Result<(), ContractError> {
    let names: HashSet<_> = blueprint
        .connections
        .iter()
        .map(|c| c.name.as_str())
        .collect();

    for connection in &blueprint.connections {
        let Some(trigger) = connection.trigger.as_deref() else {
            continue;
        };
        if trigger == connection.name {
            return Err(ContractError::config_validation(
                format!("connections[{}].trigger", connection.name),
                "a connection cannot trigger itself",
            ));
        }
        if !names.contains(trigger) {
            return Err(ContractError::config_validation(
                format!("connections[{}].trigger", connection.name),
                format!("trigger '{trigger}' not found in connections"),
            ));
        }
    }
    Ok(())
}

fn endpoints(connection: &ConnectionConfig) -> impl Iterator<Item = &EndpointConfig> {
    std::iter::once(&connection.feeder).chain(connection.consumers.iter())
}
