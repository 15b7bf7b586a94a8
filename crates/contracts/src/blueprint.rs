//! TopologyBlueprint - Config Loader 输出
//!
//! 描述完整的连接拓扑：应用参数、设备寄存器、网络连接与触发关系。

use serde::{Deserialize, Serialize};

use crate::{UpdateMode, ValueType};

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的拓扑配置蓝图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 应用参数
    pub application: ApplicationConfig,

    /// 设备定义列表
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// 网络连接列表
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

/// 应用运行参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// 应用名称
    pub name: String,

    /// 进程内变量对的队列长度
    #[serde(default = "default_queue_length")]
    pub queue_length: usize,

    /// 队列满时的丢弃策略
    #[serde(default)]
    pub drop_policy: DropPolicy,

    /// 源读取失败后的重试间隔 (毫秒)
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_queue_length() -> usize {
    3
}

fn default_retry_interval_ms() -> u64 {
    100
}

impl ApplicationConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue_length: default_queue_length(),
            drop_policy: DropPolicy::default(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

/// 队列满时的丢弃策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// 丢弃最旧的值
    #[default]
    DropOldest,
    /// 丢弃最新的值
    DropNewest,
}

/// 设备定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// 设备别名 (逻辑名称)
    pub alias: String,

    /// 寄存器列表
    #[serde(default)]
    pub registers: Vec<RegisterConfig>,
}

/// 寄存器定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterConfig {
    /// 寄存器名称
    pub name: String,

    /// 值类型
    pub value_type: ValueType,

    /// 每次更新的采样数
    #[serde(default = "default_n_samples")]
    pub n_samples: usize,
}

fn default_n_samples() -> usize {
    1
}

/// 一个网络：一个 feeder，一个或多个 consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// 连接名称 (用于 trigger 引用)
    pub name: String,

    /// 显式值类型 (缺省时由端点推断)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,

    /// 工程单位
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// 数据源端点
    pub feeder: EndpointConfig,

    /// 数据消费端点
    pub consumers: Vec<EndpointConfig>,

    /// 外部触发网络 (另一个连接的名称)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

/// 端点定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointConfig {
    /// 设备寄存器
    Device {
        device: String,
        register: String,
        #[serde(default)]
        mode: UpdateMode,
    },
    /// 控制系统变量
    ControlSystem {
        name: String,
        #[serde(default)]
        with_return: bool,
    },
}

impl EndpointConfig {
    /// 人类可读的端点标识
    pub fn label(&self) -> String {
        match self {
            Self::Device {
                device, register, ..
            } => format!("{device}/{register}"),
            Self::ControlSystem { name, .. } => format!("cs:{name}"),
        }
    }
}
