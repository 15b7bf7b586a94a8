//! # App Core
//!
//! 应用上下文与连接解析。
//!
//! 负责：
//! - 声明阶段：模块、应用端点、设备/控制系统节点、连接与触发
//! - 连接解析：把每个网络变成直连、桥接或 fan-out
//! - 元数据传播：版本号推进、有效性与故障计数
//! - 生命周期：resolve → activate → run → shutdown

pub mod accessor;
pub mod application;
pub mod blueprint;
pub mod decorator;
pub mod devices;
pub mod module;
pub mod resolver;

pub use accessor::{Accessor, VariableHandle};
pub use application::{Application, ApplicationState};
pub use blueprint::{build_from_blueprint, BuiltApplication};
pub use decorator::MetaDataPropagatingDecorator;
pub use devices::DeviceRegistry;
pub use module::{
    read_all, read_all_latest, read_all_non_blocking, read_any, write_all, ApplicationModule,
    LocalApplicationModule,
};
pub use resolver::{ConnectionResolver, ConnectionShape, ResolvedConnections};
