//! # Providers
//!
//! 固定实现 (fixed implementation) 的提供方：
//!
//! - [`DummyDevice`]: 内存中的设备后端，寄存器支持 push / poll 访问与故障注入
//! - [`PvManager`]: 基于 `process_vars` 的控制系统变量管理器

mod dummy_device;
mod pv_manager;

pub use dummy_device::DummyDevice;
pub use pv_manager::{PublishedVariable, PvManager};
