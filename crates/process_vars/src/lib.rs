//! # Process Variables
//!
//! 进程内变量对：应用模块之间、以及 fan-out 与模块之间的运行时通道。
//!
//! ## 功能
//!
//! - 有界队列 + 丢弃策略 (DropOldest / DropNewest)
//! - 写入时报告数据丢失 (data lost)
//! - 可选回传通道 (return channel)

mod config;
mod pair;

pub use config::{DropPolicy, QueueConfig};
pub use pair::{synchronized_pair, ConsumingEnd, FeedingEnd};
