//! # Dispatcher
//!
//! Fan-out 分发模块。
//!
//! 负责：
//! - 把一个 feeder 的更新写入网络中的全部 consumer
//! - 主动 (worker task) 与被动 (调用方驱动) 两种形态
//! - 回传通道、外部触发、一对一桥接
//! - 数据丢失计数与每个 dispatcher 的指标

pub mod adapter;
pub mod consuming;
pub mod error;
pub mod feeding;
pub mod handle;
pub mod metrics;
pub mod module;
pub mod sink_set;
pub mod threaded;
pub mod trigger;

pub use adapter::ImplementationAdapter;
pub use consuming::ConsumingFanOut;
pub use error::ErrorCollector;
pub use feeding::FeedingFanOut;
pub use handle::{ShutdownSignal, SteadyState, WorkerHandle};
pub use metrics::{DataLossCounter, FanOutMetrics, MetricsSnapshot};
pub use module::{DispatcherConfig, InternalModule};
pub use sink_set::SinkSet;
pub use threaded::ThreadedFanOut;
pub use trigger::TriggerFanOut;
