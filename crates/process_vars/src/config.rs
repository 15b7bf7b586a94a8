//! Queue configuration

pub use contracts::DropPolicy;
use contracts::ApplicationConfig;

/// 队列配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// 队列长度 (至少为 1)
    pub queue_length: usize,

    /// 队列满时的丢弃策略
    pub drop_policy: DropPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_length: 3,
            drop_policy: DropPolicy::DropOldest,
        }
    }
}

impl QueueConfig {
    pub fn new(queue_length: usize, drop_policy: DropPolicy) -> Self {
        Self {
            queue_length,
            drop_policy,
        }
    }

    /// 实际使用的容量 (bounded(0) 不是合法的有界队列)
    pub(crate) fn capacity(&self) -> usize {
        self.queue_length.max(1)
    }
}

impl From<&ApplicationConfig> for QueueConfig {
    fn from(config: &ApplicationConfig) -> Self {
        Self::new(config.queue_length, config.drop_policy)
    }
}
