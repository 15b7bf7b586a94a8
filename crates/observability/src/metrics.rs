//! 运行时指标收集模块
//!
//! 通过 `metrics` facade 记录分发、数据丢失与有效性 (validity) 变化。
//! 未安装 recorder 时所有调用均为空操作。

use contracts::DataValidity;
use metrics::{counter, gauge};

/// 记录一次 fan-out 分发
pub fn record_fan_out_update(dispatcher: &str) {
    counter!(
        "varnet_fanout_updates_total",
        "dispatcher" => dispatcher.to_string()
    )
    .increment(1);
}

/// 记录单个 sink 的写入结果
pub fn record_sink_write(sink: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "varnet_sink_writes_total",
        "sink" => sink.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 记录数据丢失 (队列满时丢弃旧值)
pub fn record_data_loss(dispatcher: &str) {
    counter!(
        "varnet_data_loss_total",
        "dispatcher" => dispatcher.to_string()
    )
    .increment(1);
}

/// 记录经回传通道到达的值
pub fn record_return_update(dispatcher: &str) {
    counter!(
        "varnet_return_updates_total",
        "dispatcher" => dispatcher.to_string()
    )
    .increment(1);
}

/// 记录有效性变化及当前故障计数
pub fn record_validity_transition(owner: &str, to: DataValidity, fault_count: usize) {
    counter!(
        "varnet_validity_transitions_total",
        "owner" => owner.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
    gauge!("varnet_fault_counter", "owner" => owner.to_string()).set(fault_count as f64);
}

/// 记录网络解析结果
///
/// `shape` 取值如 `direct`, `bridge`, `threaded_fan_out`, `feeding_fan_out`。
pub fn record_network_resolved(shape: &'static str) {
    counter!("varnet_networks_resolved_total", "shape" => shape).increment(1);
}

/// 单个 dispatcher 的统计行
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherRow {
    pub name: String,
    pub updates: u64,
    pub sink_writes: u64,
    pub sink_failures: u64,
    pub data_loss: u64,
    pub return_updates: u64,
}

/// 运行结束时的指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    /// 进程级数据丢失计数
    pub total_data_loss: u64,
    /// 各 dispatcher 统计
    pub dispatchers: Vec<DispatcherRow>,
}

impl MetricsSummary {
    pub fn new(total_data_loss: u64) -> Self {
        Self {
            total_data_loss,
            dispatchers: Vec::new(),
        }
    }

    pub fn push(&mut self, row: DispatcherRow) {
        self.dispatchers.push(row);
    }

    /// 所有 dispatcher 分发次数之和
    pub fn total_updates(&self) -> u64 {
        self.dispatchers.iter().map(|d| d.updates).sum()
    }

    pub fn total_sink_failures(&self) -> u64 {
        self.dispatchers.iter().map(|d| d.sink_failures).sum()
    }
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Transfer Summary ===")?;
        writeln!(f, "Dispatchers: {}", self.dispatchers.len())?;
        writeln!(f, "Updates distributed: {}", self.total_updates())?;
        writeln!(f, "Sink write failures: {}", self.total_sink_failures())?;
        writeln!(f, "Data loss events: {}", self.total_data_loss)?;

        if !self.dispatchers.is_empty() {
            writeln!(f, "Per dispatcher:")?;
            for d in &self.dispatchers {
                writeln!(
                    f,
                    "  {}: updates={}, writes={}, failures={}, lost={}, returned={}",
                    d.name, d.updates, d.sink_writes, d.sink_failures, d.data_loss, d.return_updates
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_recorder_is_noop() {
        record_fan_out_update("fan");
        record_sink_write("sink", false);
        record_data_loss("fan");
        record_validity_transition("module", DataValidity::Faulty, 1);
        record_network_resolved("direct");
    }

    #[test]
    fn test_summary_totals_and_display() {
        let mut summary = MetricsSummary::new(4);
        summary.push(DispatcherRow {
            name: "network#0".to_string(),
            updates: 10,
            sink_writes: 20,
            sink_failures: 1,
            data_loss: 4,
            return_updates: 0,
        });
        summary.push(DispatcherRow {
            name: "network#3".to_string(),
            updates: 5,
            ..Default::default()
        });

        assert_eq!(summary.total_updates(), 15);
        assert_eq!(summary.total_sink_failures(), 1);

        let output = format!("{}", summary);
        assert!(output.contains("Updates distributed: 15"));
        assert!(output.contains("Data loss events: 4"));
        assert!(output.contains("network#3: updates=5"));
    }
}
