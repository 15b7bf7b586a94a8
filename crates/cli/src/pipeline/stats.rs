//! Pipeline statistics and metrics.

use std::time::Duration;

use observability::MetricsSummary;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Time between start and shutdown
    pub duration: Duration,

    /// Number of resolved networks
    pub networks: usize,

    /// Number of active dispatchers
    pub dispatchers: usize,

    /// Number of device backends
    pub devices: usize,

    /// Number of variables published to the control system
    pub published_variables: usize,

    /// Whether every dispatcher completed its initial read
    pub all_reached_steady_state: bool,

    /// Per-dispatcher counters
    pub summary: MetricsSummary,
}

impl PipelineStats {
    /// Distributed updates per second
    pub fn update_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.summary.total_updates() as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Run Statistics ===\n");
        println!("Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Networks: {}", self.networks);
        println!("   ├─ Dispatchers: {}", self.dispatchers);
        println!("   ├─ Devices: {}", self.devices);
        println!("   ├─ Published variables: {}", self.published_variables);
        println!("   ├─ Updates/s: {:.2}", self.update_rate());
        println!("   └─ Steady state reached: {}", self.all_reached_steady_state);
        println!();
        print!("{}", self.summary);
        println!();
    }
}
