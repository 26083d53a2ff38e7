use serde::{Deserialize, Serialize};

/// One resource-usage observation for one instance at one poll tick.
/// The timestamp is assigned by the store on insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub instance_id: i64,
    /// Workload id as reported by the runtime's stats snapshot (may be a short prefix).
    pub workload_id: String,
    pub cpu_percent: f64,
    pub memory_usage_mib: f64,
    pub memory_percent: f64,
    pub net_io: String,
    pub block_io: String,
    pub pids: u32,
}
