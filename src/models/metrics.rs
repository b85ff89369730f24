use serde::{Deserialize, Serialize};

/// Measured or estimated performance numbers for one query execution.
/// Any field may be absent depending on what the engine exposes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub execution_time_ms: Option<f64>,
    pub planning_time_ms: Option<f64>,
    pub rows_returned: Option<i64>,
    pub buffer_hits: Option<i64>,
    pub buffer_reads: Option<i64>,
    pub io_cost: Option<f64>,
}

impl PerformanceMetrics {
    /// `buffer_reads / (buffer_hits + buffer_reads)`, when both are present
    /// and the denominator is nonzero. Feeds the `HIGH_IO_WORKLOAD` detector.
    pub fn io_ratio(&self) -> Option<f64> {
        let hits = self.buffer_hits?;
        let reads = self.buffer_reads?;
        let denom = hits + reads;
        if denom == 0 { None } else { Some(reads as f64 / denom as f64) }
    }
}

/// Mean and standard deviation of each metric across validator iterations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub execution_time_ms: MetricStats,
    pub planning_time_ms: MetricStats,
    pub rows_returned: MetricStats,
    pub buffer_hits: MetricStats,
    pub buffer_reads: MetricStats,
    pub io_cost: MetricStats,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MetricStats {
    pub mean: f64,
    pub stddev: f64,
    pub samples: u32,
}
