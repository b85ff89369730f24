use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkloadClass {
    Oltp,
    Olap,
    Mixed,
}

/// An hour-truncated roll-up of discovery activity for one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSample {
    pub connection_id: i64,
    pub bucket_start: DateTime<Utc>,
    pub total_queries: u64,
    /// Queries whose exec time exceeded the slow-query threshold (1s).
    pub slow_queries: u64,
    pub mean_exec_time_ms: f64,
    pub workload_class: WorkloadClass,
}

/// 1 second, expressed in milliseconds — the threshold a query's exec
/// time must exceed to count as "slow" for workload bucketing.
pub const SLOW_QUERY_THRESHOLD_MS: f64 = 1000.0;

impl WorkloadSample {
    /// Heuristic classification: high call rate + low mean latency reads
    /// as OLTP; low call rate + high mean latency reads as OLAP; anything
    /// in between is MIXED.
    pub fn classify(total_queries: u64, mean_exec_time_ms: f64) -> WorkloadClass {
        match (total_queries, mean_exec_time_ms) {
            (q, t) if q >= 1000 && t < 50.0 => WorkloadClass::Oltp,
            (q, t) if q < 100 && t >= 500.0 => WorkloadClass::Olap,
            _ => WorkloadClass::Mixed,
        }
    }
}
