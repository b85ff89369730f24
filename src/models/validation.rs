use serde::{Deserialize, Serialize};

use crate::models::metrics::AggregatedMetrics;

/// Outcome of `Validator::validate` (§4.6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub iterations: u32,
    pub original_metrics: AggregatedMetrics,
    pub optimized_metrics: AggregatedMetrics,
    pub improvement_pct: f64,
    pub is_faster: bool,
    pub regressions: Vec<String>,
}
