//! `Workload.*` (§6.1).

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::models::{IndexRecommendation, WorkloadClass, WorkloadSample};
use crate::store::ObservabilityStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadAnalysis {
    pub total_queries: u64,
    pub slow_queries: u64,
    pub mean_exec_time_ms: f64,
    pub dominant_class: Option<WorkloadClass>,
    pub buckets: Vec<WorkloadSample>,
}

pub struct WorkloadApi {
    store: Arc<dyn ObservabilityStore>,
}

impl WorkloadApi {
    pub fn new(store: Arc<dyn ObservabilityStore>) -> Self {
        Self { store }
    }

    pub async fn analysis(&self, connection_id: i64, days: i64) -> EngineResult<WorkloadAnalysis> {
        let since = Utc::now() - chrono::Duration::days(days.max(0));
        let buckets = self.store.list_workload_samples(connection_id, since).await?;
        if buckets.is_empty() {
            return Ok(WorkloadAnalysis::default());
        }

        let total_queries: u64 = buckets.iter().map(|b| b.total_queries).sum();
        let slow_queries: u64 = buckets.iter().map(|b| b.slow_queries).sum();
        let weighted_time: f64 = buckets.iter().map(|b| b.mean_exec_time_ms * b.total_queries as f64).sum();
        let mean_exec_time_ms = if total_queries > 0 { weighted_time / total_queries as f64 } else { 0.0 };
        let dominant_class = most_common_class(&buckets);

        Ok(WorkloadAnalysis { total_queries, slow_queries, mean_exec_time_ms, dominant_class, buckets })
    }

    /// Same underlying buckets as `analysis`, named separately per §6.1's
    /// operation list since a transport binding may expose them on
    /// different routes.
    pub async fn patterns(&self, connection_id: i64, days: i64) -> EngineResult<Vec<WorkloadSample>> {
        Ok(self.analysis(connection_id, days).await?.buckets)
    }

    /// Hour-over-hour delta of mean exec time across the window, oldest
    /// first, for a transport layer to chart.
    pub async fn trends(&self, connection_id: i64, days: i64) -> EngineResult<Vec<(chrono::DateTime<Utc>, f64)>> {
        let since = Utc::now() - chrono::Duration::days(days.max(0));
        let mut buckets = self.store.list_workload_samples(connection_id, since).await?;
        buckets.sort_by_key(|b| b.bucket_start);
        Ok(buckets.into_iter().map(|b| (b.bucket_start, b.mean_exec_time_ms)).collect())
    }

    /// Index recommendations are the workload-level actionable output;
    /// query-level detection happens per-`optimize` call instead.
    pub async fn recommendations(&self, connection_id: i64) -> EngineResult<Vec<IndexRecommendation>> {
        self.store.list_index_recommendations(connection_id).await
    }
}

fn most_common_class(buckets: &[WorkloadSample]) -> Option<WorkloadClass> {
    let (mut oltp, mut olap, mut mixed) = (0u32, 0u32, 0u32);
    for b in buckets {
        match b.workload_class {
            WorkloadClass::Oltp => oltp += 1,
            WorkloadClass::Olap => olap += 1,
            WorkloadClass::Mixed => mixed += 1,
        }
    }
    [(WorkloadClass::Oltp, oltp), (WorkloadClass::Olap, olap), (WorkloadClass::Mixed, mixed)]
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .filter(|(_, n)| *n > 0)
        .map(|(c, _)| c)
}
