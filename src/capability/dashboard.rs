//! `Dashboard.*` (§6.1).

use std::sync::Arc;

use crate::error::EngineResult;
use crate::models::{DiscoveredQuery, Optimization};
use crate::store::{DashboardStats, DetectionSummary, ObservabilityStore};

pub struct DashboardApi {
    store: Arc<dyn ObservabilityStore>,
}

impl DashboardApi {
    pub fn new(store: Arc<dyn ObservabilityStore>) -> Self {
        Self { store }
    }

    pub async fn stats(&self) -> EngineResult<DashboardStats> {
        self.store.dashboard_stats().await
    }

    /// Every optimization whose run produced at least one detected issue.
    pub async fn queries_with_issues(&self) -> EngineResult<Vec<Optimization>> {
        let all = self.store.list_optimizations(None).await?;
        Ok(all.into_iter().filter(|o| !o.detected_issues.is_empty()).collect())
    }

    /// The `limit` queries with the highest lifetime total execution time
    /// across every monitored connection.
    pub async fn top_queries(&self, limit: u32) -> EngineResult<Vec<DiscoveredQuery>> {
        let connections = self.store.list_connections().await?;
        let mut queries = Vec::new();
        for connection in connections {
            queries.extend(self.store.list_queries(connection.id).await?);
        }
        queries.sort_by(|a, b| b.lifetime_total_exec_time_ms.partial_cmp(&a.lifetime_total_exec_time_ms).unwrap());
        queries.truncate(limit as usize);
        Ok(queries)
    }

    /// Mean exec time across every connection's workload buckets from the
    /// last `hours`, oldest first.
    pub async fn performance_trends(&self, hours: i64) -> EngineResult<Vec<(chrono::DateTime<chrono::Utc>, f64)>> {
        let since = chrono::Utc::now() - chrono::Duration::hours(hours.max(0));
        let connections = self.store.list_connections().await?;
        let mut buckets = Vec::new();
        for connection in connections {
            buckets.extend(self.store.list_workload_samples(connection.id, since).await?);
        }
        buckets.sort_by_key(|b| b.bucket_start);
        Ok(buckets.into_iter().map(|b| (b.bucket_start, b.mean_exec_time_ms)).collect())
    }

    pub async fn detection_summary(&self) -> EngineResult<DetectionSummary> {
        self.store.detection_summary().await
    }
}
