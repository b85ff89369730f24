//! `Indexes.*` (§6.1).

use std::sync::Arc;

use crate::error::EngineResult;
use crate::models::{IndexAction, IndexKind, IndexRecommendation, IndexStatus};
use crate::store::ObservabilityStore;

pub struct IndexesApi {
    store: Arc<dyn ObservabilityStore>,
}

impl IndexesApi {
    pub fn new(store: Arc<dyn ObservabilityStore>) -> Self {
        Self { store }
    }

    pub async fn recommendations(&self, connection_id: i64) -> EngineResult<Vec<IndexRecommendation>> {
        self.store.list_index_recommendations(connection_id).await
    }

    pub async fn unused(&self, connection_id: i64) -> EngineResult<Vec<IndexRecommendation>> {
        let all = self.store.list_index_recommendations(connection_id).await?;
        Ok(all.into_iter().filter(|r| r.action == IndexAction::Drop && r.status == IndexStatus::Recommended).collect())
    }

    pub async fn missing(&self, connection_id: i64) -> EngineResult<Vec<IndexRecommendation>> {
        let all = self.store.list_index_recommendations(connection_id).await?;
        Ok(all.into_iter().filter(|r| r.action == IndexAction::Create && r.status == IndexStatus::Recommended).collect())
    }

    pub async fn create(
        &self,
        connection_id: i64,
        table: String,
        columns: Vec<String>,
        index_kind: IndexKind,
        estimated_benefit: f64,
    ) -> EngineResult<IndexRecommendation> {
        self.store
            .create_index_recommendation(connection_id, table, columns, index_kind, IndexAction::Create, estimated_benefit)
            .await
    }

    pub async fn drop(
        &self,
        connection_id: i64,
        table: String,
        columns: Vec<String>,
        index_kind: IndexKind,
        estimated_benefit: f64,
    ) -> EngineResult<IndexRecommendation> {
        self.store
            .create_index_recommendation(connection_id, table, columns, index_kind, IndexAction::Drop, estimated_benefit)
            .await
    }

    /// Every recommendation ever made for the connection, acted-on or not.
    pub async fn history(&self, connection_id: i64) -> EngineResult<Vec<IndexRecommendation>> {
        self.store.list_index_recommendations(connection_id).await
    }
}
