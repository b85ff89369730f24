//! `Patterns.*` (§6.1).

use std::sync::Arc;

use crate::error::EngineResult;
use crate::feedback::FeedbackService;
use crate::models::{Engine, OptimizationPattern, PatternType};
use crate::store::ObservabilityStore;

#[derive(Debug, Clone, Default)]
pub struct PatternFilters {
    pub pattern_type: Option<PatternType>,
    pub engine: Option<Engine>,
}

#[derive(Debug, Clone, Default)]
pub struct PatternStatistics {
    pub total_patterns: u64,
    pub mean_success_rate: f64,
    pub mean_improvement_pct: f64,
    pub total_applications: u64,
}

pub struct PatternsApi {
    store: Arc<dyn ObservabilityStore>,
    feedback_service: Arc<FeedbackService>,
}

impl PatternsApi {
    pub fn new(store: Arc<dyn ObservabilityStore>, feedback_service: Arc<FeedbackService>) -> Self {
        Self { store, feedback_service }
    }

    pub async fn list(&self, filters: PatternFilters) -> EngineResult<Vec<OptimizationPattern>> {
        let mut patterns = self.store.list_patterns(filters.pattern_type).await?;
        if let Some(engine) = filters.engine {
            patterns.retain(|p| p.engine == engine);
        }
        Ok(patterns)
    }

    /// Free-text search over template text, case-insensitive — patterns
    /// have no full-text index, so this is a linear scan over `list_patterns`.
    pub async fn search(&self, query: &str) -> EngineResult<Vec<OptimizationPattern>> {
        let needle = query.to_lowercase();
        let patterns = self.store.list_patterns(None).await?;
        Ok(patterns
            .into_iter()
            .filter(|p| {
                p.original_template.to_lowercase().contains(&needle)
                    || p.optimized_template.to_lowercase().contains(&needle)
                    || p.signature.to_lowercase().contains(&needle)
            })
            .collect())
    }

    pub async fn statistics(&self) -> EngineResult<PatternStatistics> {
        let patterns = self.store.list_patterns(None).await?;
        if patterns.is_empty() {
            return Ok(PatternStatistics::default());
        }
        let total_patterns = patterns.len() as u64;
        let total_applications: u64 = patterns.iter().map(|p| p.lifetime_applications).sum();
        let mean_success_rate = patterns.iter().map(|p| p.rolling_success_rate).sum::<f64>() / total_patterns as f64;
        let mean_improvement_pct = patterns.iter().map(|p| p.rolling_mean_improvement_pct).sum::<f64>() / total_patterns as f64;
        Ok(PatternStatistics { total_patterns, mean_success_rate, mean_improvement_pct, total_applications })
    }

    pub async fn top(&self, limit: u32) -> EngineResult<Vec<OptimizationPattern>> {
        self.store.top_patterns(limit).await
    }

    pub async fn load_common(&self) -> EngineResult<()> {
        self.feedback_service.seed_common_patterns().await
    }
}
