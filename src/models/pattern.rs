use serde::{Deserialize, Serialize};

use crate::models::connection::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
    JoinOptimization,
    SubqueryOptimization,
    IndexRecommendation,
    QueryRewrite,
    AggregationOptimization,
    WindowFunction,
    CteOptimization,
    AntiPattern,
}

/// A reusable query-rewrite pattern, keyed by `(engine, signature)`.
///
/// `success_rate = successes / applications` (applications >= 1); both
/// rolling aggregates are updated atomically with the underlying counter
/// via Welford's algorithm (`feedback::welford`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationPattern {
    pub id: i64,
    pub pattern_type: PatternType,
    pub signature: String,
    pub original_template: String,
    pub optimized_template: String,
    pub engine: Engine,
    pub lifetime_applications: u64,
    pub lifetime_successes: u64,
    pub rolling_success_rate: f64,
    pub rolling_mean_improvement_pct: f64,
}

impl OptimizationPattern {
    /// Ranking key used by `find_by_signature`: established patterns
    /// dominate one-shot flukes.
    pub fn ranking_score(&self) -> f64 {
        self.rolling_success_rate * (1.0 + self.lifetime_applications as f64).ln()
    }
}
