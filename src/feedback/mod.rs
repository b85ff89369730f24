//! Feedback & Pattern Library (C7) — §4.7.
//!
//! Turns a measured before/after into an accuracy score against the
//! orchestrator's estimate, and folds the outcome into the matching
//! `OptimizationPattern`'s rolling aggregates via Welford's algorithm so
//! the library never has to replay a pattern's application history.

pub mod welford;

use std::sync::Arc;

use chrono::Utc;

use crate::config::OptimizerConfig;
use crate::error::EngineResult;
use crate::models::{
    Engine, Feedback, FeedbackStatus, NewFeedback, OptimizationPattern, PatternType,
    PerformanceMetrics,
};
use crate::normalize;
use crate::store::ObservabilityStore;
use welford::Welford;

/// One well-known anti-pattern seeded on first startup. `signature` must
/// match what `normalize::pattern_signature` would produce for a query
/// shaped this way so `find_patterns_by_signature` can find it.
struct SeedPattern {
    pattern_type: PatternType,
    signature: &'static str,
    original_template: &'static str,
    optimized_template: &'static str,
}

const COMMON_PATTERNS: &[SeedPattern] = &[
    SeedPattern {
        pattern_type: PatternType::QueryRewrite,
        signature: "seed:select_star",
        original_template: "select * from t where ...",
        optimized_template: "select <explicit columns> from t where ...",
    },
    SeedPattern {
        pattern_type: PatternType::SubqueryOptimization,
        signature: "seed:correlated_subquery_to_join",
        original_template: "select ... where id in (select ... from u where u.t_id = t.id)",
        optimized_template: "select ... from t join u on u.t_id = t.id",
    },
    SeedPattern {
        pattern_type: PatternType::QueryRewrite,
        signature: "seed:or_chain_to_in",
        original_template: "select ... where col = ? or col = ? or col = ?",
        optimized_template: "select ... where col in (?, ?, ?)",
    },
    SeedPattern {
        pattern_type: PatternType::QueryRewrite,
        signature: "seed:union_to_union_all",
        original_template: "select ... union select ...",
        optimized_template: "select ... union all select ... -- when inputs are duplicate-free",
    },
    SeedPattern {
        pattern_type: PatternType::QueryRewrite,
        signature: "seed:non_sargable_function",
        original_template: "select ... where lower(col) = ?",
        optimized_template: "select ... where col = ? -- with a case-insensitive or functional index",
    },
    SeedPattern {
        pattern_type: PatternType::IndexRecommendation,
        signature: "seed:missing_index_full_scan",
        original_template: "select ... where unindexed_col = ?",
        optimized_template: "create index on (unindexed_col); select ... where unindexed_col = ?",
    },
];

const ALL_ENGINES: &[Engine] = &[Engine::Pg, Engine::Mysql, Engine::Mssql, Engine::Oracle];

pub struct FeedbackService {
    store: Arc<dyn ObservabilityStore>,
    optimizer_config: OptimizerConfig,
}

impl FeedbackService {
    pub fn new(store: Arc<dyn ObservabilityStore>, optimizer_config: OptimizerConfig) -> Self {
        Self { store, optimizer_config }
    }

    /// §4.7 feedback ingest: derives `actual_improvement_pct` and
    /// `accuracy_score`, persists the record, then updates the pattern
    /// library entry matching the originating optimization's signature.
    pub async fn submit(&self, new: NewFeedback) -> EngineResult<Feedback> {
        let optimization = self.store.get_optimization(new.optimization_id).await?;
        let connection = self.store.get_connection(optimization.connection_id).await?;

        let actual_improvement_pct = improvement_pct(&new.before_metrics, &new.after_metrics);
        let accuracy_score = accuracy(actual_improvement_pct, optimization.estimated_improvement_pct);
        let status = if actual_improvement_pct >= self.optimizer_config.min_improvement_pct {
            FeedbackStatus::Success
        } else if actual_improvement_pct > 0.0 {
            FeedbackStatus::Partial
        } else {
            FeedbackStatus::Failed
        };

        let feedback = Feedback {
            id: 0,
            optimization_id: new.optimization_id,
            before_metrics: new.before_metrics,
            after_metrics: new.after_metrics,
            actual_improvement_pct,
            estimated_improvement_pct: optimization.estimated_improvement_pct,
            accuracy_score,
            operator_rating: new.operator_rating,
            operator_comment: new.operator_comment,
            status,
            applied_at: optimization.applied_at.unwrap_or_else(Utc::now),
            measured_at: Utc::now(),
        };
        let persisted = self.store.create_feedback(feedback).await?;

        let normalized = normalize::normalize(&optimization.original_sql);
        let signature = normalize::pattern_signature(&normalized);
        let candidates = self.store.find_patterns_by_signature(connection.engine, &signature).await?;
        if let Some(pattern) = candidates.into_iter().max_by(|a, b| a.ranking_score().partial_cmp(&b.ranking_score()).unwrap()) {
            let updated = apply_feedback_to_pattern(pattern, status == FeedbackStatus::Success, actual_improvement_pct);
            self.store.upsert_pattern(updated).await?;
        }

        Ok(persisted)
    }

    pub async fn stats(&self, connection_id: Option<i64>) -> EngineResult<crate::models::FeedbackStats> {
        self.store.feedback_stats(connection_id).await
    }

    /// Thin pass-through kept for callers that only need ranked lookup
    /// without submitting feedback (the capability facade's pattern browser).
    pub async fn find_by_signature(&self, engine: Engine, signature: &str) -> EngineResult<Vec<OptimizationPattern>> {
        let mut patterns = self.store.find_patterns_by_signature(engine, signature).await?;
        patterns.sort_by(|a, b| b.ranking_score().partial_cmp(&a.ranking_score()).unwrap());
        Ok(patterns)
    }

    /// Seeds the fixed list of well-known anti-patterns across every
    /// engine. A no-op if the library was already seeded (§8).
    pub async fn seed_common_patterns(&self) -> EngineResult<()> {
        if self.store.patterns_seeded().await? {
            return Ok(());
        }
        for seed in COMMON_PATTERNS {
            for &engine in ALL_ENGINES {
                let pattern = OptimizationPattern {
                    id: 0,
                    pattern_type: seed.pattern_type,
                    signature: seed.signature.to_string(),
                    original_template: seed.original_template.to_string(),
                    optimized_template: seed.optimized_template.to_string(),
                    engine,
                    lifetime_applications: 0,
                    lifetime_successes: 0,
                    rolling_success_rate: 0.0,
                    rolling_mean_improvement_pct: 0.0,
                };
                self.store.upsert_pattern(pattern).await?;
            }
        }
        Ok(())
    }
}

fn improvement_pct(before: &PerformanceMetrics, after: &PerformanceMetrics) -> f64 {
    match (before.execution_time_ms, after.execution_time_ms) {
        (Some(b), Some(a)) if b > 0.0 => (b - a) / b * 100.0,
        _ => 0.0,
    }
}

/// `1 - min(1, |actual - estimated| / max(1, actual))`.
fn accuracy(actual: f64, estimated: f64) -> f64 {
    1.0 - ((actual - estimated).abs() / actual.max(1.0)).min(1.0)
}

fn apply_feedback_to_pattern(pattern: OptimizationPattern, success: bool, actual_improvement_pct: f64) -> OptimizationPattern {
    let prior_applications = pattern.lifetime_applications;
    let rolling_success_rate = Welford::fold_one(pattern.rolling_success_rate, prior_applications, if success { 1.0 } else { 0.0 });
    let rolling_mean_improvement_pct = Welford::fold_one(pattern.rolling_mean_improvement_pct, prior_applications, actual_improvement_pct);

    OptimizationPattern {
        lifetime_applications: prior_applications + 1,
        lifetime_successes: pattern.lifetime_successes + u64::from(success),
        rolling_success_rate,
        rolling_mean_improvement_pct,
        ..pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_is_one_for_exact_estimate() {
        assert_eq!(accuracy(30.0, 30.0), 1.0);
    }

    #[test]
    fn accuracy_is_clamped_to_zero_for_wild_miss() {
        assert_eq!(accuracy(5.0, 95.0), 0.0);
    }

    #[test]
    fn improvement_pct_zero_when_metrics_missing() {
        let before = PerformanceMetrics::default();
        let after = PerformanceMetrics::default();
        assert_eq!(improvement_pct(&before, &after), 0.0);
    }

    #[test]
    fn pattern_update_increments_applications_and_successes() {
        let pattern = OptimizationPattern {
            id: 1,
            pattern_type: PatternType::QueryRewrite,
            signature: "seed:select_star".to_string(),
            original_template: "".to_string(),
            optimized_template: "".to_string(),
            engine: Engine::Pg,
            lifetime_applications: 3,
            lifetime_successes: 2,
            rolling_success_rate: 0.667,
            rolling_mean_improvement_pct: 20.0,
        };
        let updated = apply_feedback_to_pattern(pattern, true, 40.0);
        assert_eq!(updated.lifetime_applications, 4);
        assert_eq!(updated.lifetime_successes, 3);
        assert!(updated.rolling_mean_improvement_pct > 20.0);
    }
}
