//! Performance Validator (§4.6.2). Runs the original and optimized SQL
//! side by side, in rolled-back read-only transactions, and decides
//! whether the optimized version is actually faster.

use std::sync::Arc;

use statrs::statistics::Statistics;

use crate::config::{OptimizerConfig, ValidatorConfig};
use crate::error::EngineResult;
use crate::gateway::{ExecResult, GatewayRegistry};
use crate::models::{DecryptedCredentials, MetricStats, OptimizationStatus, ValidationResult};
use crate::secrets::SecretStore;
use crate::store::ObservabilityStore;

use super::Applicator;

pub struct Validator {
    store: Arc<dyn ObservabilityStore>,
    gateways: Arc<GatewayRegistry>,
    secrets: Arc<dyn SecretStore>,
    config: ValidatorConfig,
    optimizer_config: OptimizerConfig,
}

impl Validator {
    pub fn new(
        store: Arc<dyn ObservabilityStore>,
        gateways: Arc<GatewayRegistry>,
        secrets: Arc<dyn SecretStore>,
        config: ValidatorConfig,
        optimizer_config: OptimizerConfig,
    ) -> Self {
        Self { store, gateways, secrets, config, optimizer_config }
    }

    /// Runs `self.config.iterations` rounds of both statements, aggregates
    /// each metric, decides `is_faster`, and persists the verdict on the
    /// optimization. On regression with auto-revert enabled, also invokes
    /// `applicator.rollback_last` for the connection and records
    /// `VALIDATION_FAILED` — the underlying `AppliedFix` ends `REVERTED`
    /// while the optimization itself ends `VALIDATION_FAILED`, not `REVERTED`.
    pub async fn validate(&self, optimization_id: i64, applicator: &Applicator) -> EngineResult<ValidationResult> {
        let optimization = self.store.get_optimization(optimization_id).await?;
        let connection = self.store.get_connection(optimization.connection_id).await?;
        let gateway = self.gateways.get(connection.engine)?.clone();
        let password = self.secrets.decrypt(&connection.encrypted_password).await?;
        let creds = DecryptedCredentials {
            host: connection.host.clone(),
            port: connection.port,
            database: connection.database.clone(),
            username: connection.username.clone(),
            password,
        };

        let iterations = self.config.iterations.max(1);
        let mut original_runs = Vec::with_capacity(iterations as usize);
        let mut optimized_runs = Vec::with_capacity(iterations as usize);

        for _ in 0..iterations {
            let orig = gateway
                .execute_in_tx(connection.id, &creds, &[optimization.original_sql.clone()], true)
                .await?;
            original_runs.push(first_result(orig));

            if !optimization.optimized_sql.trim().is_empty() {
                let opt = gateway
                    .execute_in_tx(connection.id, &creds, &[optimization.optimized_sql.clone()], true)
                    .await?;
                optimized_runs.push(first_result(opt));
            }
        }

        let original_metrics = aggregate(&original_runs);
        let optimized_metrics = if optimized_runs.is_empty() { original_metrics.clone() } else { aggregate(&optimized_runs) };

        let improvement_pct = if original_metrics.execution_time_ms.mean > 0.0 {
            (original_metrics.execution_time_ms.mean - optimized_metrics.execution_time_ms.mean) / original_metrics.execution_time_ms.mean * 100.0
        } else {
            0.0
        };

        let mut regressions = Vec::new();
        check_regression("buffer_reads", original_metrics.buffer_reads.mean, optimized_metrics.buffer_reads.mean, self.optimizer_config.max_regression_pct, &mut regressions);
        check_regression("io_cost", original_metrics.io_cost.mean, optimized_metrics.io_cost.mean, self.optimizer_config.max_regression_pct, &mut regressions);

        let is_faster = improvement_pct >= self.optimizer_config.min_improvement_pct && regressions.is_empty();

        let result = ValidationResult {
            iterations,
            original_metrics: original_metrics.clone(),
            optimized_metrics: optimized_metrics.clone(),
            improvement_pct,
            is_faster,
            regressions,
        };

        let next_status = if is_faster { OptimizationStatus::Validated } else { OptimizationStatus::ValidationFailed };
        self.store
            .transition_optimization(optimization_id, OptimizationStatus::Applied, next_status, None, Some(result.clone()))
            .await?;

        if !is_faster && self.config.auto_revert_on_regression {
            tracing::warn!(optimization_id, improvement_pct, "REVERT_RECOMMENDED: rolling back last fix for connection {}", connection.id);
            applicator.rollback_last(connection.id).await?;
        }

        Ok(result)
    }
}

fn first_result(mut results: Vec<ExecResult>) -> ExecResult {
    if results.is_empty() { ExecResult::default() } else { results.remove(0) }
}

fn aggregate(runs: &[ExecResult]) -> crate::models::AggregatedMetrics {
    let durations: Vec<f64> = runs.iter().map(|r| r.duration_ms).collect();
    let hits: Vec<f64> = runs.iter().filter_map(|r| r.buffer_hits).map(|v| v as f64).collect();
    let reads: Vec<f64> = runs.iter().filter_map(|r| r.buffer_reads).map(|v| v as f64).collect();

    crate::models::AggregatedMetrics {
        execution_time_ms: stats(&durations),
        planning_time_ms: MetricStats::default(),
        rows_returned: stats(&runs.iter().map(|r| r.rows_affected as f64).collect::<Vec<_>>()),
        buffer_hits: stats(&hits),
        buffer_reads: stats(&reads),
        io_cost: MetricStats::default(),
    }
}

fn stats(values: &[f64]) -> MetricStats {
    if values.is_empty() {
        return MetricStats::default();
    }
    let data = values.to_vec();
    MetricStats { mean: data.clone().mean(), stddev: data.population_std_dev(), samples: values.len() as u32 }
}

fn check_regression(name: &str, original: f64, optimized: f64, max_regression_pct: f64, out: &mut Vec<String>) {
    if original <= 0.0 {
        return;
    }
    let regression_pct = (optimized - original) / original * 100.0;
    if regression_pct > max_regression_pct {
        out.push(format!("{name} regressed by {regression_pct:.1}%"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_of_empty_slice_is_default() {
        assert_eq!(stats(&[]).samples, 0);
    }

    #[test]
    fn regression_flagged_past_threshold() {
        let mut out = Vec::new();
        check_regression("buffer_reads", 100.0, 200.0, 5.0, &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn regression_not_flagged_within_threshold() {
        let mut out = Vec::new();
        check_regression("buffer_reads", 100.0, 103.0, 5.0, &mut out);
        assert!(out.is_empty());
    }
}
