use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::metrics::PerformanceMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum FeedbackStatus {
    Success,
    Failed,
    Partial,
}

/// The ground-truth record after applying an optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: i64,
    pub optimization_id: i64,
    pub before_metrics: PerformanceMetrics,
    pub after_metrics: PerformanceMetrics,
    pub actual_improvement_pct: f64,
    /// Denormalized from the Optimization at creation time.
    pub estimated_improvement_pct: f64,
    pub accuracy_score: f64,
    pub operator_rating: Option<u8>,
    pub operator_comment: Option<String>,
    pub status: FeedbackStatus,
    pub applied_at: DateTime<Utc>,
    pub measured_at: DateTime<Utc>,
}

/// Submitted by the caller of `Feedback.submit`; the store derives the
/// rest (`actual_improvement_pct`, `accuracy_score`, ...).
pub struct NewFeedback {
    pub optimization_id: i64,
    pub before_metrics: PerformanceMetrics,
    pub after_metrics: PerformanceMetrics,
    pub operator_rating: Option<u8>,
    pub operator_comment: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub total: u64,
    pub mean_accuracy: f64,
    pub mean_improvement: f64,
    pub success_rate: f64,
}
