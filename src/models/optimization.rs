use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::issue::DetectedIssue;

/// `GENERATED` is terminal if no fix is ever applied. `REVERTED` is
/// reachable from both `APPLIED` and from `VALIDATION_FAILED` — see
/// `is_valid_transition` for the exhaustive legal-move table (§4.6.4, §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OptimizationStatus {
    Generated,
    Applied,
    Validated,
    ValidationFailed,
    Reverted,
}

impl OptimizationStatus {
    /// Whether `self -> next` is a legal state-machine edge.
    pub fn is_valid_transition(self, next: OptimizationStatus) -> bool {
        use OptimizationStatus::*;
        matches!(
            (self, next),
            (Generated, Applied)
                | (Applied, Validated)
                | (Applied, ValidationFailed)
                | (Applied, Reverted)
                | (Validated, Reverted)
                | (ValidationFailed, Reverted)
        )
    }
}

/// Which of the seven layered parsing strategies produced the optimized
/// SQL (§4.5), or that the upstream call failed outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsingStrategy {
    TaggedSection,
    FencedCodeBlock,
    LeadingKeywordBlock,
    KeywordDominatedSpan,
    FullResponseValidation,
    EmergencyRegexExtraction,
    RawResponse,
    FailedUpstream,
}

impl ParsingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParsingStrategy::TaggedSection => "tagged_section",
            ParsingStrategy::FencedCodeBlock => "fenced_code_block",
            ParsingStrategy::LeadingKeywordBlock => "leading_keyword_block",
            ParsingStrategy::KeywordDominatedSpan => "keyword_dominated_span",
            ParsingStrategy::FullResponseValidation => "full_response_validation",
            ParsingStrategy::EmergencyRegexExtraction => "emergency_regex_extraction",
            ParsingStrategy::RawResponse => "raw_response",
            ParsingStrategy::FailedUpstream => "failed_upstream",
        }
    }
}

/// One end-to-end attempt to improve a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Optimization {
    pub id: i64,
    pub connection_id: i64,
    /// Nullable: user-submitted ad-hoc queries have no backing `DiscoveredQuery`.
    pub query_id: Option<i64>,
    pub original_sql: String,
    pub optimized_sql: String,
    pub explanation: String,
    pub recommendations: Vec<String>,
    /// Opaque normalized-plan JSON, as captured at orchestration time.
    pub execution_plan: serde_json::Value,
    pub estimated_improvement_pct: f64,
    pub detected_issues: Vec<DetectedIssue>,
    pub validation_result: Option<crate::models::ValidationResult>,
    pub parsing_strategy: ParsingStrategy,
    pub status: OptimizationStatus,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl Optimization {
    pub fn is_applicable(&self) -> bool {
        !matches!(self.parsing_strategy, ParsingStrategy::RawResponse | ParsingStrategy::FailedUpstream)
            && !self.optimized_sql.trim().is_empty()
    }
}
