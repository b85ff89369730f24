use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Controlled taxonomy of detectable performance problems (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    MissingIndex,
    InefficientIndex,
    PoorJoinStrategy,
    FullTableScan,
    SuboptimalPattern,
    StaleStatistics,
    WrongCardinality,
    OrmGenerated,
    HighIoWorkload,
    InefficientReporting,
}

/// Total ordering, most severe first. `CRITICAL > HIGH > MEDIUM > LOW`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A structured finding attached to an Optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedIssue {
    pub issue_type: IssueType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    /// Ordered list of qualified database identifiers; the minimum set
    /// per type is enforced by the detector that emits it, not here.
    pub affected_objects: Vec<String>,
    pub recommendations: Vec<String>,
    pub metrics: HashMap<String, MetricValue>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

/// Result of running the full detector suite over one plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Stable order: `(severity desc, type asc, title asc)`.
    pub issues: Vec<DetectedIssue>,
    pub summary: String,
    pub counts_by_severity: HashMap<Severity, u32>,
    pub total: u32,
}

impl DetectionResult {
    pub fn from_issues(mut issues: Vec<DetectedIssue>) -> Self {
        issues.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.issue_type.cmp(&b.issue_type))
                .then_with(|| a.title.cmp(&b.title))
        });

        let mut counts_by_severity: HashMap<Severity, u32> = HashMap::new();
        for issue in &issues {
            *counts_by_severity.entry(issue.severity).or_insert(0) += 1;
        }

        let total = issues.len() as u32;
        let summary = if issues.is_empty() {
            "no issues detected".to_string()
        } else {
            format!("{} issue(s) detected across {} categories", total, counts_by_severity.len())
        };

        Self { issues, summary, counts_by_severity, total }
    }
}
