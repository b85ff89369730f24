//! Estimated-improvement derivation (§4.5 step 6, fallback path).
//!
//! A structured percentage in the completion response always wins. When
//! the response carries none, the fallback is
//! `Σ(severity_weight(issue) × improvement_hint(issue_type))`, clamped to
//! `[0, 95]` — a rough prior over how much each detected problem class
//! typically costs, not a measured number.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{DetectedIssue, IssueType, Severity};

const MAX_ESTIMATE_PCT: f64 = 95.0;

fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 1.0,
        Severity::High => 0.7,
        Severity::Medium => 0.4,
        Severity::Low => 0.15,
    }
}

fn improvement_hint(issue_type: IssueType) -> f64 {
    match issue_type {
        IssueType::MissingIndex => 60.0,
        IssueType::FullTableScan => 50.0,
        IssueType::PoorJoinStrategy => 40.0,
        IssueType::OrmGenerated => 35.0,
        IssueType::HighIoWorkload => 30.0,
        IssueType::InefficientIndex => 30.0,
        IssueType::StaleStatistics => 25.0,
        IssueType::WrongCardinality => 25.0,
        IssueType::SuboptimalPattern => 20.0,
        IssueType::InefficientReporting => 20.0,
    }
}

static PERCENT_NEAR_IMPROVEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:improve(?:ment|s|d)?|faster|reduc(?:e|es|tion))[^%\n]{0,40}?(\d{1,3}(?:\.\d+)?)\s*%")
        .unwrap()
});

/// Looks for a structured "N% improvement"-shaped claim near an
/// improvement-related keyword in the raw completion response.
pub fn extract_structured_hint(raw_response: &str) -> Option<f64> {
    PERCENT_NEAR_IMPROVEMENT
        .captures(raw_response)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .map(|pct| pct.clamp(0.0, MAX_ESTIMATE_PCT))
}

/// Weighted fallback estimate, used when `extract_structured_hint` finds nothing.
pub fn fallback_estimate(issues: &[DetectedIssue]) -> f64 {
    let total: f64 = issues.iter().map(|i| severity_weight(i.severity) * improvement_hint(i.issue_type)).sum();
    (total / 100.0 * MAX_ESTIMATE_PCT).min(MAX_ESTIMATE_PCT).max(0.0)
}

/// Combines both: a structured hint in the response text wins outright,
/// otherwise fall back to the weighted issue sum.
pub fn estimate_improvement_pct(raw_response: &str, issues: &[DetectedIssue]) -> f64 {
    extract_structured_hint(raw_response).unwrap_or_else(|| fallback_estimate(issues))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn issue(issue_type: IssueType, severity: Severity) -> DetectedIssue {
        DetectedIssue {
            issue_type,
            severity,
            title: "t".into(),
            description: "d".into(),
            affected_objects: vec!["t".into()],
            recommendations: vec![],
            metrics: HashMap::new(),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn structured_hint_wins_over_fallback() {
        let raw = "This rewrite should yield roughly a 42% improvement in latency.";
        let issues = vec![issue(IssueType::MissingIndex, Severity::Critical)];
        assert_eq!(estimate_improvement_pct(raw, &issues), 42.0);
    }

    #[test]
    fn fallback_clamped_to_95() {
        let issues = vec![
            issue(IssueType::MissingIndex, Severity::Critical),
            issue(IssueType::FullTableScan, Severity::Critical),
            issue(IssueType::PoorJoinStrategy, Severity::High),
        ];
        let estimate = estimate_improvement_pct("no percentage here", &issues);
        assert!(estimate <= 95.0);
        assert!(estimate > 0.0);
    }

    #[test]
    fn no_issues_no_hint_is_zero() {
        assert_eq!(estimate_improvement_pct("nothing useful", &[]), 0.0);
    }
}
