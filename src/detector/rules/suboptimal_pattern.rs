//! SUBOPTIMAL_PATTERN (§4.4): textual rules against the normalized SQL.
//! Each sub-check is independent; a query can trigger more than one.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::detector::{detected_at, DetectorContext, IssueRule};
use crate::models::{DetectedIssue, IssueType, Severity};

const OR_CHAIN_THRESHOLD: usize = 3;

static SELECT_STAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)select\s+\*").unwrap());
static LEADING_WILDCARD_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\blike\s*\?").unwrap());
static OR_SAME_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([a-z_][a-z0-9_]*)\s*=\s*\?(?:\s+or\s+\1\s*=\s*\?){2,}").unwrap());
static FUNCTION_ON_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:lower|upper|trim|substr|substring|date|cast|coalesce)\s*\(\s*([a-z_][a-z0-9_]*)\s*\)\s*=").unwrap());
static NOT_IN_SUBQUERY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)not\s+in\s*\(\s*select\b").unwrap());
static SCALAR_SUBQUERY_IN_SELECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)select\b(?:(?!\bfrom\b).)*\(\s*select\b").unwrap());
static UNION_NO_ALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bunion\b(?!\s+all)").unwrap());

pub struct SuboptimalPatternRule;

impl IssueRule for SuboptimalPatternRule {
    fn evaluate(&self, ctx: &DetectorContext) -> Vec<DetectedIssue> {
        let sql = ctx.normalized_sql;
        let mut issues = Vec::new();

        if SELECT_STAR.is_match(sql) {
            issues.push(make(
                "SELECT * expands every column",
                "selecting every column widens the row and breaks covering-index eligibility",
                vec![],
                vec!["list only the columns the caller actually needs".to_string()],
                Severity::Low,
            ));
        }

        if LEADING_WILDCARD_LIKE.is_match(sql) {
            issues.push(make(
                "leading-wildcard LIKE pattern",
                "a LIKE pattern starting with a wildcard cannot use a standard B-tree index prefix",
                vec![],
                vec!["use a trigram or full-text index, or anchor the pattern on the left".to_string()],
                Severity::Medium,
            ));
        }

        if let Some(caps) = OR_SAME_COLUMN.captures(sql) {
            let column = caps[1].to_string();
            issues.push(make(
                &format!("OR chain on {column} should be IN", ),
                &format!(
                    "more than {OR_CHAIN_THRESHOLD} OR branches compare the same column; the planner usually \
                     handles an equivalent IN list better"
                ),
                vec![column.clone()],
                vec![format!("rewrite as {column} IN (...)")],
                Severity::Low,
            ));
        }

        if let Some(caps) = FUNCTION_ON_COLUMN.captures(sql) {
            let column = caps[1].to_string();
            issues.push(make(
                &format!("function wraps indexed column {column}"),
                &format!("wrapping {column} in a function in WHERE makes a standard index on it unusable"),
                vec![column.clone()],
                vec![format!("rewrite to a sargable form, or add a functional/expression index on {column}")],
                Severity::Medium,
            ));
        }

        if NOT_IN_SUBQUERY.is_match(sql) {
            issues.push(make(
                "NOT IN (subquery) risks NULL surprises and a poor plan",
                "NOT IN against a subquery is both a correctness hazard with nullable columns and usually \
                 slower than an anti-join",
                vec![],
                vec!["rewrite as NOT EXISTS or a LEFT JOIN ... WHERE right.key IS NULL".to_string()],
                Severity::Medium,
            ));
        }

        if SCALAR_SUBQUERY_IN_SELECT.is_match(sql) {
            issues.push(make(
                "scalar subquery in SELECT list",
                "a subquery in the SELECT list runs once per output row unless the planner can decorrelate it",
                vec![],
                vec!["rewrite as a join with aggregation, or a window function".to_string()],
                Severity::Low,
            ));
        }

        if UNION_NO_ALL.is_match(sql) {
            issues.push(make(
                "UNION forces a duplicate-elimination pass",
                "UNION deduplicates its inputs even when the branches are already disjoint",
                vec![],
                vec!["use UNION ALL when the branches cannot produce duplicate rows".to_string()],
                Severity::Low,
            ));
        }

        issues
    }
}

fn make(title: &str, description: &str, affected: Vec<String>, recs: Vec<String>, severity: Severity) -> DetectedIssue {
    DetectedIssue {
        issue_type: IssueType::SuboptimalPattern,
        severity,
        title: title.to_string(),
        description: description.to_string(),
        affected_objects: affected,
        recommendations: recs,
        metrics: HashMap::new(),
        detected_at: detected_at(),
    }
}
