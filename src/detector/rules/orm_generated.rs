//! ORM_GENERATED (§4.4): either a wide join (5+ tables) pulling every
//! column, or an N+1 access pattern — the same fingerprint observed
//! repeatedly in the recent workload window with different literal
//! bindings (which, after normalization, collapse to one fingerprint).

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::detector::{detected_at, DetectorContext, IssueRule};
use crate::models::{DetectedIssue, IssueType, MetricValue, Severity};

const JOIN_TABLE_THRESHOLD: usize = 5;
const N_PLUS_ONE_THRESHOLD: usize = 20;

static QUALIFIED_STAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b[a-z_][a-z0-9_]*\.\*").unwrap());
static SELECT_STAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)select\s+\*").unwrap());

pub struct OrmGeneratedRule;

impl IssueRule for OrmGeneratedRule {
    fn evaluate(&self, ctx: &DetectorContext) -> Vec<DetectedIssue> {
        let mut issues = Vec::new();

        let tables: Vec<String> = ctx
            .plan
            .iter()
            .filter_map(|n| n.relation.clone())
            .fold(Vec::new(), |mut acc, t| {
                if !acc.contains(&t) {
                    acc.push(t);
                }
                acc
            });

        let wildcard_count = QUALIFIED_STAR.find_iter(ctx.normalized_sql).count();
        if tables.len() >= JOIN_TABLE_THRESHOLD && (SELECT_STAR.is_match(ctx.normalized_sql) || wildcard_count > 0) {
            let mut metrics = HashMap::new();
            metrics.insert("joined_tables".to_string(), MetricValue::Number(tables.len() as f64));
            issues.push(DetectedIssue {
                issue_type: IssueType::OrmGenerated,
                severity: Severity::Medium,
                title: format!("ORM-shaped join across {} tables pulls every column", tables.len()),
                description: format!(
                    "{} tables are joined while selecting every column from each, a shape typical of \
                     framework-generated eager-loading queries",
                    tables.len()
                ),
                affected_objects: tables.clone(),
                recommendations: vec![
                    "project only the columns the caller uses, or split into targeted queries per \
                     relation"
                        .to_string(),
                ],
                metrics,
                detected_at: detected_at(),
            });
        }

        let repeats = ctx.recent_observations.iter().filter(|o| o.fingerprint == fingerprint_of(ctx)).count();
        if repeats >= N_PLUS_ONE_THRESHOLD {
            let mut metrics = HashMap::new();
            metrics.insert("repeat_count".to_string(), MetricValue::Number(repeats as f64));
            issues.push(DetectedIssue {
                issue_type: IssueType::OrmGenerated,
                severity: Severity::High,
                title: "N+1 access pattern".to_string(),
                description: format!(
                    "the same query shape was observed {repeats} times in the recent workload window with \
                     different literal bindings, consistent with a single-row-per-call N+1 pattern"
                ),
                affected_objects: tables,
                recommendations: vec![
                    "batch the lookups into one query with an IN list or a join, instead of one call per \
                     row"
                        .to_string(),
                ],
                metrics,
                detected_at: detected_at(),
            });
        }

        issues
    }
}

fn fingerprint_of(ctx: &DetectorContext) -> String {
    crate::normalize::fingerprint(ctx.normalized_sql)
}
