//! HIGH_IO_WORKLOAD (§4.4): for engines exposing buffer counters, the
//! recent workload window's aggregate `buffer_reads / (hits + reads)`
//! exceeds 0.3 — this query is spending most of its I/O going to disk
//! rather than hitting cache.

use std::collections::HashMap;

use crate::detector::{detected_at, DetectorContext, IssueRule};
use crate::models::{DetectedIssue, IssueType, MetricValue, Severity};

const IO_RATIO_THRESHOLD: f64 = 0.3;

pub struct HighIoWorkloadRule;

impl IssueRule for HighIoWorkloadRule {
    fn evaluate(&self, ctx: &DetectorContext) -> Vec<DetectedIssue> {
        let fingerprint = crate::normalize::fingerprint(ctx.normalized_sql);
        let (hits, reads): (i64, i64) = ctx
            .recent_observations
            .iter()
            .filter(|o| o.fingerprint == fingerprint)
            .fold((0, 0), |(h, r), o| {
                (h + o.metrics.buffer_hits.unwrap_or(0), r + o.metrics.buffer_reads.unwrap_or(0))
            });

        let denom = hits + reads;
        if denom == 0 {
            return Vec::new();
        }
        let ratio = reads as f64 / denom as f64;
        if ratio <= IO_RATIO_THRESHOLD {
            return Vec::new();
        }

        let mut metrics = HashMap::new();
        metrics.insert("io_ratio".to_string(), MetricValue::Number(ratio));
        metrics.insert("buffer_hits".to_string(), MetricValue::Number(hits as f64));
        metrics.insert("buffer_reads".to_string(), MetricValue::Number(reads as f64));

        vec![DetectedIssue {
            issue_type: IssueType::HighIoWorkload,
            severity: if ratio > 0.6 { Severity::High } else { Severity::Medium },
            title: "high physical I/O ratio".to_string(),
            description: format!(
                "{:.0}% of this query's buffer accesses over the recent window went to disk rather than \
                 cache",
                ratio * 100.0
            ),
            affected_objects: vec!["query".to_string()],
            recommendations: vec![
                "check whether the working set fits the engine's buffer cache, or add an index that \
                 narrows the scanned range"
                    .to_string(),
            ],
            metrics,
            detected_at: detected_at(),
        }]
    }
}
