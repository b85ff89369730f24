pub mod connection;
pub mod feedback;
pub mod fix;
pub mod index_recommendation;
pub mod issue;
pub mod metrics;
pub mod optimization;
pub mod pattern;
pub mod query;
pub mod validation;
pub mod workload;

pub use connection::{Connection, DecryptedCredentials, Engine, NewConnection};
pub use feedback::{Feedback, FeedbackStats, FeedbackStatus, NewFeedback};
pub use fix::{ApplyResult, AppliedFix, FixStatus, FixType, SafetyCheckResult};
pub use index_recommendation::{IndexAction, IndexKind, IndexRecommendation, IndexStatus};
pub use issue::{DetectedIssue, DetectionResult, IssueType, MetricValue, Severity};
pub use metrics::{AggregatedMetrics, MetricStats, PerformanceMetrics};
pub use optimization::{Optimization, OptimizationStatus, ParsingStrategy};
pub use pattern::{OptimizationPattern, PatternType};
pub use query::{DiscoveredQuery, QuerySample, UpsertOutcome};
pub use validation::ValidationResult;
pub use workload::{WorkloadClass, WorkloadSample, SLOW_QUERY_THRESHOLD_MS};
