pub mod full_table_scan;
pub mod high_io_workload;
pub mod inefficient_index;
pub mod inefficient_reporting;
pub mod missing_index;
pub mod orm_generated;
pub mod poor_join_strategy;
pub mod stale_statistics;
pub mod suboptimal_pattern;
pub mod wrong_cardinality;
