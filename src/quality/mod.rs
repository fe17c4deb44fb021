pub mod aggregate;
pub mod cache;
pub mod cleanup;
pub mod engine;
pub mod error;
pub mod rules;
pub mod schema;
pub mod store;
pub mod thresholds;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregate::{aggregate, BadSpillSet};
pub use cache::BadSpillCache;
pub use cleanup::{count_rows_for_bad_spills, delete_rows_for_bad_spills, AnalysisTable};
pub use engine::{bad_spills, EvaluationReport, Evaluator, FailurePolicy, RuleFailure, RuleOutcome};
pub use error::QualityError;
pub use rules::{Rule, SpillId};
pub use store::{DataSource, SpillStore};
pub use thresholds::{
    FallbackReason, Quantity, Range, Resolution, SpillRange, ThresholdConfig, ThresholdProfile,
};
