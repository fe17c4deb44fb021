//! Spill quality classification for DAQ productions.
//!
//! Evaluates the data-quality rules against a spill dataset, unions their
//! violators into one bad-spill set, caches that set in the dataset, and
//! removes bad-spill rows from analysis tables.

pub mod config;
pub mod quality;

pub use quality::{
    aggregate, BadSpillCache, BadSpillSet, DataSource, EvaluationReport, Evaluator,
    FailurePolicy, QualityError, Rule, SpillStore, ThresholdConfig, ThresholdProfile,
};
