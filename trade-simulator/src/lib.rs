//! Causal Trade Simulator
//!
//! Generates synthetic settlement trades whose failure labels come from a
//! hand-specified causal rule set. The resulting dataset is the ground truth the
//! settlement risk model is trained against.

pub mod generator;
pub mod rules;
pub mod summary;

pub use generator::{
    add_business_days, write_csv, write_csv_file, CausalSimulator, FieldWeights, SimulatorConfig,
    SimulatorError,
};
pub use rules::{causal_failure_probability, triggered_rules, CausalRule, BASE_FAILURE_RATE};
pub use summary::{DatasetSummary, RuleStat};
