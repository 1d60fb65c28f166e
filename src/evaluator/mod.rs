// src/evaluator/mod.rs — Test execution and scoring

pub mod judge;
pub mod parser;
pub mod test_runner;

pub use judge::{EvaluationJob, Judge, Verdict};
pub use test_runner::{TestJob, TestOutcome, TestRunner};
