//! Fitness evaluation

pub mod benchmarks;
pub mod calculator;
pub mod evaluator;
pub mod synthetic;

pub use benchmarks::BenchmarkSuite;
pub use calculator::FitnessCalculator;
pub use evaluator::{Evaluation, EvaluatorConfig, FitnessEvaluator};
pub use synthetic::SyntheticExecutor;
