//! Genetic operators

pub mod crossover;
pub mod mutation;

pub use crossover::{Crossover, CROSSOVER_TAG};
pub use mutation::{MutationOutcome, MutationStats, Mutator};
