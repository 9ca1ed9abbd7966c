//! Population assembly and policies

pub mod manager;
pub mod statistics;

pub use manager::{PopulationManager, ReplacementReport};
pub use statistics::{calculate_statistics, diversity, variance};
