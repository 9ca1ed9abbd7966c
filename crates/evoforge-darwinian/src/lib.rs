//! # Darwinian
//!
//! Genetic evolution engine for Evoforge agents.
//!
//! ## Fitness Formula
//!
//! ```text
//! overall = 0.25·quality + 0.20·performance + 0.25·reliability
//!         + 0.15·satisfaction + 0.15·efficiency
//! ```
//!
//! Each component is scored from benchmark tasks run through the host's
//! [`AgentExecutor`](evoforge_common::AgentExecutor).
//!
//! ## Generation
//!
//! ```text
//! evaluate -> select parents -> crossover -> mutate -> replace
//! ```
//!
//! Replacement keeps the top `floor(size × elitism_rate)` members verbatim,
//! retires non-elite agents at `max_agent_age`, and re-seeds the weakest 20%
//! when variant diversity collapses.

pub mod culling;
pub mod engine;
pub mod fitness;
pub mod operators;
pub mod population;
pub mod selection;
pub mod telemetry;

pub use engine::{
    CyclePhase, CycleResults, EngineDeps, EvolutionCycle, EvolutionEngine, EvolutionHistory,
    GenerationRecord, HistoryRetention, Milestone, MilestoneKind, SchedulePriority,
};
pub use fitness::{EvaluatorConfig, FitnessEvaluator, SyntheticExecutor};
pub use operators::{Crossover, MutationOutcome, MutationStats, Mutator};
pub use population::{PopulationManager, ReplacementReport};
pub use selection::{
    selection_for, RankSelection, RouletteWheelSelection, SelectionStrategy, TournamentSelection,
};
pub use telemetry::PrometheusEventSink;
