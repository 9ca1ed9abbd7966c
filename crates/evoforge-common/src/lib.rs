//! # Evoforge Common
//!
//! Shared agent model, errors, configuration and collaborator contracts for the
//! Evoforge evolution engine.
//!
//! ## Core Types
//!
//! - [`Agent`]: versioned, capability-bearing unit of behaviour
//! - [`FitnessScore`]: 0-1 composite of five weighted components
//! - [`Mutation`]: immutable description of an intended agent change
//! - [`Population`]: one generation of [`PopulationMember`]s
//!
//! ## Collaborators
//!
//! - [`AgentExecutor`]: host-supplied task execution
//! - [`ConfigurationSource`]: evolution configuration
//! - [`PersistenceBackend`]: key-value durability
//! - [`EventSink`]: fire-and-forget event reporting
//! - [`Clock`]: wall-clock timestamps

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod persistence;
pub mod types;

// Re-export commonly used types at crate root
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    ConfigurationSource, EnvConfigSource, EvolutionConfig, SelectionMethod, StaticConfigSource,
};
pub use error::{EvolutionError, ExecutionError, PersistenceError, Result};
pub use events::{
    EventMeasurements, EventProperties, EventSink, MemoryEventSink, NoopEventSink,
    TracingEventSink,
};
pub use executor::AgentExecutor;
pub use persistence::{FileBackend, InMemoryBackend, PersistenceBackend};
pub use types::{
    agent::{Agent, AgentId, AgentMetadata, AgentState, AgentVariant, Capability, SemanticVersion},
    fitness::{
        FitnessComponent, FitnessComponents, FitnessProvenance, FitnessScore, FitnessWeights,
    },
    mutation::{
        CodeChange, ExpectedImpact, Mutation, MutationConstraint, MutationId, MutationMetadata,
        MutationTarget, MutationType, RiskLevel,
    },
    population::{rank_order, Population, PopulationMember, PopulationStatistics},
    task::{BenchmarkTask, TaskMetrics, TaskResult},
    CycleId, EntryId, PopulationId,
};

/// Evoforge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Generations of history used by the convergence check
pub const CONVERGENCE_WINDOW: usize = 10;

/// Share of the population replaced when diversity collapses
pub const DIVERSITY_REPLACEMENT_FRACTION: f64 = 0.2;
