//! Error types for Evoforge
//!
//! Provides a unified error type plus the collaborator-specific error enums.
//! Per-agent and per-task failures are absorbed where they happen; only the
//! variants documented as fatal ever reach an `evolve` caller.

use thiserror::Error;

use crate::types::agent::AgentId;
use crate::types::mutation::MutationType;

/// Result type alias using EvolutionError
pub type Result<T> = std::result::Result<T, EvolutionError>;

/// Unified error type for Evoforge operations
#[derive(Debug, Error)]
pub enum EvolutionError {
    // Exclusivity
    #[error("An evolution cycle is already running")]
    AlreadyRunning,

    // Selection contract
    #[error("Insufficient population: requested {requested} agents, only {available} available")]
    InsufficientPopulation { requested: usize, available: usize },

    // Recovered by the engine: original agent is retained
    #[error("Mutation {mutation_type} failed for agent {agent_id}: {reason}")]
    MutationFailure {
        agent_id: AgentId,
        mutation_type: MutationType,
        reason: String,
    },

    // Recovered by the evaluator: score degrades
    #[error("Evaluation failed for agent {agent_id}: {reason}")]
    EvaluationFailure { agent_id: AgentId, reason: String },

    // Recovered: logged, state stays in memory
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    // Generation-level failure, last committed population is preserved
    #[error("Evolution cycle aborted at generation {generation}: {reason}")]
    CycleAborted { generation: u64, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EvolutionError {
    /// Whether the engine absorbs this error locally instead of surfacing it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EvolutionError::MutationFailure { .. }
                | EvolutionError::EvaluationFailure { .. }
                | EvolutionError::Persistence(_)
        )
    }
}

/// Persistence backend errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt value under key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Unexpected failures from the agent execution capability.
///
/// Expected task failures are reported through `TaskResult::success == false`.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Agent {0} is not executable")]
    NotExecutable(AgentId),

    #[error("Executor unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for EvolutionError {
    fn from(err: serde_json::Error) -> Self {
        EvolutionError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for EvolutionError {
    fn from(err: anyhow::Error) -> Self {
        EvolutionError::Internal(err.to_string())
    }
}
