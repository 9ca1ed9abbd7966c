//! Mutation descriptors
//!
//! A `Mutation` describes an intended transformation of an agent. It is
//! immutable once created and never holds the resulting agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::AgentId;
use super::define_id;

define_id!(
    /// Mutation identifier
    MutationId
);

/// Kind of change a mutation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationType {
    ParameterTuning,
    MethodModification,
    StructuralChange,
    BehaviorAlteration,
    CapabilityAddition,
    OptimizationRefactor,
}

impl MutationType {
    pub const ALL: [MutationType; 6] = [
        MutationType::ParameterTuning,
        MutationType::MethodModification,
        MutationType::StructuralChange,
        MutationType::BehaviorAlteration,
        MutationType::CapabilityAddition,
        MutationType::OptimizationRefactor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MutationType::ParameterTuning => "parameter_tuning",
            MutationType::MethodModification => "method_modification",
            MutationType::StructuralChange => "structural_change",
            MutationType::BehaviorAlteration => "behavior_alteration",
            MutationType::CapabilityAddition => "capability_addition",
            MutationType::OptimizationRefactor => "optimization_refactor",
        }
    }

    /// Risk attached to this kind of change
    pub fn risk(&self) -> RiskLevel {
        match self {
            MutationType::ParameterTuning => RiskLevel::Low,
            MutationType::MethodModification | MutationType::OptimizationRefactor => {
                RiskLevel::Medium
            }
            MutationType::CapabilityAddition => RiskLevel::Medium,
            MutationType::StructuralChange | MutationType::BehaviorAlteration => RiskLevel::High,
        }
    }

    /// Predicted overall-fitness delta
    pub fn predicted_delta(&self) -> f64 {
        match self {
            MutationType::ParameterTuning => 0.01,
            MutationType::MethodModification => 0.02,
            MutationType::StructuralChange => 0.03,
            MutationType::BehaviorAlteration => 0.04,
            MutationType::CapabilityAddition => 0.05,
            MutationType::OptimizationRefactor => 0.02,
        }
    }
}

impl std::fmt::Display for MutationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// What the mutation acts on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationTarget {
    pub agent_id: AgentId,
    /// Slash-separated path, e.g. `capabilities/diff_analysis/version`
    pub component_path: String,
}

/// A single located change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChange {
    pub location: String,
    pub old_value: String,
    pub new_value: String,
    pub description: String,
}

/// Predicted effect of applying the mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedImpact {
    pub fitness_delta: f64,
    pub risk: RiskLevel,
    pub affected_capabilities: Vec<String>,
    /// Relative resource change estimate, e.g. +0.05 = 5% more
    pub resource_impact: f64,
}

/// Declarative constraint the change must honour
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationConstraint {
    PreserveInterface,
    PreservePermissions,
    MaxCapabilities(usize),
    MinCapabilities(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationMetadata {
    pub creator: String,
    pub reason: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Immutable description of an intended agent transformation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub id: MutationId,
    pub mutation_type: MutationType,
    pub target: MutationTarget,
    pub changes: Vec<CodeChange>,
    pub expected_impact: ExpectedImpact,
    pub constraints: Vec<MutationConstraint>,
    pub metadata: MutationMetadata,
}
