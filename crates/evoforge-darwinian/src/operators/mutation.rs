//! Mutation operators
//!
//! A mutation is first described as an immutable [`Mutation`], then applied to
//! a copy of the agent. The source agent is never touched.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use evoforge_common::{
    Agent, AgentId, AgentState, Capability, Clock, CodeChange, EvolutionError, ExpectedImpact,
    FitnessWeights, Mutation, MutationConstraint, MutationId, MutationMetadata, MutationTarget,
    MutationType, Result, SystemClock,
};

/// Result of a mutation attempt
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The rate check failed, the agent is returned as-is
    Unchanged(Agent),
    /// A new agent derived from the input
    Mutated { agent: Agent, mutation: Mutation },
}

impl MutationOutcome {
    pub fn agent(&self) -> &Agent {
        match self {
            MutationOutcome::Unchanged(agent) => agent,
            MutationOutcome::Mutated { agent, .. } => agent,
        }
    }

    pub fn into_agent(self) -> Agent {
        match self {
            MutationOutcome::Unchanged(agent) => agent,
            MutationOutcome::Mutated { agent, .. } => agent,
        }
    }

    pub fn is_mutated(&self) -> bool {
        matches!(self, MutationOutcome::Mutated { .. })
    }
}

/// Running mutation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationStats {
    pub attempted: u64,
    pub successful: u64,
}

impl MutationStats {
    /// Count one attempt. `Unchanged` outcomes are not attempts.
    pub fn record(&mut self, outcome: &Result<MutationOutcome>) {
        match outcome {
            Ok(outcome) if !outcome.is_mutated() => {}
            Ok(_) => {
                self.attempted += 1;
                self.successful += 1;
            }
            Err(_) => self.attempted += 1,
        }
    }

    pub fn merge(&mut self, other: &MutationStats) {
        self.attempted += other.attempted;
        self.successful += other.successful;
    }

    pub fn failed(&self) -> u64 {
        self.attempted - self.successful
    }

    /// successful / attempted, 0 before the first attempt
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.successful as f64 / self.attempted as f64
        }
    }
}

/// Applies random mutations at a fixed rate
#[derive(Clone)]
pub struct Mutator {
    rate: f64,
    weights: FitnessWeights,
    catalogue: Vec<Capability>,
    clock: Arc<dyn Clock>,
}

impl Mutator {
    pub fn new(rate: f64, weights: FitnessWeights) -> Self {
        Self {
            rate: if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) },
            weights,
            catalogue: evoforge_common::AgentVariant::global_catalogue(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Mutate with probability `rate`, choosing the type uniformly
    pub fn mutate(&self, agent: &Agent, rng: &mut dyn RngCore) -> Result<MutationOutcome> {
        if !rng.gen_bool(self.rate) {
            return Ok(MutationOutcome::Unchanged(agent.clone()));
        }
        let mutation_type = MutationType::ALL[rng.gen_range(0..MutationType::ALL.len())];
        self.apply(agent, mutation_type, rng)
    }

    /// Describe and apply a mutation of the given type
    pub fn apply(
        &self,
        agent: &Agent,
        mutation_type: MutationType,
        rng: &mut dyn RngCore,
    ) -> Result<MutationOutcome> {
        let mut capabilities = agent.capabilities.clone();
        let (component_path, change) = self.change(agent, mutation_type, &mut capabilities, rng)?;

        let constraints = vec![
            MutationConstraint::PreserveInterface,
            MutationConstraint::MinCapabilities(1),
            MutationConstraint::MaxCapabilities(self.catalogue.len()),
        ];
        check_constraints(&constraints, &capabilities).map_err(|reason| {
            EvolutionError::MutationFailure {
                agent_id: agent.id,
                mutation_type,
                reason,
            }
        })?;

        let affected_capabilities = match mutation_type {
            MutationType::StructuralChange => capabilities.iter().map(|c| c.name.clone()).collect(),
            _ => component_path
                .split('/')
                .nth(1)
                .map(|name| vec![name.to_string()])
                .unwrap_or_default(),
        };
        let resource_impact = match mutation_type {
            MutationType::CapabilityAddition => 0.05,
            MutationType::OptimizationRefactor => -0.05,
            _ => 0.0,
        };

        let now = self.clock.now();
        let mutation = Mutation {
            id: MutationId::new(),
            mutation_type,
            target: MutationTarget {
                agent_id: agent.id,
                component_path,
            },
            changes: vec![change],
            expected_impact: ExpectedImpact {
                fitness_delta: mutation_type.predicted_delta(),
                risk: mutation_type.risk(),
                affected_capabilities,
                resource_impact,
            },
            constraints,
            metadata: MutationMetadata {
                creator: "mutator".to_string(),
                reason: format!("random {mutation_type}"),
                tags: vec![mutation_type.as_str().to_string()],
                created_at: now,
            },
        };

        let mut child = agent.clone();
        child.id = AgentId::new();
        child.version = agent.version.bump_patch();
        child.capabilities = capabilities;
        child.state = AgentState::new(agent.fitness().inherit(&self.weights).stamped(now));
        child.metadata.created_at = now;
        child.metadata.updated_at = now;
        child.metadata.parent_id = Some(agent.id);
        child.metadata.co_parent_id = None;
        child.metadata.generation = agent.metadata.generation + 1;
        child.metadata.mutation_history.push(mutation.id);

        Ok(MutationOutcome::Mutated {
            agent: child,
            mutation,
        })
    }

    /// Edit `capabilities` in place, returning the component path and change record
    fn change(
        &self,
        agent: &Agent,
        mutation_type: MutationType,
        capabilities: &mut Vec<Capability>,
        rng: &mut dyn RngCore,
    ) -> Result<(String, CodeChange)> {
        let fail = |reason: &str| EvolutionError::MutationFailure {
            agent_id: agent.id,
            mutation_type,
            reason: reason.to_string(),
        };

        match mutation_type {
            MutationType::ParameterTuning
            | MutationType::MethodModification
            | MutationType::BehaviorAlteration => {
                if capabilities.is_empty() {
                    return Err(fail("agent has no capabilities to modify"));
                }
                let idx = rng.gen_range(0..capabilities.len());
                let cap = &mut capabilities[idx];
                let old = cap.version;
                cap.version = match mutation_type {
                    MutationType::ParameterTuning => old.bump_patch(),
                    MutationType::MethodModification => old.bump_minor(),
                    _ => old.bump_major(),
                };
                let path = format!("capabilities/{}/version", cap.name);
                Ok((
                    path.clone(),
                    CodeChange {
                        location: path,
                        old_value: old.to_string(),
                        new_value: cap.version.to_string(),
                        description: format!("{mutation_type} on {}", cap.name),
                    },
                ))
            }
            MutationType::StructuralChange => {
                if capabilities.len() < 2 {
                    return Err(fail("structural change needs at least two capabilities"));
                }
                let old = names(capabilities);
                capabilities.rotate_left(1);
                Ok((
                    "capabilities".to_string(),
                    CodeChange {
                        location: "capabilities".to_string(),
                        old_value: old,
                        new_value: names(capabilities),
                        description: "rotate capability order".to_string(),
                    },
                ))
            }
            MutationType::CapabilityAddition => {
                let absent: Vec<&Capability> = self
                    .catalogue
                    .iter()
                    .filter(|c| !capabilities.iter().any(|have| have.name == c.name))
                    .collect();
                let cap = absent
                    .choose(&mut *rng)
                    .map(|c| (*c).clone())
                    .ok_or_else(|| fail("every catalogue capability is already present"))?;
                let path = format!("capabilities/{}", cap.name);
                let description = format!("add {}", cap.name);
                capabilities.push(cap);
                Ok((
                    path.clone(),
                    CodeChange {
                        location: path,
                        old_value: String::new(),
                        new_value: names(capabilities),
                        description,
                    },
                ))
            }
            MutationType::OptimizationRefactor => {
                if capabilities.len() < 2 {
                    return Err(fail("refusing to remove the only capability"));
                }
                let old = names(capabilities);
                let removed = capabilities
                    .pop()
                    .ok_or_else(|| fail("agent has no capabilities"))?;
                let path = format!("capabilities/{}", removed.name);
                Ok((
                    path.clone(),
                    CodeChange {
                        location: path,
                        old_value: old,
                        new_value: names(capabilities),
                        description: format!("remove {}", removed.name),
                    },
                ))
            }
        }
    }
}

fn names(capabilities: &[Capability]) -> String {
    capabilities
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn check_constraints(
    constraints: &[MutationConstraint],
    capabilities: &[Capability],
) -> std::result::Result<(), String> {
    for constraint in constraints {
        match constraint {
            MutationConstraint::MinCapabilities(min) if capabilities.len() < *min => {
                return Err(format!("would leave fewer than {min} capabilities"));
            }
            MutationConstraint::MaxCapabilities(max) if capabilities.len() > *max => {
                return Err(format!("would exceed {max} capabilities"));
            }
            // Variant and permission sets are never edited by these operators
            _ => {}
        }
    }
    Ok(())
}
