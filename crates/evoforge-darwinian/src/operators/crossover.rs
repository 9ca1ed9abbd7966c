//! Capability crossover
//!
//! Each child is built around one primary parent and borrows a single
//! capability from the other. Parents are never modified.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::RngCore;

use evoforge_common::{
    Agent, AgentId, AgentMetadata, AgentState, Capability, Clock, FitnessScore, FitnessWeights,
    SemanticVersion, SystemClock,
};

/// Tag added to every crossover child
pub const CROSSOVER_TAG: &str = "crossover";

#[derive(Clone)]
pub struct Crossover {
    weights: FitnessWeights,
    clock: Arc<dyn Clock>,
}

impl Default for Crossover {
    fn default() -> Self {
        Self::new(FitnessWeights::default())
    }
}

impl Crossover {
    pub fn new(weights: FitnessWeights) -> Self {
        Self {
            weights,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Two children, one built around each parent
    pub fn crossover(&self, a: &Agent, b: &Agent, rng: &mut dyn RngCore) -> [Agent; 2] {
        [self.child(a, b, &mut *rng), self.child(b, a, &mut *rng)]
    }

    fn child(&self, primary: &Agent, other: &Agent, rng: &mut dyn RngCore) -> Agent {
        let mut capabilities = primary.capabilities.clone();
        let borrowed: Vec<&Capability> = other
            .capabilities
            .iter()
            .filter(|c| !primary.has_capability(&c.name))
            .collect();
        if let Some(cap) = borrowed.choose(&mut *rng) {
            capabilities.push((*cap).clone());
        }

        let now = self.clock.now();
        let fitness = FitnessScore::inherited(primary.fitness(), other.fitness(), &self.weights)
            .stamped(now);

        let mut tags = primary.metadata.tags.clone();
        if !tags.iter().any(|t| t == CROSSOVER_TAG) {
            tags.push(CROSSOVER_TAG.to_string());
        }

        Agent {
            id: AgentId::new(),
            variant: primary.variant,
            version: SemanticVersion::BASELINE,
            capabilities,
            state: AgentState::new(fitness),
            metadata: AgentMetadata {
                created_at: now,
                updated_at: now,
                parent_id: Some(primary.id),
                co_parent_id: Some(other.id),
                generation: primary.metadata.generation.max(other.metadata.generation) + 1,
                mutation_history: primary.metadata.mutation_history.clone(),
                tags,
            },
        }
    }
}
