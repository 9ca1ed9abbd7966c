//! Population types shared by the engine and its persisted history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::{Agent, AgentId, AgentVariant};
use super::fitness::FitnessScore;
use super::PopulationId;

/// An agent as held by a population
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationMember {
    pub agent: Agent,
    pub fitness: FitnessScore,
    /// Generations this member has survived
    pub age: u32,
    pub is_elite: bool,
}

impl PopulationMember {
    pub fn new(agent: Agent) -> Self {
        let fitness = agent.state.fitness.clone();
        Self {
            agent,
            fitness,
            age: 0,
            is_elite: false,
        }
    }

    #[inline]
    pub fn id(&self) -> AgentId {
        self.agent.id
    }

    #[inline]
    pub fn overall(&self) -> f64 {
        self.fitness.overall()
    }

    /// Keep the member's fitness and the agent's state fitness in step
    pub fn set_fitness(&mut self, fitness: FitnessScore) {
        self.agent.record_fitness(fitness.clone());
        self.fitness = fitness;
    }
}

/// Aggregate statistics over a population
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationStatistics {
    pub size: usize,
    pub average_fitness: f64,
    pub best_fitness: f64,
    pub worst_fitness: f64,
    /// Normalised variant entropy in [0, 1]
    pub diversity: f64,
    /// Fitness spread stability in [0, 1]
    pub convergence: f64,
    pub mutation_success_rate: f64,
}

/// A generation of agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Population {
    pub id: PopulationId,
    pub generation: u64,
    pub members: Vec<PopulationMember>,
    pub statistics: PopulationStatistics,
    pub timestamp: DateTime<Utc>,
}

impl Population {
    pub fn new(generation: u64, members: Vec<PopulationMember>) -> Self {
        Self {
            id: PopulationId::new(),
            generation,
            members,
            statistics: PopulationStatistics::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn stamped(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, id: &AgentId) -> Option<&PopulationMember> {
        self.members.iter().find(|m| m.agent.id == *id)
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.get(id).is_some()
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.members.iter().map(|m| &m.agent)
    }

    /// Highest overall fitness, ties broken by lowest agent id
    pub fn best(&self) -> Option<&PopulationMember> {
        self.members.iter().min_by(|a, b| rank_order(a, b))
    }

    /// Best member of a given variant
    pub fn best_of_variant(&self, variant: AgentVariant) -> Option<&PopulationMember> {
        self.members
            .iter()
            .filter(|m| m.agent.variant == variant)
            .min_by(|a, b| rank_order(a, b))
    }

    /// Members sorted best-first
    pub fn ranked(&self) -> Vec<&PopulationMember> {
        let mut ranked: Vec<_> = self.members.iter().collect();
        ranked.sort_by(|a, b| rank_order(a, b));
        ranked
    }
}

/// Ordering used for every ranking: fitness descending, then agent id ascending.
pub fn rank_order(a: &PopulationMember, b: &PopulationMember) -> std::cmp::Ordering {
    b.overall()
        .total_cmp(&a.overall())
        .then_with(|| a.agent.id.cmp(&b.agent.id))
}
