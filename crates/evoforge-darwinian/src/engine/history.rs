//! Evolution history
//!
//! Append-only; only [`EvolutionHistory::trim`] ever drops records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use evoforge_common::{AgentId, AgentVariant, FitnessScore};

use super::cycle::EvolutionCycle;
use crate::population::variance;

/// Summary of one evaluated generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub generation: u64,
    pub average_fitness: f64,
    pub best_agent_id: AgentId,
    pub best_fitness: f64,
    pub diversity: f64,
    pub timestamp: DateTime<Utc>,
}

/// Best agent of a generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestAgentRecord {
    pub generation: u64,
    pub agent_id: AgentId,
    pub variant: AgentVariant,
    pub fitness: FitnessScore,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneKind {
    /// Best fitness beat every earlier generation
    NewBestFitness,
    Converged,
    /// Weakest members were re-seeded after diversity collapsed
    DiversityRestored,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub kind: MilestoneKind,
    pub generation: u64,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// Retention limits applied after every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRetention {
    pub max_cycles: usize,
    /// Also bounds best-agent records and milestones
    pub max_generation_records: usize,
}

impl Default for HistoryRetention {
    fn default() -> Self {
        Self {
            max_cycles: 50,
            max_generation_records: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvolutionHistory {
    pub cycles: Vec<EvolutionCycle>,
    pub generations: Vec<GenerationRecord>,
    pub best_agents: Vec<BestAgentRecord>,
    pub milestones: Vec<Milestone>,
}

impl EvolutionHistory {
    /// Highest best fitness over every recorded generation
    pub fn best_fitness_ever(&self) -> Option<f64> {
        self.generations
            .iter()
            .map(|g| g.best_fitness)
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }

    /// Append a generation record. Returns true when it beats every earlier one.
    pub fn record_generation(&mut self, record: GenerationRecord) -> bool {
        let new_best = self
            .best_fitness_ever()
            .map_or(true, |best| record.best_fitness > best);
        self.generations.push(record);
        new_best
    }

    pub fn record_best_agent(&mut self, record: BestAgentRecord) {
        self.best_agents.push(record);
    }

    pub fn add_milestone(
        &mut self,
        kind: MilestoneKind,
        generation: u64,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) {
        self.milestones.push(Milestone {
            kind,
            generation,
            description: description.into(),
            timestamp,
        });
    }

    pub fn push_cycle(&mut self, cycle: EvolutionCycle) {
        self.cycles.push(cycle);
    }

    /// Population variance of `average_fitness` over the last `window`
    /// generations, `None` until that many exist.
    pub fn recent_average_variance(&self, window: usize) -> Option<f64> {
        if window == 0 || self.generations.len() < window {
            return None;
        }
        let recent: Vec<f64> = self.generations[self.generations.len() - window..]
            .iter()
            .map(|g| g.average_fitness)
            .collect();
        Some(variance(&recent))
    }

    /// Drop the oldest records beyond the retention limits
    pub fn trim(&mut self, retention: &HistoryRetention) {
        fn keep_last<T>(items: &mut Vec<T>, max: usize) {
            if items.len() > max {
                items.drain(..items.len() - max);
            }
        }
        keep_last(&mut self.cycles, retention.max_cycles);
        keep_last(&mut self.generations, retention.max_generation_records);
        keep_last(&mut self.best_agents, retention.max_generation_records);
        keep_last(&mut self.milestones, retention.max_generation_records);
    }
}
