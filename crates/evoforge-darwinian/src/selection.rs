//! Parent selection strategies
//!
//! Every strategy may return the same agent more than once. Asking for more
//! parents than the population holds is an error, never a silent truncation.

use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, RngCore};

use evoforge_common::{
    rank_order, Agent, EvolutionError, Population, PopulationMember, Result, SelectionMethod,
};

/// Picks `count` parents from a population
pub trait SelectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(
        &self,
        population: &Population,
        count: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Agent>>;
}

fn ensure_available(population: &Population, count: usize) -> Result<()> {
    if count > population.size() {
        return Err(EvolutionError::InsufficientPopulation {
            requested: count,
            available: population.size(),
        });
    }
    Ok(())
}

/// Tournament of `max(2, size / 10)` contestants sampled without replacement
#[derive(Debug, Default, Clone, Copy)]
pub struct TournamentSelection;

impl TournamentSelection {
    pub fn tournament_size(population_size: usize) -> usize {
        (population_size / 10).max(2).min(population_size)
    }
}

impl SelectionStrategy for TournamentSelection {
    fn name(&self) -> &'static str {
        "tournament"
    }

    fn select(
        &self,
        population: &Population,
        count: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Agent>> {
        ensure_available(population, count)?;
        let members = &population.members;
        let size = Self::tournament_size(members.len());

        let mut selected = Vec::with_capacity(count);
        for _ in 0..count {
            let winner = rand::seq::index::sample(&mut *rng, members.len(), size)
                .into_iter()
                .map(|i| &members[i])
                .min_by(|a, b| rank_order(a, b));
            if let Some(winner) = winner {
                selected.push(winner.agent.clone());
            }
        }
        Ok(selected)
    }
}

/// Fitness-proportional selection, uniform when total fitness is zero
#[derive(Debug, Default, Clone, Copy)]
pub struct RouletteWheelSelection;

impl SelectionStrategy for RouletteWheelSelection {
    fn name(&self) -> &'static str {
        "roulette_wheel"
    }

    fn select(
        &self,
        population: &Population,
        count: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Agent>> {
        ensure_available(population, count)?;
        let members = &population.members;
        if count == 0 {
            return Ok(Vec::new());
        }

        let total: f64 = members.iter().map(PopulationMember::overall).sum();
        if total <= 0.0 {
            return Ok((0..count)
                .map(|_| members[rng.gen_range(0..members.len())].agent.clone())
                .collect());
        }

        let wheel = WeightedIndex::new(members.iter().map(|m| m.overall().max(0.0)))
            .map_err(|e| EvolutionError::Internal(format!("invalid selection weights: {e}")))?;
        Ok((0..count)
            .map(|_| members[wheel.sample(&mut *rng)].agent.clone())
            .collect())
    }
}

/// Deterministic top-`count` by rank
#[derive(Debug, Default, Clone, Copy)]
pub struct RankSelection;

impl SelectionStrategy for RankSelection {
    fn name(&self) -> &'static str {
        "rank"
    }

    fn select(
        &self,
        population: &Population,
        count: usize,
        _rng: &mut dyn RngCore,
    ) -> Result<Vec<Agent>> {
        ensure_available(population, count)?;
        Ok(population
            .ranked()
            .into_iter()
            .take(count)
            .map(|m| m.agent.clone())
            .collect())
    }
}

/// Build the configured strategy
pub fn selection_for(method: SelectionMethod) -> Box<dyn SelectionStrategy> {
    match method {
        SelectionMethod::Tournament => Box::new(TournamentSelection),
        SelectionMethod::RouletteWheel => Box::new(RouletteWheelSelection),
        SelectionMethod::Rank => Box::new(RankSelection),
    }
}
