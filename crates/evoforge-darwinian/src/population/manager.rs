//! Population Manager
//!
//! Builds initial populations and assembles each next generation from elites,
//! offspring and fresh agents, applying the aging and diversity policies.

use std::collections::HashSet;
use std::sync::Arc;

use rand::{Rng, RngCore};
use tracing::debug;

use evoforge_common::{
    rank_order, Agent, AgentVariant, Clock, EvolutionConfig, FitnessComponent, FitnessComponents,
    FitnessProvenance, FitnessScore, FitnessWeights, Population, PopulationMember, SystemClock,
    DIVERSITY_REPLACEMENT_FRACTION,
};

use crate::culling::AgingPolicy;

use super::statistics::{calculate_statistics, diversity};

/// Seeded fitness targets are drawn from this range
const SEED_RANGE: (f64, f64) = (0.3, 0.7);
/// Per-component jitter around the seeded target
const SEED_JITTER: f64 = 0.1;

/// What a replacement step did besides assembling members
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacementReport {
    pub population: Population,
    pub elites: usize,
    pub padded: usize,
    pub stagnant_removed: usize,
    pub diversity_replaced: usize,
}

#[derive(Clone)]
pub struct PopulationManager {
    weights: FitnessWeights,
    clock: Arc<dyn Clock>,
}

impl Default for PopulationManager {
    fn default() -> Self {
        Self::new(FitnessWeights::default())
    }
}

impl PopulationManager {
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

    /// `size` agents spread evenly over the variants; the remainder goes to
    /// the first variants in declaration order.
    pub fn create_initial_population(
        &self,
        size: usize,
        generation: u64,
        rng: &mut dyn RngCore,
    ) -> Population {
        let variants = AgentVariant::ALL.len();
        let (per_variant, remainder) = (size / variants, size % variants);

        let mut members = Vec::with_capacity(size);
        for (i, variant) in AgentVariant::ALL.into_iter().enumerate() {
            let count = per_variant + usize::from(i < remainder);
            for _ in 0..count {
                members.push(PopulationMember::new(self.random_agent(
                    variant,
                    generation,
                    &mut *rng,
                )));
            }
        }

        let mut population = Population::new(generation, members).stamped(self.clock.now());
        population.statistics = calculate_statistics(&population.members, 0.0);
        debug!(size, generation, "Created initial population");
        population
    }

    /// Fresh agent with the variant's default catalogue and a seeded fitness
    pub fn random_agent(
        &self,
        variant: AgentVariant,
        generation: u64,
        rng: &mut dyn RngCore,
    ) -> Agent {
        let mut agent =
            Agent::new(variant, self.seeded_fitness(rng), generation).stamped(self.clock.now());
        agent.add_tag("seeded");
        agent
    }

    /// Random starting fitness whose overall equals a target drawn from
    /// [0.3, 0.7]. Components are jittered, then shifted together so the
    /// weighted mean hits the target exactly; the shift keeps every component
    /// inside [0.1, 0.9] so clamping never skews the result.
    pub fn seeded_fitness(&self, rng: &mut dyn RngCore) -> FitnessScore {
        let target = rng.gen_range(SEED_RANGE.0..=SEED_RANGE.1);

        let mut components = FitnessComponents::uniform(target);
        for component in FitnessComponent::ALL {
            components.set(component, target + rng.gen_range(-SEED_JITTER..=SEED_JITTER));
        }
        let shift = target - self.weights.combine(&components);
        let components = components.map(|v| v + shift);

        FitnessScore::from_components(components, &self.weights, FitnessProvenance::Seeded)
            .stamped(self.clock.now())
    }

    /// Increment every member's age
    pub fn update_agent_ages(&self, population: &mut Population) {
        for member in &mut population.members {
            member.age += 1;
        }
    }

    /// Remove non-elite members at or past `max_age` and refill with fresh
    /// agents of the same variant. Returns the number removed.
    pub fn remove_stagnant_agents(
        &self,
        population: &mut Population,
        max_age: u32,
        rng: &mut dyn RngCore,
    ) -> usize {
        let policy = AgingPolicy::new(max_age);
        let generation = population.generation;
        let mut removed = 0;

        for member in &mut population.members {
            if policy.should_retire(member.age, member.is_elite) {
                let fresh = self.random_agent(member.agent.variant, generation, &mut *rng);
                *member = PopulationMember::new(fresh);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, max_age, "Retired stagnant agents");
        }
        removed
    }

    /// When diversity is at or below `threshold`, replace the weakest 20%
    /// (rounded up, elites exempt) with fresh agents. Variants are cycled
    /// starting from the least represented. Returns the number replaced.
    pub fn maintain_diversity(
        &self,
        population: &mut Population,
        threshold: f64,
        rng: &mut dyn RngCore,
    ) -> usize {
        if population.is_empty() || diversity(&population.members) > threshold {
            return 0;
        }

        let target =
            (population.size() as f64 * DIVERSITY_REPLACEMENT_FRACTION).ceil() as usize;

        let mut candidates: Vec<usize> = (0..population.size())
            .filter(|i| !population.members[*i].is_elite)
            .collect();
        candidates.sort_by(|a, b| rank_order(&population.members[*b], &population.members[*a]));
        candidates.truncate(target);

        let mut variants = AgentVariant::ALL.to_vec();
        variants.sort_by_key(|v| {
            population
                .members
                .iter()
                .filter(|m| m.agent.variant == *v)
                .count()
        });

        let generation = population.generation;
        for (n, idx) in candidates.iter().enumerate() {
            let variant = variants[n % variants.len()];
            population.members[*idx] =
                PopulationMember::new(self.random_agent(variant, generation, &mut *rng));
        }

        debug!(replaced = candidates.len(), threshold, "Restored diversity");
        candidates.len()
    }

    /// Assemble the next generation.
    ///
    /// Order: age survivors, carry elites verbatim, add offspring (deduplicated
    /// by id), truncate or pad to the target size, retire stagnant members,
    /// restore diversity, recompute statistics.
    pub fn replace(
        &self,
        current: &Population,
        offspring: Vec<Agent>,
        config: &EvolutionConfig,
        mutation_success_rate: f64,
        rng: &mut dyn RngCore,
    ) -> ReplacementReport {
        let target = config.population_size;
        let generation = current.generation + 1;

        let mut aged = current.clone();
        self.update_agent_ages(&mut aged);
        for member in &mut aged.members {
            member.is_elite = false;
        }

        let elite_count = config.elite_count().min(aged.size()).min(target);
        let mut members: Vec<PopulationMember> = aged
            .ranked()
            .into_iter()
            .take(elite_count)
            .cloned()
            .map(|mut m| {
                m.is_elite = true;
                m
            })
            .collect();
        let mut seen: HashSet<_> = members.iter().map(PopulationMember::id).collect();

        for agent in offspring {
            if !seen.insert(agent.id) {
                continue;
            }
            // Parents passed through unchanged keep their age and fitness
            let member = match aged.get(&agent.id) {
                Some(existing) => existing.clone(),
                None => PopulationMember::new(agent),
            };
            members.push(member);
        }

        members.truncate(target);
        let padded = target.saturating_sub(members.len());
        for i in 0..padded {
            let variant = AgentVariant::ALL[i % AgentVariant::ALL.len()];
            members.push(PopulationMember::new(self.random_agent(variant, generation, &mut *rng)));
        }

        let mut population = Population::new(generation, members).stamped(self.clock.now());
        let stagnant_removed =
            self.remove_stagnant_agents(&mut population, config.max_agent_age, &mut *rng);
        let diversity_replaced =
            self.maintain_diversity(&mut population, config.diversity_threshold, &mut *rng);
        population.statistics = calculate_statistics(&population.members, mutation_success_rate);

        ReplacementReport {
            population,
            elites: elite_count,
            padded,
            stagnant_removed,
            diversity_replaced,
        }
    }
}
