//! Evolution engine
//!
//! Owns the live population and history and runs the generational cycle:
//!
//! ```text
//! Initialization -> (Evaluation -> Selection -> Crossover -> Mutation -> Replacement)* -> Completed
//! ```
//!
//! Only one cycle runs at a time. Cancellation is observed between
//! generations, after Replacement has committed.

pub mod cycle;
pub mod history;
pub mod scheduler;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use evoforge_archive::{ArchiveConfig, ArchiveReason, ArchiveStore};
use evoforge_common::events::names;
use evoforge_common::{
    Agent, AgentExecutor, AgentVariant, Clock, ConfigurationSource, EventMeasurements,
    EventProperties, EventSink, EvolutionConfig, EvolutionError, InMemoryBackend, Mutation,
    PersistenceBackend, Population, PopulationMember, Result, SystemClock, TracingEventSink,
    CONVERGENCE_WINDOW,
};

use crate::fitness::{EvaluatorConfig, FitnessEvaluator};
use crate::operators::{Crossover, MutationOutcome, MutationStats, Mutator};
use crate::population::{calculate_statistics, PopulationManager};
use crate::selection::{selection_for, SelectionStrategy};

pub use cycle::{CyclePhase, CycleResults, EvolutionCycle};
pub use history::{
    BestAgentRecord, EvolutionHistory, GenerationRecord, HistoryRetention, Milestone,
    MilestoneKind,
};
pub use scheduler::{SchedulePriority, Scheduler};

/// Backend key for the persisted history
pub const HISTORY_KEY: &str = "evolution/history";
/// Backend key for the last committed population
pub const POPULATION_KEY: &str = "evolution/population";

/// Collaborators and settings for an [`EvolutionEngine`]
pub struct EngineDeps {
    pub config_source: Arc<dyn ConfigurationSource>,
    pub executor: Arc<dyn AgentExecutor>,
    pub backend: Arc<dyn PersistenceBackend>,
    pub events: Arc<dyn EventSink>,
    /// Defaults to an empty store on `backend`
    pub archive: Option<Arc<ArchiveStore>>,
    pub clock: Arc<dyn Clock>,
    /// Fixed seed for reproducible runs
    pub seed: Option<u64>,
    pub evaluator: EvaluatorConfig,
    pub retention: HistoryRetention,
    /// Overrides the configured selection method
    pub selection: Option<Arc<dyn SelectionStrategy>>,
}

impl EngineDeps {
    pub fn new(
        config_source: Arc<dyn ConfigurationSource>,
        executor: Arc<dyn AgentExecutor>,
    ) -> Self {
        Self {
            config_source,
            executor,
            backend: Arc::new(InMemoryBackend::new()),
            events: Arc::new(TracingEventSink),
            archive: None,
            clock: Arc::new(SystemClock),
            seed: None,
            evaluator: EvaluatorConfig::default(),
            retention: HistoryRetention::default(),
            selection: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn PersistenceBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_archive(mut self, archive: Arc<ArchiveStore>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_evaluator(mut self, evaluator: EvaluatorConfig) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_retention(mut self, retention: HistoryRetention) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_selection(mut self, selection: Arc<dyn SelectionStrategy>) -> Self {
        self.selection = Some(selection);
        self
    }
}

/// Publishes "idle" however `evolve` exits
struct RunningGuard<'a> {
    running: &'a watch::Sender<bool>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.send_replace(false);
    }
}

/// State produced by one generation, committed only once all phases succeed
struct GenerationOutcome {
    evaluated: Population,
    next: Population,
    mutations: Vec<Mutation>,
    mutation_stats: MutationStats,
    diversity_replaced: usize,
}

/// Genetic algorithm engine
pub struct EvolutionEngine {
    config_source: Arc<dyn ConfigurationSource>,
    backend: Arc<dyn PersistenceBackend>,
    events: Arc<dyn EventSink>,
    archive: Arc<ArchiveStore>,
    clock: Arc<dyn Clock>,
    evaluator: FitnessEvaluator,
    manager: PopulationManager,
    crossover: Crossover,
    retention: HistoryRetention,
    selection: Option<Arc<dyn SelectionStrategy>>,
    rng: Mutex<StdRng>,
    population: RwLock<Option<Population>>,
    history: RwLock<EvolutionHistory>,
    mutation_stats: Mutex<MutationStats>,
    /// Doubles as the exclusivity flag: only flipped under the channel's lock
    running: watch::Sender<bool>,
    cancel_requested: AtomicBool,
    scheduler: Scheduler,
}

impl EvolutionEngine {
    /// Fails with `Config` when the evaluator's fitness weights are invalid
    pub fn new(deps: EngineDeps) -> Result<Self> {
        let weights = deps.evaluator.weights.clone();
        let evaluator =
            FitnessEvaluator::new(deps.evaluator, deps.executor)?.with_clock(deps.clock.clone());
        let archive = deps.archive.unwrap_or_else(|| {
            Arc::new(
                ArchiveStore::new(ArchiveConfig::default(), deps.backend.clone())
                    .with_clock(deps.clock.clone()),
            )
        });
        let rng = match deps.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (running, _) = watch::channel(false);

        Ok(Self {
            config_source: deps.config_source,
            backend: deps.backend,
            events: deps.events,
            archive,
            scheduler: Scheduler::new(deps.clock.clone()),
            manager: PopulationManager::new(weights.clone()).with_clock(deps.clock.clone()),
            crossover: Crossover::new(weights).with_clock(deps.clock.clone()),
            clock: deps.clock,
            evaluator,
            retention: deps.retention,
            selection: deps.selection,
            rng: Mutex::new(rng),
            population: RwLock::new(None),
            history: RwLock::new(EvolutionHistory::default()),
            mutation_stats: Mutex::new(MutationStats::default()),
            running,
            cancel_requested: AtomicBool::new(false),
        })
    }

    /// Host sources are not trusted to validate what they return
    fn load_config(&self) -> Result<EvolutionConfig> {
        let config = self.config_source.load()?;
        config.validate()?;
        Ok(config)
    }

    /// Load history and the last committed population, seeding a fresh
    /// population when none was persisted.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        let config = self.load_config()?;

        if let Some(history) = self.load_json::<EvolutionHistory>(HISTORY_KEY).await {
            info!(
                cycles = history.cycles.len(),
                generations = history.generations.len(),
                "Loaded evolution history"
            );
            *self.history.write() = history;
        }

        let population = match self.load_json::<Population>(POPULATION_KEY).await {
            Some(population) if !population.is_empty() => {
                info!(
                    generation = population.generation,
                    size = population.size(),
                    "Loaded population"
                );
                population
            }
            _ => {
                let population = self.seed_population(&config);
                self.save_json(POPULATION_KEY, &population).await;
                population
            }
        };
        *self.population.write() = Some(population);
        Ok(())
    }

    fn seed_population(&self, config: &EvolutionConfig) -> Population {
        let mut rng = self.rng.lock();
        self.manager
            .create_initial_population(config.population_size, 0, &mut *rng)
    }

    /// Run up to `generations` generations.
    ///
    /// Fails with `AlreadyRunning` when another cycle is active. Generation
    /// failures abort the cycle with `CycleAborted`; the population committed
    /// by the last successful Replacement stays current.
    #[instrument(skip(self))]
    pub async fn evolve(&self, generations: u32) -> Result<EvolutionCycle> {
        let acquired = self.running.send_if_modified(|running| {
            if *running {
                return false;
            }
            *running = true;
            self.cancel_requested.store(false, Ordering::Release);
            true
        });
        if !acquired {
            return Err(EvolutionError::AlreadyRunning);
        }
        let _guard = RunningGuard {
            running: &self.running,
        };

        let config = self.load_config()?;
        if generations == 0 {
            return Err(EvolutionError::InvalidArgument(
                "generations must be positive".to_string(),
            ));
        }
        let generations = generations.min(config.max_generations);

        let mut population = match self.current_population() {
            Some(population) => population,
            None => {
                let population = self.seed_population(&config);
                *self.population.write() = Some(population.clone());
                population
            }
        };
        let mut cycle = EvolutionCycle::new(population.clone(), self.clock.now());
        info!(
            cycle_id = %cycle.id,
            generation = cycle.generation,
            generations,
            "Starting evolution cycle"
        );

        for _ in 0..generations {
            let generation = population.generation;
            let outcome = match self.run_generation(&config, &mut cycle, &population).await {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.abort_cycle(&mut cycle, generation, e)),
            };

            population = outcome.next.clone();
            self.commit_generation(&config, &mut cycle, outcome).await;

            if self.cancel_requested.load(Ordering::Acquire) {
                info!(generation = population.generation, "Evolution cancelled");
                cycle.cancelled = true;
                self.history.write().add_milestone(
                    MilestoneKind::Cancelled,
                    population.generation,
                    "cycle cancelled at generation boundary",
                    self.clock.now(),
                );
                break;
            }
            if self.check_convergence(&config, &mut cycle, population.generation) {
                break;
            }
        }

        cycle.population = population;
        if let Err(e) = cycle.complete(self.clock.now()) {
            let generation = cycle.population.generation;
            return Err(self.abort_cycle(&mut cycle, generation, e));
        }

        let history_json = {
            let mut history = self.history.write();
            history.push_cycle(cycle.clone());
            history.trim(&self.retention);
            let json = serde_json::to_string(&*history);
            json
        };
        match history_json {
            Ok(json) => self.save_raw(HISTORY_KEY, &json).await,
            Err(e) => warn!(error = %e, "Failed to serialize history"),
        }

        self.emit_cycle_completed(&cycle);
        info!(
            cycle_id = %cycle.id,
            generations_completed = cycle.generations_completed,
            converged = cycle.converged,
            cancelled = cycle.cancelled,
            "Evolution cycle completed"
        );
        Ok(cycle)
    }

    /// Evaluation through Replacement. Touches no shared state.
    async fn run_generation(
        &self,
        config: &EvolutionConfig,
        cycle: &mut EvolutionCycle,
        current: &Population,
    ) -> Result<GenerationOutcome> {
        cycle.transition(CyclePhase::Evaluation)?;
        let evaluated = self.evaluate(cycle, current).await;

        cycle.transition(CyclePhase::Selection)?;
        let elite_count = config.elite_count().min(config.population_size);
        let offspring_count = config.population_size - elite_count;
        let parent_count = (offspring_count + offspring_count % 2).min(evaluated.size());
        let parents = {
            let mut rng = self.rng.lock();
            match &self.selection {
                Some(strategy) => strategy.select(&evaluated, parent_count, &mut *rng),
                None => selection_for(config.selection_strategy).select(
                    &evaluated,
                    parent_count,
                    &mut *rng,
                ),
            }?
        };
        debug!(parents = parents.len(), offspring_count, "Parents selected");

        cycle.transition(CyclePhase::Crossover)?;
        let mut offspring = {
            let mut rng = self.rng.lock();
            self.breed(&parents, config.crossover_rate, &mut *rng)
        };
        offspring.truncate(offspring_count);

        cycle.transition(CyclePhase::Mutation)?;
        let (offspring, mutations, mutation_stats) = {
            let mut rng = self.rng.lock();
            self.mutate_all(offspring, config.mutation_rate, &mut *rng)
        };

        cycle.transition(CyclePhase::Replacement)?;
        let report = {
            let mut rng = self.rng.lock();
            let lifetime_rate = {
                let mut total = *self.mutation_stats.lock();
                total.merge(&mutation_stats);
                total.success_rate()
            };
            self.manager
                .replace(&evaluated, offspring, config, lifetime_rate, &mut *rng)
        };
        if report.population.size() != config.population_size {
            return Err(EvolutionError::Internal(format!(
                "replacement produced {} members, expected {}",
                report.population.size(),
                config.population_size
            )));
        }

        Ok(GenerationOutcome {
            evaluated,
            next: report.population,
            mutations,
            mutation_stats,
            diversity_replaced: report.diversity_replaced,
        })
    }

    /// Score every member and record before/after deltas
    async fn evaluate(&self, cycle: &mut EvolutionCycle, current: &Population) -> Population {
        let before: HashMap<_, _> = current
            .members
            .iter()
            .map(|m| (m.id(), m.overall()))
            .collect();
        let agents: Vec<Agent> = current.agents().cloned().collect();
        let evaluations = self.evaluator.evaluate_batch(&agents).await;

        let mut evaluated = current.clone();
        for (member, evaluation) in evaluated.members.iter_mut().zip(evaluations) {
            if evaluation.score.is_fallback() {
                cycle.results.record_failure();
            } else if let Some(prior) = before.get(&member.id()) {
                cycle.results.record_delta(*prior, evaluation.score.overall());
            }
            member
                .agent
                .record_executions(evaluation.tasks_run as u64, evaluation.task_failures as u64);
            member.set_fitness(evaluation.score);
        }
        evaluated.statistics = calculate_statistics(
            &evaluated.members,
            current.statistics.mutation_success_rate,
        );
        evaluated
    }

    /// Pair parents (0,1), (2,3), ...; an odd tail pairs with parent 0
    fn breed(&self, parents: &[Agent], crossover_rate: f64, rng: &mut dyn RngCore) -> Vec<Agent> {
        let mut offspring = Vec::with_capacity(parents.len() + 1);
        for (i, pair) in parents.chunks(2).enumerate() {
            let (a, b) = match pair {
                [a, b] => (a, b),
                [a] if i > 0 => (a, &parents[0]),
                [a] => {
                    offspring.push(a.clone());
                    continue;
                }
                _ => continue,
            };
            if rng.gen_bool(crossover_rate) {
                offspring.extend(self.crossover.crossover(a, b, &mut *rng));
            } else {
                offspring.push(a.clone());
                offspring.push(b.clone());
            }
        }
        offspring
    }

    /// Mutation failures keep the original agent and still count as attempts
    fn mutate_all(
        &self,
        offspring: Vec<Agent>,
        rate: f64,
        rng: &mut dyn RngCore,
    ) -> (Vec<Agent>, Vec<Mutation>, MutationStats) {
        let mutator = Mutator::new(rate, self.weights()).with_clock(self.clock.clone());
        let mut stats = MutationStats::default();
        let mut mutations = Vec::new();
        let mut agents = Vec::with_capacity(offspring.len());

        for agent in offspring {
            let outcome = mutator.mutate(&agent, &mut *rng);
            stats.record(&outcome);
            match outcome {
                Ok(MutationOutcome::Mutated { agent, mutation }) => {
                    mutations.push(mutation);
                    agents.push(agent);
                }
                Ok(MutationOutcome::Unchanged(agent)) => agents.push(agent),
                Err(e) => {
                    debug!(agent_id = %agent.id, error = %e, "Mutation failed, keeping original");
                    agents.push(agent);
                }
            }
        }
        (agents, mutations, stats)
    }

    fn weights(&self) -> evoforge_common::FitnessWeights {
        self.evaluator.config().weights.clone()
    }

    /// Publish the replaced population and record the generation
    async fn commit_generation(
        &self,
        config: &EvolutionConfig,
        cycle: &mut EvolutionCycle,
        outcome: GenerationOutcome,
    ) {
        let GenerationOutcome {
            evaluated,
            next,
            mutations,
            mutation_stats,
            diversity_replaced,
        } = outcome;
        let now = self.clock.now();

        *self.population.write() = Some(next.clone());
        self.mutation_stats.lock().merge(&mutation_stats);
        cycle.generations_completed += 1;
        cycle.mutations.extend(mutations);
        cycle.results.mutations_attempted += mutation_stats.attempted;
        cycle.results.mutations_successful += mutation_stats.successful;
        cycle.population = next.clone();

        let new_best = match evaluated.best() {
            Some(best) => {
                let mut history = self.history.write();
                let new_best = history.record_generation(GenerationRecord {
                    generation: evaluated.generation,
                    average_fitness: evaluated.statistics.average_fitness,
                    best_agent_id: best.id(),
                    best_fitness: best.overall(),
                    diversity: evaluated.statistics.diversity,
                    timestamp: now,
                });
                history.record_best_agent(BestAgentRecord {
                    generation: evaluated.generation,
                    agent_id: best.id(),
                    variant: best.agent.variant,
                    fitness: best.fitness.clone(),
                    timestamp: now,
                });
                if new_best {
                    history.add_milestone(
                        MilestoneKind::NewBestFitness,
                        evaluated.generation,
                        format!("best fitness {:.4} by {}", best.overall(), best.id()),
                        now,
                    );
                }
                if diversity_replaced > 0 {
                    history.add_milestone(
                        MilestoneKind::DiversityRestored,
                        next.generation,
                        format!("re-seeded {diversity_replaced} members"),
                        now,
                    );
                }
                new_best
            }
            None => false,
        };

        self.emit_mutation_outcome(evaluated.generation, &mutation_stats);
        if diversity_replaced > 0 {
            let mut m = EventMeasurements::new();
            m.insert("diversity".into(), evaluated.statistics.diversity);
            m.insert("threshold".into(), config.diversity_threshold);
            m.insert("replaced".into(), diversity_replaced as f64);
            self.emit(names::DIVERSITY_BREACH, generation_props(next.generation), m);
        }

        self.archive_top_performers(&evaluated, config.archive_top_k, new_best)
            .await;
        self.save_json(POPULATION_KEY, &next).await;

        info!(
            generation = next.generation,
            average_fitness = evaluated.statistics.average_fitness,
            best_fitness = evaluated.statistics.best_fitness,
            diversity = next.statistics.diversity,
            "Generation committed"
        );
    }

    async fn archive_top_performers(&self, evaluated: &Population, top_k: usize, new_best: bool) {
        for (rank, member) in evaluated.ranked().into_iter().take(top_k).enumerate() {
            let reason = if rank == 0 && new_best {
                ArchiveReason::NewBest
            } else {
                ArchiveReason::TopPerformer
            };
            match self
                .archive
                .archive_agent(&member.agent, member.fitness.clone(), reason)
                .await
            {
                Ok(entry) => {
                    let mut p = EventProperties::new();
                    p.insert("entry_id".into(), entry.id.to_string());
                    p.insert("agent_id".into(), member.id().to_string());
                    p.insert("reason".into(), entry.metadata.reason.to_string());
                    let mut m = EventMeasurements::new();
                    m.insert("fitness".into(), entry.overall());
                    self.emit(names::AGENT_ARCHIVED, p, m);
                }
                Err(e) => warn!(agent_id = %member.id(), error = %e, "Failed to archive agent"),
            }
        }
    }

    /// True when the last window of generation averages has settled
    fn check_convergence(
        &self,
        config: &EvolutionConfig,
        cycle: &mut EvolutionCycle,
        generation: u64,
    ) -> bool {
        let variance = self
            .history
            .read()
            .recent_average_variance(CONVERGENCE_WINDOW);
        let Some(variance) = variance else {
            return false;
        };
        if variance >= config.convergence_threshold {
            return false;
        }

        info!(generation, variance, "Population converged");
        cycle.converged = true;
        self.history.write().add_milestone(
            MilestoneKind::Converged,
            generation,
            format!("average fitness variance {variance:.2e}"),
            self.clock.now(),
        );
        let mut m = EventMeasurements::new();
        m.insert("variance".into(), variance);
        m.insert("threshold".into(), config.convergence_threshold);
        self.emit(names::CONVERGED, generation_props(generation), m);
        true
    }

    fn abort_cycle(
        &self,
        cycle: &mut EvolutionCycle,
        generation: u64,
        err: EvolutionError,
    ) -> EvolutionError {
        cycle.abort(self.clock.now());
        error!(cycle_id = %cycle.id, generation, error = %err, "Evolution cycle aborted");

        let mut p = generation_props(generation);
        p.insert("cycle_id".into(), cycle.id.to_string());
        p.insert("reason".into(), err.to_string());
        self.emit(names::CYCLE_ABORTED, p, EventMeasurements::new());

        match err {
            EvolutionError::CycleAborted { .. } => err,
            other => EvolutionError::CycleAborted {
                generation,
                reason: other.to_string(),
            },
        }
    }

    /// Request cancellation and wait until the active cycle exits.
    /// Returns immediately when idle.
    pub async fn stop_evolution(&self) {
        let mut rx = self.running.subscribe();
        {
            // Holding the read guard keeps a cycle from starting or ending
            // between the check and the request
            let running = rx.borrow_and_update();
            if !*running {
                return;
            }
            self.cancel_requested.store(true, Ordering::Release);
        }
        info!("Stopping evolution at next generation boundary");
        // The sender lives as long as `self`, so this only returns on idle
        let _ = rx.wait_for(|running| !*running).await;
    }

    /// Debounced `evolve(1)` after the priority delay
    pub fn schedule_evolution(self: &Arc<Self>, priority: SchedulePriority) {
        let engine: Weak<Self> = Arc::downgrade(self);
        self.scheduler.schedule(priority, async move {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            match engine.evolve(1).await {
                Ok(cycle) => debug!(cycle_id = %cycle.id, "Scheduled evolution finished"),
                Err(e) => warn!(error = %e, "Scheduled evolution failed"),
            }
        });
    }

    pub fn cancel_scheduled(&self) -> bool {
        self.scheduler.cancel()
    }

    pub fn has_pending_schedule(&self) -> bool {
        self.scheduler.has_pending()
    }

    pub fn next_scheduled_run(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.scheduler.next_run_at()
    }

    pub fn current_population(&self) -> Option<Population> {
        self.population.read().clone()
    }

    pub fn evolution_history(&self) -> EvolutionHistory {
        self.history.read().clone()
    }

    /// Highest-fitness member of the current population
    pub fn best_agent(&self) -> Option<PopulationMember> {
        self.population.read().as_ref()?.best().cloned()
    }

    pub fn agent_by_variant(&self, variant: AgentVariant) -> Option<PopulationMember> {
        self.population
            .read()
            .as_ref()?
            .best_of_variant(variant)
            .cloned()
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub fn archive(&self) -> &Arc<ArchiveStore> {
        &self.archive
    }

    /// Mutation counters across every cycle run by this engine
    pub fn mutation_statistics(&self) -> MutationStats {
        *self.mutation_stats.lock()
    }

    fn emit_mutation_outcome(&self, generation: u64, stats: &MutationStats) {
        let mut m = EventMeasurements::new();
        m.insert("attempted".into(), stats.attempted as f64);
        m.insert("successful".into(), stats.successful as f64);
        m.insert("success_rate".into(), stats.success_rate());
        self.emit(names::MUTATION_OUTCOME, generation_props(generation), m);
    }

    fn emit_cycle_completed(&self, cycle: &EvolutionCycle) {
        let mut p = EventProperties::new();
        p.insert("cycle_id".into(), cycle.id.to_string());
        p.insert("converged".into(), cycle.converged.to_string());
        p.insert("cancelled".into(), cycle.cancelled.to_string());

        let stats = &cycle.population.statistics;
        let results = &cycle.results;
        let mut m = EventMeasurements::new();
        m.insert("generations_completed".into(), cycle.generations_completed as f64);
        m.insert("average_fitness".into(), stats.average_fitness);
        m.insert("best_fitness".into(), stats.best_fitness);
        m.insert("diversity".into(), stats.diversity);
        m.insert("improved".into(), results.improved as f64);
        m.insert("degraded".into(), results.degraded as f64);
        m.insert("unchanged".into(), results.unchanged as f64);
        m.insert("failed".into(), results.failed as f64);
        m.insert("average_fitness_change".into(), results.average_fitness_change);
        if let Some(ms) = cycle.duration_ms() {
            m.insert("duration_ms".into(), ms as f64);
        }
        self.emit(names::CYCLE_COMPLETED, p, m);
    }

    fn emit(&self, name: &str, properties: EventProperties, measurements: EventMeasurements) {
        self.events.emit(name, &properties, &measurements);
    }

    async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.backend.load(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "Ignoring unreadable persisted state");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Failed to load persisted state");
                None
            }
        }
    }

    async fn save_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.save_raw(key, &json).await,
            Err(e) => warn!(key, error = %e, "Failed to serialize state"),
        }
    }

    async fn save_raw(&self, key: &str, json: &str) {
        if let Err(e) = self.backend.save(key, json).await {
            warn!(key, error = %e, "Failed to persist state, keeping it in memory");
        }
    }
}

fn generation_props(generation: u64) -> EventProperties {
    let mut p = EventProperties::new();
    p.insert("generation".into(), generation.to_string());
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitness::SyntheticExecutor;
    use crate::selection::RankSelection;
    use chrono::TimeZone;
    use evoforge_common::{FitnessWeights, FixedClock, MemoryEventSink, StaticConfigSource};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn config(population_size: usize) -> EvolutionConfig {
        EvolutionConfig {
            population_size,
            ..Default::default()
        }
    }

    fn fast_evaluator() -> EvaluatorConfig {
        EvaluatorConfig {
            batch_pause: Duration::ZERO,
            ..Default::default()
        }
    }

    fn deps(config: EvolutionConfig, executor: SyntheticExecutor) -> EngineDeps {
        EngineDeps::new(Arc::new(StaticConfigSource::new(config)), Arc::new(executor))
            .with_evaluator(fast_evaluator())
            .with_seed(17)
    }

    fn engine_with(
        config: EvolutionConfig,
        backend: Arc<dyn PersistenceBackend>,
        events: Arc<dyn EventSink>,
    ) -> EvolutionEngine {
        EvolutionEngine::new(
            deps(config, SyntheticExecutor::new())
                .with_backend(backend)
                .with_events(events),
        )
        .unwrap()
    }

    /// Hands back whatever it holds, validated or not
    struct RawConfigSource(EvolutionConfig);

    impl ConfigurationSource for RawConfigSource {
        fn load(&self) -> Result<EvolutionConfig> {
            Ok(self.0.clone())
        }
    }

    /// Rank selection for the first `ok_calls` calls, then an error
    struct FailingSelection {
        calls: AtomicUsize,
        ok_calls: usize,
    }

    impl SelectionStrategy for FailingSelection {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn select(
            &self,
            population: &Population,
            count: usize,
            rng: &mut dyn RngCore,
        ) -> Result<Vec<Agent>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.ok_calls {
                return RankSelection.select(population, count, rng);
            }
            Err(EvolutionError::InsufficientPopulation {
                requested: count,
                available: 0,
            })
        }
    }

    #[tokio::test]
    async fn test_initialize_seeds_and_persists_population() {
        let backend = Arc::new(InMemoryBackend::new());
        let engine = engine_with(config(12), backend.clone(), Arc::new(MemoryEventSink::default()));
        engine.initialize().await.unwrap();

        let population = engine.current_population().unwrap();
        assert_eq!(population.size(), 12);
        assert_eq!(population.generation, 0);
        assert!(backend.load(POPULATION_KEY).await.unwrap().is_some());

        // A second engine on the same backend resumes the same population
        let resumed = engine_with(config(12), backend, Arc::new(MemoryEventSink::default()));
        resumed.initialize().await.unwrap();
        assert_eq!(resumed.current_population().unwrap().id, population.id);
    }

    #[tokio::test]
    async fn test_zero_generations_is_rejected() {
        let engine = engine_with(
            config(6),
            Arc::new(InMemoryBackend::new()),
            Arc::new(MemoryEventSink::default()),
        );
        let err = engine.evolve(0).await.unwrap_err();
        assert!(matches!(err, EvolutionError::InvalidArgument(_)));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_generations_capped_by_config() {
        let engine = engine_with(
            EvolutionConfig {
                population_size: 6,
                max_generations: 2,
                ..Default::default()
            },
            Arc::new(InMemoryBackend::new()),
            Arc::new(MemoryEventSink::default()),
        );
        engine.initialize().await.unwrap();
        let cycle = engine.evolve(5).await.unwrap();
        assert_eq!(cycle.generations_completed, 2);
        assert_eq!(cycle.population.generation, 2);
        assert_eq!(cycle.phase, CyclePhase::Completed);
    }

    #[tokio::test]
    async fn test_cycle_records_history_and_events() {
        let events = Arc::new(MemoryEventSink::default());
        let backend = Arc::new(InMemoryBackend::new());
        let engine = engine_with(config(10), backend.clone(), events.clone());
        engine.initialize().await.unwrap();

        let cycle = engine.evolve(3).await.unwrap();
        let history = engine.evolution_history();

        assert_eq!(history.cycles.len(), 1);
        assert_eq!(history.generations.len(), 3);
        assert_eq!(history.best_agents.len(), 3);
        assert!(history
            .milestones
            .iter()
            .any(|m| m.kind == MilestoneKind::NewBestFitness));
        assert_eq!(
            cycle.results.samples() + cycle.results.failed,
            3 * 10
        );
        assert_eq!(events.count(names::CYCLE_COMPLETED), 1);
        assert_eq!(events.count(names::MUTATION_OUTCOME), 3);
        assert_eq!(events.count(names::AGENT_ARCHIVED), 9);
        assert_eq!(engine.archive().len(), 9);
        assert!(backend.load(HISTORY_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_evolve_without_initialize_seeds_population() {
        let engine = engine_with(
            config(8),
            Arc::new(InMemoryBackend::new()),
            Arc::new(MemoryEventSink::default()),
        );
        let cycle = engine.evolve(1).await.unwrap();
        assert_eq!(cycle.generation, 0);
        assert_eq!(engine.current_population().unwrap().size(), 8);
    }

    #[tokio::test]
    async fn test_stop_when_idle_returns_immediately() {
        let engine = engine_with(
            config(6),
            Arc::new(InMemoryBackend::new()),
            Arc::new(MemoryEventSink::default()),
        );
        engine.stop_evolution().await;
        assert!(!engine.is_running());
        // A stale request must not cancel the next cycle
        let cycle = engine.evolve(2).await.unwrap();
        assert!(!cycle.cancelled);
        assert_eq!(cycle.generations_completed, 2);
    }

    #[tokio::test]
    async fn test_best_agent_accessors() {
        let engine = engine_with(
            config(12),
            Arc::new(InMemoryBackend::new()),
            Arc::new(MemoryEventSink::default()),
        );
        assert!(engine.best_agent().is_none());
        engine.initialize().await.unwrap();

        let best = engine.best_agent().unwrap();
        let population = engine.current_population().unwrap();
        assert!(population.members.iter().all(|m| m.overall() <= best.overall()));

        let debugger = engine.agent_by_variant(AgentVariant::Debugger).unwrap();
        assert_eq!(debugger.agent.variant, AgentVariant::Debugger);
    }

    #[tokio::test]
    async fn test_unvalidated_config_is_rejected() {
        let engine = EvolutionEngine::new(
            EngineDeps::new(
                Arc::new(RawConfigSource(EvolutionConfig {
                    population_size: 6,
                    crossover_rate: 1.5,
                    ..Default::default()
                })),
                Arc::new(SyntheticExecutor::new()),
            )
            .with_evaluator(fast_evaluator()),
        )
        .unwrap();

        let err = engine.initialize().await.unwrap_err();
        assert!(matches!(err, EvolutionError::Config(_)));
        let err = engine.evolve(1).await.unwrap_err();
        assert!(matches!(err, EvolutionError::Config(_)));
        assert!(!engine.is_running());
        assert!(engine.current_population().is_none());
    }

    #[test]
    fn test_invalid_fitness_weights_are_rejected() {
        let evaluator = EvaluatorConfig {
            weights: FitnessWeights {
                code_quality: 0.1,
                performance: 0.1,
                reliability: 0.1,
                user_satisfaction: 0.1,
                resource_efficiency: 0.1,
            },
            ..fast_evaluator()
        };
        let result =
            EvolutionEngine::new(deps(config(6), SyntheticExecutor::new()).with_evaluator(evaluator));
        assert!(matches!(result, Err(EvolutionError::Config(_))));
    }

    #[tokio::test]
    async fn test_failed_generation_aborts_and_keeps_last_commit() {
        let events = Arc::new(MemoryEventSink::default());
        let engine = EvolutionEngine::new(
            deps(config(8), SyntheticExecutor::new())
                .with_events(events.clone())
                .with_selection(Arc::new(FailingSelection {
                    calls: AtomicUsize::new(0),
                    ok_calls: 1,
                })),
        )
        .unwrap();
        engine.initialize().await.unwrap();

        let err = engine.evolve(3).await.unwrap_err();
        assert!(matches!(err, EvolutionError::CycleAborted { generation: 1, .. }));
        assert!(!engine.is_running());

        // Generation 0 -> 1 committed before the failure
        let population = engine.current_population().unwrap();
        assert_eq!(population.generation, 1);
        assert_eq!(population.size(), 8);

        let history = engine.evolution_history();
        assert!(history.cycles.is_empty());
        assert_eq!(history.generations.len(), 1);
        assert_eq!(events.count(names::CYCLE_ABORTED), 1);
        assert_eq!(events.count(names::CYCLE_COMPLETED), 0);
    }

    #[test]
    fn test_abort_stamps_end_time_and_phase() {
        let at = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let events = Arc::new(MemoryEventSink::default());
        let engine = EvolutionEngine::new(
            deps(config(6), SyntheticExecutor::new())
                .with_events(events.clone())
                .with_clock(Arc::new(FixedClock::new(at))),
        )
        .unwrap();

        let mut cycle = EvolutionCycle::new(Population::new(4, Vec::new()), at);
        cycle.transition(CyclePhase::Evaluation).unwrap();
        let err = engine.abort_cycle(&mut cycle, 4, EvolutionError::Internal("boom".into()));

        assert!(matches!(
            err,
            EvolutionError::CycleAborted { generation: 4, ref reason } if reason.contains("boom")
        ));
        assert_eq!(cycle.phase, CyclePhase::Aborted);
        assert_eq!(cycle.end_time, Some(at));
        assert_eq!(events.count(names::CYCLE_ABORTED), 1);

        // An error that is already an abort is passed through as-is
        let mut cycle = EvolutionCycle::new(Population::new(4, Vec::new()), at);
        let original = EvolutionError::CycleAborted {
            generation: 2,
            reason: "upstream".into(),
        };
        let err = engine.abort_cycle(&mut cycle, 4, original);
        assert!(matches!(err, EvolutionError::CycleAborted { generation: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_right_after_start_cancels_cycle() {
        let engine = Arc::new(
            EvolutionEngine::new(deps(
                config(6),
                SyntheticExecutor::new().with_latency(Duration::from_millis(10)),
            ))
            .unwrap(),
        );
        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.evolve(20).await })
        };
        while !engine.is_running() {
            tokio::task::yield_now().await;
        }

        engine.stop_evolution().await;
        assert!(!engine.is_running());

        let cycle = runner.await.unwrap().unwrap();
        assert!(cycle.cancelled);
        assert_eq!(cycle.generations_completed, 1);
    }

    #[test]
    fn test_breeding_pairs_odd_tail_with_first_parent() {
        let engine = engine_with(
            config(6),
            Arc::new(InMemoryBackend::new()),
            Arc::new(MemoryEventSink::default()),
        );
        let parents: Vec<Agent> = AgentVariant::ALL[..3]
            .iter()
            .map(|v| Agent::new(*v, Default::default(), 0))
            .collect();

        let mut rng = StdRng::seed_from_u64(1);
        let passed = engine.breed(&parents, 0.0, &mut rng);
        let ids: Vec<_> = passed.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![parents[0].id, parents[1].id, parents[2].id, parents[0].id]);

        let crossed = engine.breed(&parents, 1.0, &mut rng);
        assert_eq!(crossed.len(), 4);
        assert_eq!(crossed[2].metadata.parent_id, Some(parents[2].id));
        assert_eq!(crossed[2].metadata.co_parent_id, Some(parents[0].id));
    }
}
