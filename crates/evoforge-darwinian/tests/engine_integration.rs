//! End-to-end engine scenarios against the synthetic executor

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evoforge_archive::{ArchiveConfig, ArchiveQuery, ArchiveStore};
use evoforge_common::events::names;
use evoforge_common::{
    rank_order, Agent, AgentExecutor, AgentId, BenchmarkTask, EvolutionConfig, EvolutionError,
    ExecutionError, InMemoryBackend, MemoryEventSink, PersistenceBackend, Population,
    StaticConfigSource, TaskResult,
};
use evoforge_darwinian::{
    CyclePhase, EngineDeps, EvaluatorConfig, EvolutionEngine, FitnessEvaluator,
    PrometheusEventSink, SchedulePriority, SelectionStrategy, SyntheticExecutor,
    TournamentSelection,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn evaluator_config() -> EvaluatorConfig {
    EvaluatorConfig {
        batch_pause: Duration::ZERO,
        ..Default::default()
    }
}

fn engine(config: EvolutionConfig, executor: Arc<dyn AgentExecutor>) -> EvolutionEngine {
    engine_on(config, executor, Arc::new(InMemoryBackend::new()))
}

fn engine_on(
    config: EvolutionConfig,
    executor: Arc<dyn AgentExecutor>,
    backend: Arc<dyn PersistenceBackend>,
) -> EvolutionEngine {
    init_tracing();
    EvolutionEngine::new(
        EngineDeps::new(Arc::new(StaticConfigSource::new(config)), executor)
            .with_backend(backend)
            .with_events(Arc::new(MemoryEventSink::default()))
            .with_evaluator(evaluator_config())
            .with_seed(2024),
    )
    .unwrap()
}

fn synthetic() -> Arc<dyn AgentExecutor> {
    Arc::new(SyntheticExecutor::new())
}

/// Top `count` members after scoring with a standalone evaluator
async fn expected_elites(population: &Population, count: usize) -> Vec<(AgentId, f64)> {
    let evaluator = FitnessEvaluator::new(evaluator_config(), synthetic()).unwrap();
    let agents: Vec<Agent> = population.agents().cloned().collect();
    let evaluations = evaluator.evaluate_batch(&agents).await;

    let mut scored = population.clone();
    for (member, evaluation) in scored.members.iter_mut().zip(evaluations) {
        member.set_fitness(evaluation.score);
    }
    scored.members.sort_by(rank_order);
    scored
        .members
        .iter()
        .take(count)
        .map(|m| (m.id(), m.overall()))
        .collect()
}

#[tokio::test]
async fn test_population_size_is_preserved() {
    let config = EvolutionConfig {
        population_size: 14,
        convergence_threshold: 0.0,
        ..Default::default()
    };
    let engine = engine(config, synthetic());
    engine.initialize().await.unwrap();

    for expected_generation in 1..=6 {
        let cycle = engine.evolve(1).await.unwrap();
        let population = engine.current_population().unwrap();
        assert_eq!(population.size(), 14);
        assert_eq!(population.statistics.size, 14);
        assert_eq!(population.generation, expected_generation);
        assert_eq!(cycle.population.id, population.id);
        assert_eq!(cycle.phase, CyclePhase::Completed);
    }
}

#[tokio::test]
async fn test_elites_survive_unchanged() {
    let config = EvolutionConfig {
        population_size: 20,
        elitism_rate: 0.2,
        mutation_rate: 0.5,
        convergence_threshold: 0.0,
        ..Default::default()
    };
    let elite_count = config.elite_count();
    let engine = engine(config, synthetic());
    engine.initialize().await.unwrap();

    for _ in 0..5 {
        let before = engine.current_population().unwrap();
        let elites = expected_elites(&before, elite_count).await;

        engine.evolve(1).await.unwrap();
        let after = engine.current_population().unwrap();

        for (id, fitness) in elites {
            let member = after.get(&id).expect("elite carried over");
            assert!(member.is_elite);
            assert!((member.overall() - fitness).abs() < 1e-12);
        }
    }
}

#[tokio::test]
async fn test_single_elite_and_stable_capabilities_without_mutation() {
    let config = EvolutionConfig {
        population_size: 10,
        elitism_rate: 0.1,
        mutation_rate: 0.0,
        convergence_threshold: 0.0,
        ..Default::default()
    };
    let engine = engine(config, synthetic());
    engine.initialize().await.unwrap();

    let mut seen: HashMap<AgentId, Vec<String>> = HashMap::new();
    for _ in 0..10 {
        let cycle = engine.evolve(1).await.unwrap();
        assert_eq!(cycle.results.mutations_attempted, 0);
        assert!(cycle.mutations.is_empty());

        let population = engine.current_population().unwrap();
        assert_eq!(population.members.iter().filter(|m| m.is_elite).count(), 1);

        for member in &population.members {
            let names: Vec<String> = member
                .agent
                .capability_names()
                .into_iter()
                .map(str::to_string)
                .collect();
            if let Some(previous) = seen.get(&member.id()) {
                assert_eq!(previous, &names, "capabilities of {} changed", member.id());
            }
            seen.insert(member.id(), names);
        }
    }
}

#[tokio::test]
async fn test_concurrent_evolve_is_rejected() {
    let executor = Arc::new(SyntheticExecutor::new().with_latency(Duration::from_millis(5)));
    let engine = engine(
        EvolutionConfig {
            population_size: 6,
            ..Default::default()
        },
        executor,
    );
    engine.initialize().await.unwrap();

    let (first, second) = tokio::join!(engine.evolve(1), engine.evolve(1));

    let cycle = first.unwrap();
    assert_eq!(cycle.phase, CyclePhase::Completed);
    assert_eq!(cycle.generations_completed, 1);
    assert!(matches!(second, Err(EvolutionError::AlreadyRunning)));
    assert!(!engine.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_stop_evolution_waits_for_generation_boundary() {
    let executor = Arc::new(SyntheticExecutor::new().with_latency(Duration::from_millis(20)));
    let engine = Arc::new(engine(
        EvolutionConfig {
            population_size: 6,
            convergence_threshold: 0.0,
            ..Default::default()
        },
        executor,
    ));
    engine.initialize().await.unwrap();

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.evolve(50).await })
    };
    while !engine.is_running() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    engine.stop_evolution().await;
    assert!(!engine.is_running());

    let cycle = runner.await.unwrap().unwrap();
    assert!(cycle.cancelled);
    assert_eq!(cycle.phase, CyclePhase::Completed);
    assert!(cycle.generations_completed >= 1);
    assert!(cycle.generations_completed < 50);
    assert_eq!(
        engine.current_population().unwrap().generation,
        u64::from(cycle.generations_completed)
    );
}

#[tokio::test]
async fn test_archive_round_trip() {
    let backend: Arc<dyn PersistenceBackend> = Arc::new(InMemoryBackend::new());
    let engine = engine_on(
        EvolutionConfig {
            population_size: 12,
            archive_top_k: 2,
            ..Default::default()
        },
        synthetic(),
        backend.clone(),
    );
    engine.initialize().await.unwrap();
    engine.evolve(3).await.unwrap();

    let archive = engine.archive();
    assert_eq!(archive.len(), 6);

    let best = archive.get_best_agents(1).remove(0);
    let agent = &best.agent_snapshot.agent;
    assert_eq!(best.agent_snapshot.serialized, serde_json::to_string(agent).unwrap());
    assert!(best.agent_snapshot.verify());

    let by_variant = archive.search(&ArchiveQuery::new().variant(agent.variant).limit(100));
    assert!(by_variant.entries.iter().any(|e| e.id == best.id));

    let tagged = archive.search(&ArchiveQuery::new().tag(agent.variant.as_str()).limit(100));
    assert!(tagged.entries.iter().any(|e| e.id == best.id));

    let reopened = ArchiveStore::open(ArchiveConfig::default(), backend).await;
    assert_eq!(reopened.len(), 6);
    assert_eq!(reopened.get_entry(&best.id), Some(best));
}

#[tokio::test]
async fn test_history_survives_restart() {
    let backend: Arc<dyn PersistenceBackend> = Arc::new(InMemoryBackend::new());
    let config = EvolutionConfig {
        population_size: 8,
        ..Default::default()
    };

    let first = engine_on(config.clone(), synthetic(), backend.clone());
    first.initialize().await.unwrap();
    first.evolve(2).await.unwrap();
    let population = first.current_population().unwrap();

    let second = engine_on(config, synthetic(), backend);
    second.initialize().await.unwrap();
    assert_eq!(second.evolution_history(), first.evolution_history());
    assert_eq!(second.current_population().unwrap(), population);

    let cycle = second.evolve(1).await.unwrap();
    assert_eq!(cycle.generation, 2);
    assert_eq!(second.evolution_history().cycles.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_evolution_runs_once() {
    let engine = Arc::new(engine(
        EvolutionConfig {
            population_size: 6,
            ..Default::default()
        },
        synthetic(),
    ));
    engine.initialize().await.unwrap();

    engine.schedule_evolution(SchedulePriority::Normal);
    engine.schedule_evolution(SchedulePriority::Critical);
    assert!(engine.has_pending_schedule());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    while engine.is_running() || engine.evolution_history().cycles.is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!engine.has_pending_schedule());

    tokio::time::sleep(SchedulePriority::Normal.delay() * 2).await;
    assert_eq!(engine.evolution_history().cycles.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_schedule_never_runs() {
    let engine = Arc::new(engine(
        EvolutionConfig {
            population_size: 6,
            ..Default::default()
        },
        synthetic(),
    ));
    engine.schedule_evolution(SchedulePriority::Low);
    assert!(engine.cancel_scheduled());

    tokio::time::sleep(SchedulePriority::Low.delay() * 2).await;
    assert!(engine.evolution_history().cycles.is_empty());
    assert!(engine.current_population().is_none());
}

struct BrokenExecutor;

#[async_trait]
impl AgentExecutor for BrokenExecutor {
    async fn execute(
        &self,
        _agent: &Agent,
        _task: &BenchmarkTask,
    ) -> Result<TaskResult, ExecutionError> {
        Err(ExecutionError::Unavailable("sandbox offline".into()))
    }
}

#[tokio::test]
async fn test_broken_executor_degrades_to_fallback() {
    let engine = engine(
        EvolutionConfig {
            population_size: 8,
            ..Default::default()
        },
        Arc::new(BrokenExecutor),
    );
    engine.initialize().await.unwrap();

    let cycle = engine.evolve(1).await.unwrap();
    assert_eq!(cycle.results.failed, 8);
    assert_eq!(cycle.results.samples(), 0);
    assert_eq!(engine.current_population().unwrap().size(), 8);
}

#[tokio::test]
async fn test_prometheus_sink_counts_cycles() {
    let sink = Arc::new(PrometheusEventSink::new().unwrap());
    let engine = EvolutionEngine::new(
        EngineDeps::new(
            Arc::new(StaticConfigSource::new(EvolutionConfig {
                population_size: 6,
                ..Default::default()
            })),
            synthetic(),
        )
        .with_events(sink.clone())
        .with_evaluator(evaluator_config()),
    )
    .unwrap();
    engine.initialize().await.unwrap();
    engine.evolve(2).await.unwrap();

    let cycles = sink
        .events_total
        .with_label_values(&[names::CYCLE_COMPLETED])
        .get();
    let mutations = sink
        .events_total
        .with_label_values(&[names::MUTATION_OUTCOME])
        .get();
    assert_eq!(cycles, 1);
    assert_eq!(mutations, 2);
}

#[tokio::test]
async fn test_tournament_returns_population_members() {
    let engine = engine(
        EvolutionConfig {
            population_size: 20,
            ..Default::default()
        },
        synthetic(),
    );
    engine.initialize().await.unwrap();
    let population = engine.current_population().unwrap();

    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..100 {
        let picked = TournamentSelection.select(&population, 5, &mut rng).unwrap();
        assert_eq!(picked.len(), 5);
        assert!(picked.iter().all(|a| population.contains(&a.id)));
    }
}
