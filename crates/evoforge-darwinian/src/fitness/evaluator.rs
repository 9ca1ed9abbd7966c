//! Fitness evaluation against the benchmark battery
//!
//! Per-task and per-component failures degrade the score instead of failing
//! the evaluation. Only a total failure produces the flagged fallback score.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use evoforge_common::{
    Agent, AgentExecutor, AgentId, BenchmarkTask, Clock, EvolutionError, FitnessComponent,
    FitnessComponents, FitnessProvenance, FitnessScore, FitnessWeights, Result, SystemClock,
    TaskResult,
};

use super::benchmarks::BenchmarkSuite;
use super::calculator::FitnessCalculator;

/// Evaluator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    pub weights: FitnessWeights,
    /// Agents evaluated concurrently per batch
    pub batch_size: usize,
    /// Pause between batches
    pub batch_pause: Duration,
    /// Upper bound on a single executor call
    pub task_timeout: Duration,
    /// Execution time that still earns a full performance score
    pub baseline_duration: Duration,
    pub memory_budget_bytes: u64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            weights: FitnessWeights::default(),
            batch_size: 5,
            batch_pause: Duration::from_millis(100),
            task_timeout: Duration::from_secs(5),
            baseline_duration: Duration::from_secs(1),
            memory_budget_bytes: 64 * 1024 * 1024,
        }
    }
}

impl EvaluatorConfig {
    /// Load overrides from `EVOFORGE_EVALUATOR_*` variables
    pub fn from_env() -> Self {
        Self::from_env_prefix("EVOFORGE_EVALUATOR")
    }

    /// Load overrides from `{prefix}_*` variables
    pub fn from_env_prefix(prefix: &str) -> Self {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let var = |name: &str| std::env::var(format!("{prefix}_{name}"));
        let mut cfg = Self::default();

        if let Ok(val) = var("BATCH_SIZE") {
            if let Ok(v) = val.parse::<usize>() {
                cfg.batch_size = v.max(1);
            }
        }
        if let Ok(val) = var("BATCH_PAUSE_MS") {
            if let Ok(v) = val.parse() {
                cfg.batch_pause = Duration::from_millis(v);
            }
        }
        if let Ok(val) = var("TASK_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                cfg.task_timeout = Duration::from_millis(v);
            }
        }
        if let Ok(val) = var("MEMORY_BUDGET_BYTES") {
            if let Ok(v) = val.parse() {
                cfg.memory_budget_bytes = v;
            }
        }

        cfg
    }
}

/// Outcome of evaluating one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub agent_id: AgentId,
    pub score: FitnessScore,
    pub tasks_run: usize,
    pub task_failures: usize,
    /// Components whose executor calls errored and were scored 0
    pub failed_components: Vec<FitnessComponent>,
}

struct ComponentOutcome {
    score: f64,
    tasks_run: usize,
    task_failures: usize,
}

/// Scores agents by running the benchmark battery through the executor
pub struct FitnessEvaluator {
    config: EvaluatorConfig,
    executor: Arc<dyn AgentExecutor>,
    suite: BenchmarkSuite,
    calculator: FitnessCalculator,
    clock: Arc<dyn Clock>,
}

impl FitnessEvaluator {
    /// Fails with `Config` when the weights are negative or do not sum to 1.0
    pub fn new(config: EvaluatorConfig, executor: Arc<dyn AgentExecutor>) -> Result<Self> {
        config.weights.validate()?;
        let calculator = FitnessCalculator::new(config.baseline_duration, config.memory_budget_bytes);
        Ok(Self {
            config,
            executor,
            suite: BenchmarkSuite::standard(),
            calculator,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the benchmark battery
    pub fn with_suite(mut self, suite: BenchmarkSuite) -> Self {
        self.suite = suite;
        self
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluate one agent across every component
    #[instrument(skip(self, agent), fields(agent_id = %agent.id))]
    pub async fn evaluate(&self, agent: &Agent) -> Evaluation {
        let mut components = FitnessComponents::uniform(0.0);
        let mut failed_components = Vec::new();
        let mut tasks_run = 0;
        let mut task_failures = 0;

        for component in FitnessComponent::ALL {
            match self.evaluate_component(agent, component).await {
                Ok(outcome) => {
                    components.set(component, outcome.score);
                    tasks_run += outcome.tasks_run;
                    task_failures += outcome.task_failures;
                }
                Err(e) => {
                    warn!(component = %component, error = %e, "Component evaluation failed, scoring 0");
                    failed_components.push(component);
                }
            }
        }

        let score = if failed_components.len() == FitnessComponent::ALL.len() {
            warn!("Every component failed, using fallback fitness");
            FitnessScore::fallback()
        } else {
            FitnessScore::from_components(
                components,
                &self.config.weights,
                FitnessProvenance::Evaluated,
            )
        }
        .stamped(self.clock.now());

        debug!(fitness = score.overall(), tasks_run, task_failures, "Agent evaluated");

        Evaluation {
            agent_id: agent.id,
            score,
            tasks_run,
            task_failures,
            failed_components,
        }
    }

    async fn evaluate_component(
        &self,
        agent: &Agent,
        component: FitnessComponent,
    ) -> Result<ComponentOutcome> {
        let mut results: Vec<(&BenchmarkTask, TaskResult)> = Vec::new();

        for task in self.suite.for_component(component) {
            let result = self.run_task(agent, task).await?;
            results.push((task, result));
        }

        Ok(ComponentOutcome {
            score: self.calculator.component_score(component, &results),
            tasks_run: results.len(),
            task_failures: results.iter().filter(|(_, r)| !r.success).count(),
        })
    }

    async fn run_task(&self, agent: &Agent, task: &BenchmarkTask) -> Result<TaskResult> {
        match tokio::time::timeout(self.config.task_timeout, self.executor.execute(agent, task))
            .await
        {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(EvolutionError::EvaluationFailure {
                agent_id: agent.id,
                reason: format!("task {}: {e}", task.id),
            }),
            Err(_) => {
                debug!(task = %task.id, "Task timed out");
                Ok(TaskResult::timed_out(self.config.task_timeout.as_millis() as u64))
            }
        }
    }

    /// Evaluate agents in concurrent batches of `batch_size`, pausing between
    /// batches. Results are returned in input order.
    pub async fn evaluate_batch(&self, agents: &[Agent]) -> Vec<Evaluation> {
        let mut evaluations = Vec::with_capacity(agents.len());

        for (i, chunk) in agents.chunks(self.config.batch_size.max(1)).enumerate() {
            if i > 0 && !self.config.batch_pause.is_zero() {
                tokio::time::sleep(self.config.batch_pause).await;
            }
            evaluations.extend(join_all(chunk.iter().map(|agent| self.evaluate(agent))).await);
        }

        evaluations
    }
}
