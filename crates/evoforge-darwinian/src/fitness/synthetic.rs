//! Deterministic executor for dry runs and tests
//!
//! Results are a pure function of the agent's capabilities and the task, so
//! evaluating the same agent twice always yields the same fitness.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use evoforge_common::{
    Agent, AgentExecutor, BenchmarkTask, Capability, ExecutionError, TaskMetrics, TaskResult,
};

/// Memory attributed to each capability
const BYTES_PER_CAPABILITY: u64 = 8 * 1024 * 1024;

/// Executor that derives task outcomes from capability descriptors
#[derive(Debug, Clone, Default)]
pub struct SyntheticExecutor {
    latency: Option<Duration>,
}

impl SyntheticExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `latency` before every task
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Strength in [0, 1): grows with the number and maturity of capabilities
    pub fn strength(agent: &Agent) -> f64 {
        let total: f64 = agent.capabilities.iter().map(Self::capability_weight).sum();
        1.0 - 1.0 / (1.0 + total)
    }

    fn capability_weight(capability: &Capability) -> f64 {
        let v = capability.version;
        0.3 + 0.05 * v.major.saturating_sub(1) as f64
            + 0.02 * v.minor as f64
            + 0.01 * v.patch as f64
    }
}

#[async_trait]
impl AgentExecutor for SyntheticExecutor {
    async fn execute(
        &self,
        agent: &Agent,
        task: &BenchmarkTask,
    ) -> Result<TaskResult, ExecutionError> {
        if !agent.state.active {
            return Err(ExecutionError::NotExecutable(agent.id));
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let strength = Self::strength(agent);
        let difficulty = task
            .input
            .get("difficulty")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        let metrics = TaskMetrics {
            execution_time_ms: 200 + (1600.0 * (1.0 - strength)) as u64,
            memory_used_bytes: BYTES_PER_CAPABILITY * agent.capabilities.len() as u64,
            quality_score: Some(strength),
        };

        if strength < difficulty {
            return Ok(TaskResult::failure(
                format!("task {} exceeds agent strength {strength:.2}", task.id),
                metrics,
            ));
        }

        let output = match &task.expected_output {
            Some(expected) if strength >= 0.5 => expected.clone(),
            _ => task.input.clone(),
        };
        Ok(TaskResult::success(output, metrics))
    }
}
