//! Agent execution capability
//!
//! Supplied by the host. The engine never knows how an agent actually runs.

use async_trait::async_trait;

use crate::error::ExecutionError;
use crate::types::agent::Agent;
use crate::types::task::{BenchmarkTask, TaskResult};

/// Runs a benchmark task on behalf of an agent.
///
/// Expected failures must come back as `Ok(TaskResult { success: false, .. })`.
/// `Err` is reserved for the executor itself breaking.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(
        &self,
        agent: &Agent,
        task: &BenchmarkTask,
    ) -> Result<TaskResult, ExecutionError>;
}
