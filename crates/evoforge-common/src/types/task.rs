//! Benchmark tasks and their results

use serde::{Deserialize, Serialize};

use super::fitness::FitnessComponent;

/// A benchmark task handed to the agent execution capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkTask {
    pub id: String,
    /// Fitness dimension this task measures
    pub component: FitnessComponent,
    pub description: String,
    pub input: serde_json::Value,
    /// Expected output, when the task has a known answer
    pub expected_output: Option<serde_json::Value>,
}

impl BenchmarkTask {
    pub fn new(
        id: impl Into<String>,
        component: FitnessComponent,
        description: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            component,
            description: description.into(),
            input,
            expected_output: None,
        }
    }

    pub fn with_expected(mut self, expected: serde_json::Value) -> Self {
        self.expected_output = Some(expected);
        self
    }
}

/// Measurements attached to a task execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub execution_time_ms: u64,
    pub memory_used_bytes: u64,
    /// Self- or grader-reported quality in [0, 1]
    pub quality_score: Option<f64>,
}

/// Outcome of one task execution. Expected failures set `success = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metrics: TaskMetrics,
}

impl TaskResult {
    pub fn success(output: serde_json::Value, metrics: TaskMetrics) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            metrics,
        }
    }

    pub fn failure(error: impl Into<String>, metrics: TaskMetrics) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            metrics,
        }
    }

    /// Failure recorded when the per-task timeout elapsed
    pub fn timed_out(limit_ms: u64) -> Self {
        Self::failure(
            format!("timed out after {limit_ms}ms"),
            TaskMetrics {
                execution_time_ms: limit_ms,
                ..TaskMetrics::default()
            },
        )
    }
}
