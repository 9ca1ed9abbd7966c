//! Benchmark battery run against every agent

use serde_json::json;

use evoforge_common::{BenchmarkTask, FitnessComponent};

/// Tasks per fitness component in the standard battery
pub const TASKS_PER_COMPONENT: usize = 3;

/// Fixed set of benchmark tasks, grouped by the component they measure
#[derive(Debug, Clone)]
pub struct BenchmarkSuite {
    tasks: Vec<BenchmarkTask>,
}

impl BenchmarkSuite {
    pub fn new(tasks: Vec<BenchmarkTask>) -> Self {
        Self { tasks }
    }

    /// Three tasks for each of the five components
    pub fn standard() -> Self {
        use FitnessComponent::*;

        let tasks = vec![
            // Code quality
            BenchmarkTask::new(
                "quality/lint-clean",
                CodeQuality,
                "Produce a lint-clean change",
                json!({ "difficulty": 0.1, "language": "rust" }),
            ),
            BenchmarkTask::new(
                "quality/idiomatic",
                CodeQuality,
                "Rewrite a loop idiomatically",
                json!({ "difficulty": 0.3 }),
            ),
            BenchmarkTask::new(
                "quality/complexity",
                CodeQuality,
                "Reduce cyclomatic complexity of a function",
                json!({ "difficulty": 0.5 }),
            ),
            // Performance
            BenchmarkTask::new(
                "performance/small-edit",
                Performance,
                "Apply a single-line edit",
                json!({ "difficulty": 0.05, "size": "small" }),
            ),
            BenchmarkTask::new(
                "performance/module",
                Performance,
                "Process a medium-sized module",
                json!({ "difficulty": 0.2, "size": "medium" }),
            ),
            BenchmarkTask::new(
                "performance/workspace",
                Performance,
                "Process a multi-crate workspace",
                json!({ "difficulty": 0.4, "size": "large" }),
            ),
            // Reliability
            BenchmarkTask::new(
                "reliability/happy-path",
                Reliability,
                "Complete a well-specified task",
                json!({ "difficulty": 0.1 }),
            ),
            BenchmarkTask::new(
                "reliability/ambiguous",
                Reliability,
                "Complete an ambiguous task",
                json!({ "difficulty": 0.35 }),
            ),
            BenchmarkTask::new(
                "reliability/adversarial",
                Reliability,
                "Complete a task with misleading context",
                json!({ "difficulty": 0.55 }),
            ),
            // User satisfaction
            BenchmarkTask::new(
                "satisfaction/answer",
                UserSatisfaction,
                "Answer a factual question",
                json!({ "difficulty": 0.1, "question": "2 + 2" }),
            )
            .with_expected(json!(4)),
            BenchmarkTask::new(
                "satisfaction/format",
                UserSatisfaction,
                "Return the requested output format",
                json!({ "difficulty": 0.3, "format": "json" }),
            )
            .with_expected(json!({ "format": "json" })),
            BenchmarkTask::new(
                "satisfaction/open-ended",
                UserSatisfaction,
                "Suggest an improvement",
                json!({ "difficulty": 0.2 }),
            ),
            // Resource efficiency
            BenchmarkTask::new(
                "efficiency/idle",
                ResourceEfficiency,
                "Answer without loading context",
                json!({ "difficulty": 0.05 }),
            ),
            BenchmarkTask::new(
                "efficiency/context",
                ResourceEfficiency,
                "Load and summarise a file",
                json!({ "difficulty": 0.2 }),
            ),
            BenchmarkTask::new(
                "efficiency/bulk",
                ResourceEfficiency,
                "Index a large directory",
                json!({ "difficulty": 0.45 }),
            ),
        ];

        Self { tasks }
    }

    pub fn tasks(&self) -> &[BenchmarkTask] {
        &self.tasks
    }

    pub fn for_component(
        &self,
        component: FitnessComponent,
    ) -> impl Iterator<Item = &BenchmarkTask> + '_ {
        self.tasks.iter().filter(move |t| t.component == component)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for BenchmarkSuite {
    fn default() -> Self {
        Self::standard()
    }
}
