//! Fitness calculation: per-task scores folded into component scores
//!
//! ```text
//! code quality        = mean(quality_score | 0.5)         failures score 0
//! performance         = mean(min(1, baseline / t))        failures score 0
//! reliability         = successes / attempts
//! user satisfaction   = mean(1 match | 0.5 mismatch | quality_score | 1)
//! resource efficiency = mean(1 - 0.5·m/B  if m ≤ B  else  0.5·B/m)
//! ```

use std::time::Duration;

use evoforge_common::{BenchmarkTask, FitnessComponent, TaskResult};

/// Quality assumed when a successful task reports none
pub const DEFAULT_QUALITY: f64 = 0.5;

/// Turns task results into scores in [0, 1]
#[derive(Debug, Clone, Copy)]
pub struct FitnessCalculator {
    baseline_ms: f64,
    memory_budget_bytes: f64,
}

impl FitnessCalculator {
    pub fn new(baseline: Duration, memory_budget_bytes: u64) -> Self {
        Self {
            baseline_ms: baseline.as_secs_f64() * 1000.0,
            memory_budget_bytes: memory_budget_bytes as f64,
        }
    }

    /// Fold one component's task results into its score
    pub fn component_score(
        &self,
        component: FitnessComponent,
        results: &[(&BenchmarkTask, TaskResult)],
    ) -> f64 {
        if results.is_empty() {
            return 0.0;
        }
        let n = results.len() as f64;

        let score = match component {
            FitnessComponent::Reliability => {
                results.iter().filter(|(_, r)| r.success).count() as f64 / n
            }
            _ => {
                results
                    .iter()
                    .map(|(task, result)| self.task_score(component, task, result))
                    .sum::<f64>()
                    / n
            }
        };
        score.clamp(0.0, 1.0)
    }

    /// Score of a single task for `component`. Failed tasks always score 0.
    pub fn task_score(
        &self,
        component: FitnessComponent,
        task: &BenchmarkTask,
        result: &TaskResult,
    ) -> f64 {
        if !result.success {
            return 0.0;
        }
        match component {
            FitnessComponent::CodeQuality => Self::quality(result).unwrap_or(DEFAULT_QUALITY),
            FitnessComponent::Performance => self.performance(result),
            FitnessComponent::Reliability => 1.0,
            FitnessComponent::UserSatisfaction => Self::satisfaction(task, result),
            FitnessComponent::ResourceEfficiency => self.efficiency(result),
        }
    }

    fn quality(result: &TaskResult) -> Option<f64> {
        result
            .metrics
            .quality_score
            .filter(|q| !q.is_nan())
            .map(|q| q.clamp(0.0, 1.0))
    }

    fn performance(&self, result: &TaskResult) -> f64 {
        let t = result.metrics.execution_time_ms as f64;
        if t <= self.baseline_ms {
            1.0
        } else {
            self.baseline_ms / t
        }
    }

    fn satisfaction(task: &BenchmarkTask, result: &TaskResult) -> f64 {
        match &task.expected_output {
            Some(expected) if result.output.as_ref() == Some(expected) => 1.0,
            Some(_) => 0.5,
            None => Self::quality(result).unwrap_or(1.0),
        }
    }

    fn efficiency(&self, result: &TaskResult) -> f64 {
        let m = result.metrics.memory_used_bytes as f64;
        let budget = self.memory_budget_bytes;
        if budget <= 0.0 {
            return if m == 0.0 { 1.0 } else { 0.0 };
        }
        if m <= budget {
            1.0 - 0.5 * m / budget
        } else {
            0.5 * budget / m
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoforge_common::TaskMetrics;
    use serde_json::json;

    fn calculator() -> FitnessCalculator {
        FitnessCalculator::new(Duration::from_secs(1), 1000)
    }

    fn ok(time_ms: u64, memory: u64, quality: Option<f64>) -> TaskResult {
        TaskResult::success(
            json!("done"),
            TaskMetrics {
                execution_time_ms: time_ms,
                memory_used_bytes: memory,
                quality_score: quality,
            },
        )
    }

    fn task(component: FitnessComponent) -> BenchmarkTask {
        BenchmarkTask::new("t", component, "test", json!({}))
    }

    #[test]
    fn test_performance_relative_to_baseline() {
        let calc = calculator();
        let t = task(FitnessComponent::Performance);
        assert_eq!(calc.task_score(FitnessComponent::Performance, &t, &ok(800, 0, None)), 1.0);
        assert_eq!(calc.task_score(FitnessComponent::Performance, &t, &ok(2000, 0, None)), 0.5);
    }

    #[test]
    fn test_resource_efficiency_curve() {
        let calc = calculator();
        let t = task(FitnessComponent::ResourceEfficiency);
        let c = FitnessComponent::ResourceEfficiency;
        assert_eq!(calc.task_score(c, &t, &ok(0, 0, None)), 1.0);
        assert_eq!(calc.task_score(c, &t, &ok(0, 1000, None)), 0.5);
        assert_eq!(calc.task_score(c, &t, &ok(0, 4000, None)), 0.125);
    }

    #[test]
    fn test_user_satisfaction_rules() {
        let calc = calculator();
        let c = FitnessComponent::UserSatisfaction;
        let expected = task(c).with_expected(json!("done"));
        let other = task(c).with_expected(json!("other"));
        let open = task(c);

        assert_eq!(calc.task_score(c, &expected, &ok(0, 0, None)), 1.0);
        assert_eq!(calc.task_score(c, &other, &ok(0, 0, None)), 0.5);
        assert_eq!(calc.task_score(c, &open, &ok(0, 0, Some(0.7))), 0.7);
        assert_eq!(calc.task_score(c, &open, &ok(0, 0, None)), 1.0);
    }

    #[test]
    fn test_component_means_and_reliability() {
        let calc = calculator();
        let t = task(FitnessComponent::CodeQuality);
        let results = vec![
            (&t, ok(0, 0, Some(0.9))),
            (&t, ok(0, 0, None)),
            (&t, TaskResult::failure("boom", TaskMetrics::default())),
        ];
        let quality = calc.component_score(FitnessComponent::CodeQuality, &results);
        assert!((quality - (0.9 + 0.5) / 3.0).abs() < 1e-12);

        let reliability = calc.component_score(FitnessComponent::Reliability, &results);
        assert!((reliability - 2.0 / 3.0).abs() < 1e-12);
    }
}
