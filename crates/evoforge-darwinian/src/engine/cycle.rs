//! Evolution cycle state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use evoforge_common::{CycleId, EvolutionError, Mutation, Population, Result};

/// Deltas within this band count as unchanged
pub const DELTA_EPSILON: f64 = 1e-6;

/// Phase of an evolution cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Initialization,
    Evaluation,
    Selection,
    Crossover,
    Mutation,
    Replacement,
    Completed,
    /// Error exit, reachable from any non-terminal phase
    Aborted,
}

impl CyclePhase {
    /// Legal moves:
    ///
    /// ```text
    /// Initialization -> Evaluation -> Selection -> Crossover -> Mutation -> Replacement
    /// Replacement -> Evaluation | Completed
    /// any non-terminal -> Aborted
    /// ```
    pub fn can_transition_to(self, next: CyclePhase) -> bool {
        use CyclePhase::*;
        match (self, next) {
            (Completed | Aborted, _) => false,
            (_, Aborted) => true,
            (Initialization, Evaluation)
            | (Evaluation, Selection)
            | (Selection, Crossover)
            | (Crossover, Mutation)
            | (Mutation, Replacement)
            | (Replacement, Evaluation)
            | (Replacement, Completed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CyclePhase::Completed | CyclePhase::Aborted)
    }
}

/// Per-cycle outcome counters, built from before/after fitness per agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleResults {
    pub improved: usize,
    pub degraded: usize,
    pub unchanged: usize,
    /// Evaluations that fell back to the minimal score
    pub failed: usize,
    /// Mean of every recorded delta
    pub average_fitness_change: f64,
    pub mutations_attempted: u64,
    pub mutations_successful: u64,
}

impl CycleResults {
    /// Classify one agent's change across an evaluation
    pub fn record_delta(&mut self, before: f64, after: f64) {
        let delta = after - before;
        if delta > DELTA_EPSILON {
            self.improved += 1;
        } else if delta < -DELTA_EPSILON {
            self.degraded += 1;
        } else {
            self.unchanged += 1;
        }
        let n = self.samples() as f64;
        self.average_fitness_change += (delta - self.average_fitness_change) / n;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Deltas recorded so far
    pub fn samples(&self) -> usize {
        self.improved + self.degraded + self.unchanged
    }
}

/// One call to `evolve`, covering one or more generations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionCycle {
    pub id: CycleId,
    /// Population generation when the cycle started
    pub generation: u64,
    pub generations_completed: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub phase: CyclePhase,
    /// Last committed population
    pub population: Population,
    pub mutations: Vec<Mutation>,
    pub results: CycleResults,
    pub cancelled: bool,
    pub converged: bool,
}

impl EvolutionCycle {
    pub fn new(population: Population, start_time: DateTime<Utc>) -> Self {
        Self {
            id: CycleId::new(),
            generation: population.generation,
            generations_completed: 0,
            start_time,
            end_time: None,
            phase: CyclePhase::Initialization,
            population,
            mutations: Vec::new(),
            results: CycleResults::default(),
            cancelled: false,
            converged: false,
        }
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: CyclePhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(EvolutionError::Internal(format!(
                "illegal cycle transition {:?} -> {:?}",
                self.phase, next
            )));
        }
        self.phase = next;
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(CyclePhase::Completed)?;
        self.end_time = Some(now);
        Ok(())
    }

    /// Error exit; the population field keeps the last committed generation
    pub fn abort(&mut self, now: DateTime<Utc>) {
        self.phase = CyclePhase::Aborted;
        self.end_time = Some(now);
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle() -> EvolutionCycle {
        EvolutionCycle::new(Population::new(3, Vec::new()), Utc::now())
    }

    #[test]
    fn test_phase_order_is_strict() {
        use CyclePhase::*;
        let order = [Evaluation, Selection, Crossover, Mutation, Replacement];

        let mut c = cycle();
        for _ in 0..2 {
            for phase in order {
                c.transition(phase).unwrap();
            }
        }
        assert!(c.transition(Selection).is_err());
        c.complete(Utc::now()).unwrap();
        assert!(c.phase.is_terminal());
        assert!(c.end_time.is_some());
        assert!(c.transition(Evaluation).is_err());
    }

    #[test]
    fn test_no_phase_skipping() {
        use CyclePhase::*;
        assert!(!Initialization.can_transition_to(Selection));
        assert!(!Evaluation.can_transition_to(Crossover));
        assert!(!Mutation.can_transition_to(Completed));
        assert!(Selection.can_transition_to(Aborted));
        assert!(!Aborted.can_transition_to(Aborted));
    }

    #[test]
    fn test_abort_stamps_end_time() {
        let mut c = cycle();
        c.transition(CyclePhase::Evaluation).unwrap();
        c.abort(Utc::now());
        assert_eq!(c.phase, CyclePhase::Aborted);
        assert!(c.duration_ms().is_some());
        assert_eq!(c.generation, 3);
    }

    #[test]
    fn test_results_from_deltas() {
        let mut r = CycleResults::default();
        r.record_delta(0.5, 0.6);
        r.record_delta(0.5, 0.4);
        r.record_delta(0.5, 0.5 + 1e-9);
        r.record_failure();

        assert_eq!((r.improved, r.degraded, r.unchanged, r.failed), (1, 1, 1, 1));
        assert!(r.average_fitness_change.abs() < 1e-6);
    }
}
