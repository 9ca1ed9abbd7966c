//! Population statistics
//!
//! ```text
//! diversity   = H(variant distribution) / ln(|variants|)
//! convergence = 1 - stddev / range      (1 when range is 0)
//! ```

use std::collections::HashMap;

use evoforge_common::{AgentVariant, PopulationMember, PopulationStatistics};

/// Aggregate statistics over `members`
pub fn calculate_statistics(
    members: &[PopulationMember],
    mutation_success_rate: f64,
) -> PopulationStatistics {
    if members.is_empty() {
        return PopulationStatistics {
            mutation_success_rate,
            ..PopulationStatistics::default()
        };
    }

    let values: Vec<f64> = members.iter().map(PopulationMember::overall).collect();
    let n = values.len() as f64;
    let average = values.iter().sum::<f64>() / n;
    let best = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let worst = values.iter().copied().fold(f64::INFINITY, f64::min);

    let range = best - worst;
    let convergence = if range <= 0.0 {
        1.0
    } else {
        (1.0 - variance(&values).sqrt() / range).clamp(0.0, 1.0)
    };

    PopulationStatistics {
        size: members.len(),
        average_fitness: average,
        best_fitness: best,
        worst_fitness: worst,
        diversity: diversity(members),
        convergence,
        mutation_success_rate,
    }
}

/// Normalised Shannon entropy of the variant distribution, in [0, 1]
pub fn diversity(members: &[PopulationMember]) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<AgentVariant, usize> = HashMap::new();
    for member in members {
        *counts.entry(member.agent.variant).or_default() += 1;
    }

    let n = members.len() as f64;
    let entropy: f64 = counts
        .values()
        .map(|c| {
            let p = *c as f64 / n;
            -p * p.ln()
        })
        .sum();

    (entropy / (AgentVariant::ALL.len() as f64).ln()).clamp(0.0, 1.0)
}

/// Population variance, 0 for fewer than two values
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}
