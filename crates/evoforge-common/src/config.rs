//! Evolution configuration and the configuration source contract
//!
//! Configuration is read once at the start of every cycle; edits made while a
//! cycle runs only apply to the next one.

use serde::{Deserialize, Serialize};

use crate::error::{EvolutionError, Result};

/// Parent selection algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    Tournament,
    RouletteWheel,
    Rank,
}

impl std::str::FromStr for SelectionMethod {
    type Err = EvolutionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tournament" => Ok(SelectionMethod::Tournament),
            "roulette" | "roulette_wheel" | "roulette-wheel" => Ok(SelectionMethod::RouletteWheel),
            "rank" => Ok(SelectionMethod::Rank),
            other => Err(EvolutionError::Config(format!(
                "unknown selection strategy: {other}"
            ))),
        }
    }
}

/// Evolution engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Target population size
    pub population_size: usize,
    /// Probability that an offspring is mutated
    pub mutation_rate: f64,
    /// Probability that a parent pair is crossed over
    pub crossover_rate: f64,
    /// Fraction of the population carried over verbatim
    pub elitism_rate: f64,
    pub selection_strategy: SelectionMethod,
    /// Upper bound on generations per `evolve` call
    pub max_generations: u32,
    /// Early stop when average-fitness variance over the last 10 generations drops below this
    pub convergence_threshold: f64,
    /// Diversity at or below this triggers re-seeding of the weakest members
    pub diversity_threshold: f64,
    /// Non-elite members at or past this age are retired
    pub max_agent_age: u32,
    /// Top performers archived after each generation
    pub archive_top_k: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 20,
            mutation_rate: 0.1,
            crossover_rate: 0.7,
            elitism_rate: 0.1,
            selection_strategy: SelectionMethod::Tournament,
            max_generations: 100,
            convergence_threshold: 1e-4,
            diversity_threshold: 0.3,
            max_agent_age: 10,
            archive_top_k: 3,
        }
    }
}

impl EvolutionConfig {
    /// Check ranges before a cycle starts
    pub fn validate(&self) -> Result<()> {
        if self.population_size < 2 {
            return Err(EvolutionError::Config(format!(
                "population_size must be at least 2, got {}",
                self.population_size
            )));
        }
        for (name, rate) in [
            ("mutation_rate", self.mutation_rate),
            ("crossover_rate", self.crossover_rate),
            ("elitism_rate", self.elitism_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(EvolutionError::Config(format!(
                    "{name} must be within [0, 1], got {rate}"
                )));
            }
        }
        if self.convergence_threshold < 0.0 || self.diversity_threshold < 0.0 {
            return Err(EvolutionError::Config(
                "thresholds must be non-negative".to_string(),
            ));
        }
        if self.max_generations == 0 {
            return Err(EvolutionError::Config(
                "max_generations must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of members carried over unchanged: floor(size × elitism_rate)
    pub fn elite_count(&self) -> usize {
        (self.population_size as f64 * self.elitism_rate).floor() as usize
    }
}

/// Supplies the evolution configuration
pub trait ConfigurationSource: Send + Sync {
    fn load(&self) -> Result<EvolutionConfig>;
}

/// Fixed configuration, mostly for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    config: EvolutionConfig,
}

impl StaticConfigSource {
    pub fn new(config: EvolutionConfig) -> Self {
        Self { config }
    }
}

impl ConfigurationSource for StaticConfigSource {
    fn load(&self) -> Result<EvolutionConfig> {
        self.config.validate()?;
        Ok(self.config.clone())
    }
}

/// Environment-backed configuration (`EVOFORGE_*`, optionally from `.env`)
#[derive(Debug, Clone)]
pub struct EnvConfigSource {
    prefix: String,
}

impl Default for EnvConfigSource {
    fn default() -> Self {
        Self {
            prefix: "EVOFORGE".to_string(),
        }
    }
}

impl EnvConfigSource {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        std::env::var(format!("{}_{}", self.prefix, name)).ok()
    }

    fn parse_into<T: std::str::FromStr>(&self, name: &str, target: &mut T) {
        if let Some(raw) = self.var(name) {
            match raw.parse() {
                Ok(v) => *target = v,
                Err(_) => tracing::warn!(variable = name, value = %raw, "Ignoring unparsable setting"),
            }
        }
    }
}

impl ConfigurationSource for EnvConfigSource {
    fn load(&self) -> Result<EvolutionConfig> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let mut cfg = EvolutionConfig::default();

        self.parse_into("POPULATION_SIZE", &mut cfg.population_size);
        self.parse_into("MUTATION_RATE", &mut cfg.mutation_rate);
        self.parse_into("CROSSOVER_RATE", &mut cfg.crossover_rate);
        self.parse_into("ELITISM_RATE", &mut cfg.elitism_rate);
        self.parse_into("MAX_GENERATIONS", &mut cfg.max_generations);
        self.parse_into("CONVERGENCE_THRESHOLD", &mut cfg.convergence_threshold);
        self.parse_into("DIVERSITY_THRESHOLD", &mut cfg.diversity_threshold);
        self.parse_into("MAX_AGENT_AGE", &mut cfg.max_agent_age);
        self.parse_into("ARCHIVE_TOP_K", &mut cfg.archive_top_k);

        if let Some(strategy) = self.var("SELECTION_STRATEGY") {
            cfg.selection_strategy = strategy.parse()?;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}
