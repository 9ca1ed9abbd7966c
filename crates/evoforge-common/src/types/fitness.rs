//! FitnessScore - multi-dimensional agent fitness (0.0-1.0)
//!
//! The overall score is always a fixed convex combination of five components.
//! It is only ever produced by [`FitnessScore::from_components`], never assigned
//! directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EvolutionError, Result};

/// Tolerance used when checking that weights sum to one
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Score used for every component of a fallback fitness
pub const FALLBACK_SCORE: f64 = 0.1;

/// The five fitness dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitnessComponent {
    CodeQuality,
    Performance,
    Reliability,
    UserSatisfaction,
    ResourceEfficiency,
}

impl FitnessComponent {
    pub const ALL: [FitnessComponent; 5] = [
        FitnessComponent::CodeQuality,
        FitnessComponent::Performance,
        FitnessComponent::Reliability,
        FitnessComponent::UserSatisfaction,
        FitnessComponent::ResourceEfficiency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FitnessComponent::CodeQuality => "code_quality",
            FitnessComponent::Performance => "performance",
            FitnessComponent::Reliability => "reliability",
            FitnessComponent::UserSatisfaction => "user_satisfaction",
            FitnessComponent::ResourceEfficiency => "resource_efficiency",
        }
    }
}

impl std::fmt::Display for FitnessComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-dimension scores, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitnessComponents {
    pub code_quality: f64,
    pub performance: f64,
    pub reliability: f64,
    pub user_satisfaction: f64,
    pub resource_efficiency: f64,
}

impl FitnessComponents {
    /// Every component set to `value`
    pub fn uniform(value: f64) -> Self {
        Self {
            code_quality: value,
            performance: value,
            reliability: value,
            user_satisfaction: value,
            resource_efficiency: value,
        }
    }

    pub fn get(&self, component: FitnessComponent) -> f64 {
        match component {
            FitnessComponent::CodeQuality => self.code_quality,
            FitnessComponent::Performance => self.performance,
            FitnessComponent::Reliability => self.reliability,
            FitnessComponent::UserSatisfaction => self.user_satisfaction,
            FitnessComponent::ResourceEfficiency => self.resource_efficiency,
        }
    }

    pub fn set(&mut self, component: FitnessComponent, value: f64) {
        match component {
            FitnessComponent::CodeQuality => self.code_quality = value,
            FitnessComponent::Performance => self.performance = value,
            FitnessComponent::Reliability => self.reliability = value,
            FitnessComponent::UserSatisfaction => self.user_satisfaction = value,
            FitnessComponent::ResourceEfficiency => self.resource_efficiency = value,
        }
    }

    /// Apply `f` to every component
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        let mut out = *self;
        for component in FitnessComponent::ALL {
            out.set(component, f(self.get(component)));
        }
        out
    }

    /// Clamp every component into [0, 1]; NaN becomes 0
    pub fn clamped(&self) -> Self {
        self.map(|v| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) })
    }

    /// Component-wise mean of two component sets
    pub fn midpoint(&self, other: &Self) -> Self {
        let mut out = *self;
        for component in FitnessComponent::ALL {
            out.set(component, (self.get(component) + other.get(component)) / 2.0);
        }
        out
    }
}

impl Default for FitnessComponents {
    fn default() -> Self {
        Self::uniform(0.5)
    }
}

/// Weights of the convex combination. Must be non-negative and sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitnessWeights {
    pub code_quality: f64,
    pub performance: f64,
    pub reliability: f64,
    pub user_satisfaction: f64,
    pub resource_efficiency: f64,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            code_quality: 0.25,
            performance: 0.20,
            reliability: 0.25,
            user_satisfaction: 0.15,
            resource_efficiency: 0.15,
        }
    }
}

impl FitnessWeights {
    pub fn get(&self, component: FitnessComponent) -> f64 {
        match component {
            FitnessComponent::CodeQuality => self.code_quality,
            FitnessComponent::Performance => self.performance,
            FitnessComponent::Reliability => self.reliability,
            FitnessComponent::UserSatisfaction => self.user_satisfaction,
            FitnessComponent::ResourceEfficiency => self.resource_efficiency,
        }
    }

    pub fn sum(&self) -> f64 {
        FitnessComponent::ALL.iter().map(|c| self.get(*c)).sum()
    }

    /// Reject negative weights and sums away from 1.0
    pub fn validate(&self) -> Result<()> {
        if let Some(c) = FitnessComponent::ALL
            .iter()
            .find(|c| !(self.get(**c) >= 0.0))
        {
            return Err(EvolutionError::Config(format!(
                "fitness weight for {} must be non-negative",
                c
            )));
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EvolutionError::Config(format!(
                "fitness weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }

    /// Weighted sum of `components`
    pub fn combine(&self, components: &FitnessComponents) -> f64 {
        FitnessComponent::ALL
            .iter()
            .map(|c| self.get(*c) * components.get(*c))
            .sum()
    }
}

/// Where a fitness value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitnessProvenance {
    /// Measured by running benchmark tasks
    Evaluated,
    /// Randomised starting value for a fresh agent
    Seeded,
    /// Derived from parents, pending first evaluation
    Inherited,
    /// Minimal score after every component evaluation failed
    Fallback,
}

/// Composite fitness with component breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitnessScore {
    overall: f64,

    /// Component breakdown for transparency
    pub components: FitnessComponents,

    pub provenance: FitnessProvenance,

    pub timestamp: DateTime<Utc>,
}

impl Default for FitnessScore {
    fn default() -> Self {
        Self::from_components(
            FitnessComponents::default(),
            &FitnessWeights::default(),
            FitnessProvenance::Seeded,
        )
    }
}

impl FitnessScore {
    /// Build a score; components are clamped into [0, 1] first
    pub fn from_components(
        components: FitnessComponents,
        weights: &FitnessWeights,
        provenance: FitnessProvenance,
    ) -> Self {
        let components = components.clamped();
        let overall = weights.combine(&components).clamp(0.0, 1.0);
        Self {
            overall,
            components,
            provenance,
            timestamp: Utc::now(),
        }
    }

    /// Clearly-flagged minimal score returned when evaluation failed entirely
    pub fn fallback() -> Self {
        Self {
            overall: FALLBACK_SCORE,
            components: FitnessComponents::uniform(FALLBACK_SCORE),
            provenance: FitnessProvenance::Fallback,
            timestamp: Utc::now(),
        }
    }

    /// Re-stamp with a timestamp from an injected clock
    pub fn stamped(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Overall score in [0, 1]
    #[inline]
    pub fn overall(&self) -> f64 {
        self.overall
    }

    #[inline]
    pub fn is_fallback(&self) -> bool {
        self.provenance == FitnessProvenance::Fallback
    }

    /// Offspring estimate: component-wise mean of both parents
    pub fn inherited(a: &FitnessScore, b: &FitnessScore, weights: &FitnessWeights) -> Self {
        Self::from_components(
            a.components.midpoint(&b.components),
            weights,
            FitnessProvenance::Inherited,
        )
    }

    /// Same components, re-labelled as inherited by a single-parent child
    pub fn inherit(&self, weights: &FitnessWeights) -> Self {
        Self::from_components(self.components, weights, FitnessProvenance::Inherited)
    }
}

impl std::fmt::Display for FitnessScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Fitness({:.3}, quality={:.2}, perf={:.2}, rel={:.2}, sat={:.2}, eff={:.2})",
            self.overall,
            self.components.code_quality,
            self.components.performance,
            self.components.reliability,
            self.components.user_satisfaction,
            self.components.resource_efficiency,
        )
    }
}
