//! Archive queries
//!
//! Every filter is optional and filters combine with AND. Tag filtering is
//! any-of; ranges are inclusive at both ends.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use evoforge_common::{AgentId, AgentVariant};

use super::entry::ArchiveEntry;

/// Result ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    FitnessDesc,
    FitnessAsc,
    DateAsc,
    DateDesc,
}

impl SortBy {
    /// Total order used for result sorting. Ties fall back to timestamp then id,
    /// so pagination is stable across calls.
    pub fn compare(&self, a: &ArchiveEntry, b: &ArchiveEntry) -> Ordering {
        let fitness = |e: &ArchiveEntry| OrderedFloat(e.overall());
        let primary = match self {
            SortBy::FitnessDesc => fitness(b).cmp(&fitness(a)),
            SortBy::FitnessAsc => fitness(a).cmp(&fitness(b)),
            SortBy::DateAsc => a.timestamp.cmp(&b.timestamp),
            SortBy::DateDesc => b.timestamp.cmp(&a.timestamp),
        };
        primary
            .then_with(|| a.timestamp.cmp(&b.timestamp))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Combinable archive filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveQuery {
    /// Entries of a single agent
    pub agent_id: Option<AgentId>,
    pub variant: Option<AgentVariant>,
    /// Inclusive `[lo, hi]` on overall fitness
    pub fitness_range: Option<(f64, f64)>,
    /// Matches entries carrying any of these tags. Empty means no tag filter.
    pub tags: Vec<String>,
    /// Inclusive timestamp range
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub generation: Option<u64>,
    pub sort_by: SortBy,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl ArchiveQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn variant(mut self, variant: AgentVariant) -> Self {
        self.variant = Some(variant);
        self
    }

    pub fn fitness_range(mut self, lo: f64, hi: f64) -> Self {
        self.fitness_range = Some((lo, hi));
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.time_range = Some((from, to));
        self
    }

    pub fn generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Exact predicate. Index lookups only narrow the candidate set, this
    /// decides membership.
    pub fn matches(&self, entry: &ArchiveEntry) -> bool {
        if let Some(agent_id) = self.agent_id {
            if entry.agent_id() != agent_id {
                return false;
            }
        }
        if let Some(variant) = self.variant {
            if entry.variant() != variant {
                return false;
            }
        }
        if let Some((lo, hi)) = self.fitness_range {
            let overall = entry.overall();
            if overall < lo || overall > hi {
                return false;
            }
        }
        if !self.tags.is_empty() && !entry.has_any_tag(&self.tags) {
            return false;
        }
        if let Some((from, to)) = self.time_range {
            if entry.timestamp < from || entry.timestamp > to {
                return false;
            }
        }
        if let Some(generation) = self.generation {
            if entry.generation() != generation {
                return false;
            }
        }
        true
    }
}

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub entries: Vec<ArchiveEntry>,
    /// Matches before pagination
    pub total: usize,
    pub has_more: bool,
}
