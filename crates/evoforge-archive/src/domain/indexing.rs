//! Archive Indexing
//!
//! Secondary indices over the entry arena. Every index maps a key to the
//! ordered list of arena slots holding matching entries.

use std::collections::{BTreeMap, HashMap, HashSet};

use evoforge_common::{AgentId, AgentVariant};

use super::entry::ArchiveEntry;

/// Multi-index over archive entries
#[derive(Debug, Clone)]
pub struct ArchiveIndex {
    /// Number of equal-width fitness buckets over [0, 1]
    buckets: usize,
    /// Index by fitness bucket
    by_fitness_bucket: BTreeMap<usize, Vec<usize>>,
    /// Index by generation
    by_generation: BTreeMap<u64, Vec<usize>>,
    /// Index by agent variant
    by_variant: HashMap<AgentVariant, Vec<usize>>,
    /// Index by tag
    by_tag: HashMap<String, Vec<usize>>,
    /// Index by agent id
    by_agent: HashMap<AgentId, Vec<usize>>,
    /// Number of indexed slots
    len: usize,
}

impl ArchiveIndex {
    /// Create a new index with `buckets` fitness buckets
    pub fn new(buckets: usize) -> Self {
        Self {
            buckets: buckets.max(1),
            by_fitness_bucket: BTreeMap::new(),
            by_generation: BTreeMap::new(),
            by_variant: HashMap::new(),
            by_tag: HashMap::new(),
            by_agent: HashMap::new(),
            len: 0,
        }
    }

    /// Bucket holding `overall`. Monotone in `overall`, so a range query only
    /// has to scan the buckets between its two bounds.
    pub fn bucket_for(&self, overall: f64) -> usize {
        let clamped = if overall.is_nan() { 0.0 } else { overall.clamp(0.0, 1.0) };
        ((clamped * self.buckets as f64).floor() as usize).min(self.buckets - 1)
    }

    /// Index the entry stored at arena `slot`
    pub fn add(&mut self, slot: usize, entry: &ArchiveEntry) {
        let bucket = self.bucket_for(entry.overall());
        self.by_fitness_bucket.entry(bucket).or_default().push(slot);

        self.by_generation
            .entry(entry.generation())
            .or_default()
            .push(slot);

        self.by_variant
            .entry(entry.variant())
            .or_default()
            .push(slot);

        for tag in &entry.tags {
            self.by_tag.entry(tag.clone()).or_default().push(slot);
        }

        self.by_agent
            .entry(entry.agent_id())
            .or_default()
            .push(slot);

        self.len += 1;
    }

    /// Rebuild from scratch over an arena
    pub fn rebuild(buckets: usize, entries: &[ArchiveEntry]) -> Self {
        let mut index = Self::new(buckets);
        for (slot, entry) in entries.iter().enumerate() {
            index.add(slot, entry);
        }
        index
    }

    /// Slots whose bucket overlaps `[lo, hi]`. A superset of the exact matches.
    pub fn fitness_candidates(&self, lo: f64, hi: f64) -> HashSet<usize> {
        if lo > hi || lo > 1.0 || hi < 0.0 {
            return HashSet::new();
        }
        let first = self.bucket_for(lo);
        let last = self.bucket_for(hi);
        self.by_fitness_bucket
            .range(first..=last)
            .flat_map(|(_, slots)| slots.iter().copied())
            .collect()
    }

    pub fn variant_candidates(&self, variant: AgentVariant) -> HashSet<usize> {
        Self::collect(self.by_variant.get(&variant))
    }

    pub fn generation_candidates(&self, generation: u64) -> HashSet<usize> {
        Self::collect(self.by_generation.get(&generation))
    }

    pub fn agent_candidates(&self, agent_id: &AgentId) -> HashSet<usize> {
        Self::collect(self.by_agent.get(agent_id))
    }

    /// Slots carrying any of `tags`
    pub fn tag_candidates(&self, tags: &[String]) -> HashSet<usize> {
        tags.iter()
            .filter_map(|tag| self.by_tag.get(tag))
            .flat_map(|slots| slots.iter().copied())
            .collect()
    }

    /// Slots of an agent in insertion order
    pub fn agent_slots(&self, agent_id: &AgentId) -> &[usize] {
        self.by_agent
            .get(agent_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Most recently inserted slot of an agent
    pub fn latest_for_agent(&self, agent_id: &AgentId) -> Option<usize> {
        self.agent_slots(agent_id).last().copied()
    }

    fn collect(slots: Option<&Vec<usize>>) -> HashSet<usize> {
        slots
            .map(|v| v.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Get statistics about the index
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_entries: self.len,
            unique_agents: self.by_agent.len(),
            unique_variants: self.by_variant.len(),
            unique_generations: self.by_generation.len(),
            unique_tags: self.by_tag.len(),
            occupied_buckets: self.by_fitness_bucket.len(),
        }
    }
}

impl Default for ArchiveIndex {
    fn default() -> Self {
        Self::new(crate::DEFAULT_FITNESS_BUCKETS)
    }
}

/// Statistics about the archive index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub total_entries: usize,
    pub unique_agents: usize,
    pub unique_variants: usize,
    pub unique_generations: usize,
    pub unique_tags: usize,
    pub occupied_buckets: usize,
}
