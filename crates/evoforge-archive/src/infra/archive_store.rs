//! Archive Storage
//!
//! Entries live in an append-only arena. The id map, the secondary indices
//! and the aggregate statistics are updated in the same write-locked section
//! as the arena push, so readers never observe a half-indexed entry.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use evoforge_common::{
    Agent, AgentId, AgentVariant, Clock, EntryId, FitnessScore, PersistenceBackend, Result,
    SystemClock,
};

use crate::config::ArchiveConfig;
use crate::domain::entry::{AgentSnapshot, ArchiveEntry, ArchiveReason, EntryMetadata};
use crate::domain::indexing::{ArchiveIndex, IndexStats};
use crate::domain::lineage::LineageTree;
use crate::domain::query::{ArchiveQuery, SearchResult};

/// Version stamped into the persisted document
const FORMAT_VERSION: u32 = 1;

/// Aggregate view over every archived entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveStatistics {
    pub total_entries: usize,
    pub distinct_agents: usize,
    pub average_fitness: f64,
    pub best_fitness: f64,
    pub entries_by_variant: BTreeMap<AgentVariant, usize>,
}

#[derive(Serialize)]
struct PersistedArchiveRef<'a> {
    version: u32,
    entries: &'a [ArchiveEntry],
}

#[derive(Deserialize)]
struct PersistedArchive {
    version: u32,
    entries: Vec<ArchiveEntry>,
}

#[derive(Debug)]
struct ArchiveState {
    /// Arena, in archive order
    entries: Vec<ArchiveEntry>,
    /// Entry id to arena slot
    by_id: HashMap<EntryId, usize>,
    index: ArchiveIndex,
    stats: ArchiveStatistics,
    fitness_sum: f64,
}

impl ArchiveState {
    fn new(buckets: usize) -> Self {
        Self {
            entries: Vec::new(),
            by_id: HashMap::new(),
            index: ArchiveIndex::new(buckets),
            stats: ArchiveStatistics::default(),
            fitness_sum: 0.0,
        }
    }

    /// Push an entry and bring every derived structure up to date
    fn push(&mut self, entry: ArchiveEntry) {
        let slot = self.entries.len();
        self.index.add(slot, &entry);
        self.by_id.insert(entry.id, slot);

        let overall = entry.overall();
        self.fitness_sum += overall;
        let stats = &mut self.stats;
        stats.best_fitness = if stats.total_entries == 0 {
            overall
        } else {
            stats.best_fitness.max(overall)
        };
        stats.total_entries += 1;
        stats.average_fitness = self.fitness_sum / stats.total_entries as f64;
        stats.distinct_agents = self.index.stats().unique_agents;
        *stats.entries_by_variant.entry(entry.variant()).or_default() += 1;

        self.entries.push(entry);
    }

    /// Lineage parent for a new entry of `agent`: the agent's own latest
    /// entry, otherwise the latest entry of its primary parent.
    fn lineage_parent(&self, agent: &Agent) -> Option<EntryId> {
        self.index
            .latest_for_agent(&agent.id)
            .or_else(|| {
                agent
                    .metadata
                    .parent_id
                    .and_then(|p| self.index.latest_for_agent(&p))
            })
            .map(|slot| self.entries[slot].id)
    }
}

/// Indexed, write-once store of notable agent snapshots
pub struct ArchiveStore {
    config: ArchiveConfig,
    backend: Arc<dyn PersistenceBackend>,
    clock: Arc<dyn Clock>,
    state: RwLock<ArchiveState>,
    /// Serialises saves so an older snapshot never overwrites a newer one
    persist_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ArchiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStore")
            .field("config", &self.config)
            .field("entries", &self.len())
            .finish()
    }
}

impl ArchiveStore {
    /// Create an empty store without touching the backend
    pub fn new(config: ArchiveConfig, backend: Arc<dyn PersistenceBackend>) -> Self {
        let buckets = config.fitness_buckets;
        Self {
            config,
            backend,
            clock: Arc::new(SystemClock),
            state: RwLock::new(ArchiveState::new(buckets)),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the clock used to stamp entries
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create a store and load any persisted entries.
    ///
    /// Load and parse failures are logged and leave the archive empty.
    pub async fn open(config: ArchiveConfig, backend: Arc<dyn PersistenceBackend>) -> Self {
        let store = Self::new(config, backend);
        store.reload().await;
        store
    }

    async fn reload(&self) {
        let key = &self.config.persistence_key;
        let raw = match self.backend.load(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %key, "No persisted archive");
                return;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to load archive, starting empty");
                return;
            }
        };

        let persisted: PersistedArchive = match serde_json::from_str(&raw) {
            Ok(p) => p,
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt archive document, starting empty");
                return;
            }
        };
        if persisted.version != FORMAT_VERSION {
            warn!(
                key = %key,
                version = persisted.version,
                "Unsupported archive format version, starting empty"
            );
            return;
        }

        let mut state = ArchiveState::new(self.config.fitness_buckets);
        let mut skipped = 0usize;
        for entry in persisted.entries {
            if state.by_id.contains_key(&entry.id) || !entry.agent_snapshot.verify() {
                skipped += 1;
                continue;
            }
            state.push(entry);
        }
        if skipped > 0 {
            warn!(skipped, "Dropped duplicate or tampered archive entries");
        }

        info!(entries = state.entries.len(), "Archive loaded");
        *self.state.write() = state;
    }

    /// Archive a copy of `agent` and persist the archive.
    ///
    /// Persistence failures are logged; the entry stays in memory.
    #[instrument(skip(self, agent, fitness), fields(agent_id = %agent.id))]
    pub async fn archive_agent(
        &self,
        agent: &Agent,
        fitness: FitnessScore,
        reason: ArchiveReason,
    ) -> Result<ArchiveEntry> {
        let entry = self.record(agent, fitness, reason)?;

        if self.config.enable_persistence {
            if let Err(e) = self.persist().await {
                warn!(entry_id = %entry.id, error = %e, "Failed to persist archive");
            }
        }

        Ok(entry)
    }

    /// Build the entry and insert it under one write lock
    pub(crate) fn record(
        &self,
        agent: &Agent,
        fitness: FitnessScore,
        reason: ArchiveReason,
    ) -> Result<ArchiveEntry> {
        let agent_snapshot = AgentSnapshot::capture(agent)?;

        let mut tags = agent.metadata.tags.clone();
        for tag in [reason.tag(), agent.variant.as_str()] {
            if !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }

        let mut state = self.state.write();
        let entry = ArchiveEntry {
            id: EntryId::new(),
            parent_id: state.lineage_parent(agent),
            agent_snapshot,
            fitness,
            timestamp: self.clock.now(),
            metadata: EntryMetadata {
                reason,
                generation: agent.metadata.generation,
                variant: agent.variant,
                version: agent.version,
                archived_by: self.config.archived_by.clone(),
            },
            tags,
        };
        state.push(entry.clone());

        debug!(
            entry_id = %entry.id,
            fitness = entry.overall(),
            total = state.entries.len(),
            "Agent archived"
        );
        Ok(entry)
    }

    /// Save every entry under the configured key
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let payload = {
            let state = self.state.read();
            serde_json::to_string(&PersistedArchiveRef {
                version: FORMAT_VERSION,
                entries: &state.entries,
            })?
        };
        self.backend
            .save(&self.config.persistence_key, &payload)
            .await?;
        Ok(())
    }

    /// Run a query.
    ///
    /// Indexed filters are intersected as slot sets first; only the surviving
    /// candidates are checked against the exact predicate and materialised.
    pub fn search(&self, query: &ArchiveQuery) -> SearchResult {
        let state = self.state.read();

        let mut candidates: Option<HashSet<usize>> = None;
        if let Some(agent_id) = query.agent_id {
            candidates = narrow(candidates, state.index.agent_candidates(&agent_id));
        }
        if let Some(variant) = query.variant {
            candidates = narrow(candidates, state.index.variant_candidates(variant));
        }
        if let Some((lo, hi)) = query.fitness_range {
            candidates = narrow(candidates, state.index.fitness_candidates(lo, hi));
        }
        if !query.tags.is_empty() {
            candidates = narrow(candidates, state.index.tag_candidates(&query.tags));
        }
        if let Some(generation) = query.generation {
            candidates = narrow(candidates, state.index.generation_candidates(generation));
        }

        let mut matched: Vec<&ArchiveEntry> = match candidates {
            Some(slots) => slots
                .into_iter()
                .filter_map(|slot| state.entries.get(slot))
                .filter(|e| query.matches(e))
                .collect(),
            None => state.entries.iter().filter(|e| query.matches(e)).collect(),
        };
        matched.sort_by(|a, b| query.sort_by.compare(a, b));

        let total = matched.len();
        let entries: Vec<ArchiveEntry> = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        let has_more = query.offset.saturating_add(entries.len()) < total;

        SearchResult {
            entries,
            total,
            has_more,
        }
    }

    /// Top `limit` entries by fitness
    pub fn get_best_agents(&self, limit: usize) -> Vec<ArchiveEntry> {
        self.search(&ArchiveQuery::new().limit(limit)).entries
    }

    pub fn get_entry(&self, id: &EntryId) -> Option<ArchiveEntry> {
        let state = self.state.read();
        state.by_id.get(id).map(|slot| state.entries[*slot].clone())
    }

    /// Every entry of one agent, oldest first
    pub fn entries_for_agent(&self, agent_id: &AgentId) -> Vec<ArchiveEntry> {
        let state = self.state.read();
        state
            .index
            .agent_slots(agent_id)
            .iter()
            .map(|slot| state.entries[*slot].clone())
            .collect()
    }

    /// Every entry in archive order
    pub fn entries(&self) -> Vec<ArchiveEntry> {
        self.state.read().entries.clone()
    }

    pub fn statistics(&self) -> ArchiveStatistics {
        self.state.read().stats.clone()
    }

    pub fn index_stats(&self) -> IndexStats {
        self.state.read().index.stats()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    pub fn build_lineage_tree(&self) -> LineageTree {
        LineageTree::build(&self.state.read().entries)
    }
}

fn narrow(acc: Option<HashSet<usize>>, slots: HashSet<usize>) -> Option<HashSet<usize>> {
    Some(match acc {
        Some(acc) => acc.intersection(&slots).copied().collect(),
        None => slots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use evoforge_common::{
        FitnessComponents, FitnessProvenance, FitnessWeights, InMemoryBackend, PersistenceError,
    };
    use mockall::mock;
    use proptest::prelude::*;

    mock! {
        Backend {}

        #[async_trait]
        impl PersistenceBackend for Backend {
            async fn load(&self, key: &str) -> std::result::Result<Option<String>, PersistenceError>;
            async fn save(&self, key: &str, value: &str) -> std::result::Result<(), PersistenceError>;
        }
    }

    fn score(value: f64) -> FitnessScore {
        FitnessScore::from_components(
            FitnessComponents::uniform(value),
            &FitnessWeights::default(),
            FitnessProvenance::Evaluated,
        )
    }

    fn agent(variant: AgentVariant, value: f64) -> Agent {
        Agent::new(variant, score(value), 0)
    }

    fn store() -> ArchiveStore {
        ArchiveStore::new(ArchiveConfig::default(), Arc::new(InMemoryBackend::new()))
    }

    #[tokio::test]
    async fn test_archive_and_best_round_trip() {
        let store = store();
        let original = agent(AgentVariant::CodeReviewer, 0.9);
        store
            .archive_agent(&original, score(0.9), ArchiveReason::TopPerformer)
            .await
            .unwrap();
        store
            .archive_agent(
                &agent(AgentVariant::Debugger, 0.4),
                score(0.4),
                ArchiveReason::TopPerformer,
            )
            .await
            .unwrap();

        let best = store.get_best_agents(1);
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].agent_snapshot.agent, original);
        assert_eq!(
            best[0].agent_snapshot.serialized,
            serde_json::to_string(&original).unwrap()
        );

        let by_variant = store.search(&ArchiveQuery::new().variant(AgentVariant::CodeReviewer));
        assert_eq!(by_variant.total, 1);
        assert_eq!(by_variant.entries[0].agent_snapshot.agent, original);
    }

    #[tokio::test]
    async fn test_statistics_track_inserts() {
        let store = store();
        let a = agent(AgentVariant::Documenter, 0.2);
        store.archive_agent(&a, score(0.2), ArchiveReason::TopPerformer).await.unwrap();
        store.archive_agent(&a, score(0.6), ArchiveReason::NewBest).await.unwrap();

        let stats = store.statistics();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.distinct_agents, 1);
        assert!((stats.average_fitness - 0.4).abs() < 1e-9);
        assert!((stats.best_fitness - 0.6).abs() < 1e-9);
        assert_eq!(stats.entries_by_variant[&AgentVariant::Documenter], 2);
    }

    #[tokio::test]
    async fn test_lineage_links_agent_and_parent_entries() {
        let store = store();
        let parent = agent(AgentVariant::TestWriter, 0.3);
        let first = store
            .archive_agent(&parent, score(0.3), ArchiveReason::TopPerformer)
            .await
            .unwrap();
        assert!(first.parent_id.is_none());

        let again = store
            .archive_agent(&parent, score(0.35), ArchiveReason::TopPerformer)
            .await
            .unwrap();
        assert_eq!(again.parent_id, Some(first.id));

        let mut child = agent(AgentVariant::TestWriter, 0.5);
        child.metadata.parent_id = Some(parent.id);
        child.metadata.generation = 1;
        let child_entry = store
            .archive_agent(&child, score(0.5), ArchiveReason::TopPerformer)
            .await
            .unwrap();
        assert_eq!(child_entry.parent_id, Some(again.id));

        let tree = store.build_lineage_tree();
        assert_eq!(tree.roots, vec![first.id]);
        assert_eq!(tree.depth, 1);
        let node = tree.get(&child_entry.id).unwrap();
        assert!((node.fitness_delta - (child_entry.overall() - again.overall())).abs() < 1e-12);
        assert_eq!(tree.ancestors(&child_entry.id), vec![again.id, first.id]);
        assert_eq!(tree.descendants(&first.id), vec![again.id, child_entry.id]);
    }

    #[tokio::test]
    async fn test_unresolvable_parent_is_root() {
        let store = store();
        let mut orphan = agent(AgentVariant::Refactorer, 0.5);
        orphan.metadata.parent_id = Some(AgentId::new());
        let entry = store
            .archive_agent(&orphan, score(0.5), ArchiveReason::TopPerformer)
            .await
            .unwrap();
        assert!(entry.parent_id.is_none());
        assert_eq!(store.build_lineage_tree().roots, vec![entry.id]);
    }

    #[tokio::test]
    async fn test_search_filters_sort_and_paginate() {
        let store = store();
        for (i, value) in [0.1, 0.45, 0.5, 0.55, 0.9].into_iter().enumerate() {
            let mut a = agent(AgentVariant::CodeGenerator, value);
            if i % 2 == 0 {
                a.add_tag("even");
            }
            store.archive_agent(&a, score(value), ArchiveReason::TopPerformer).await.unwrap();
        }

        let query = ArchiveQuery::new()
            .fitness_range(0.4, 0.95)
            .sort_by(crate::domain::query::SortBy::FitnessAsc)
            .limit(2);
        let page = store.search(&query);
        assert_eq!(page.total, 4);
        assert!(page.has_more);
        let fitness: Vec<f64> = page.entries.iter().map(|e| e.overall()).collect();
        assert!((fitness[0] - 0.45).abs() < 1e-9);
        assert!((fitness[1] - 0.5).abs() < 1e-9);

        let last = store.search(&query.clone().offset(2));
        assert_eq!(last.entries.len(), 2);
        assert!(!last.has_more);

        let tagged = store.search(&ArchiveQuery::new().tag("even").tag("missing"));
        assert_eq!(tagged.total, 3);

        let none = store.search(&ArchiveQuery::new().variant(AgentVariant::Debugger));
        assert_eq!(none.total, 0);
        assert!(!none.has_more);
    }

    #[tokio::test]
    async fn test_search_by_agent_combines_with_other_filters() {
        let store = store();
        let tracked = agent(AgentVariant::Refactorer, 0.4);
        for value in [0.4, 0.6, 0.8] {
            store
                .archive_agent(&tracked, score(value), ArchiveReason::TopPerformer)
                .await
                .unwrap();
        }
        store
            .archive_agent(
                &agent(AgentVariant::Refactorer, 0.7),
                score(0.7),
                ArchiveReason::TopPerformer,
            )
            .await
            .unwrap();

        let all = store.search(&ArchiveQuery::new().agent(tracked.id));
        assert_eq!(all.total, 3);
        assert!(all.entries.iter().all(|e| e.agent_id() == tracked.id));
        assert_eq!(all.total, store.entries_for_agent(&tracked.id).len());

        let upper = store.search(&ArchiveQuery::new().agent(tracked.id).fitness_range(0.5, 1.0));
        assert_eq!(upper.total, 2);

        assert_eq!(store.search(&ArchiveQuery::new().agent(AgentId::new())).total, 0);
    }

    #[tokio::test]
    async fn test_time_range_is_inclusive() {
        let store = store();
        let entry = store
            .archive_agent(
                &agent(AgentVariant::Debugger, 0.5),
                score(0.5),
                ArchiveReason::Manual("pinned".into()),
            )
            .await
            .unwrap();

        let exact = ArchiveQuery::new().time_range(entry.timestamp, entry.timestamp);
        assert_eq!(store.search(&exact).total, 1);

        let later = ArchiveQuery::new().time_range(
            entry.timestamp + chrono::Duration::seconds(1),
            entry.timestamp + chrono::Duration::seconds(2),
        );
        assert_eq!(store.search(&later).total, 0);
    }

    #[tokio::test]
    async fn test_reopen_restores_entries_and_indices() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = ArchiveStore::new(ArchiveConfig::default(), backend.clone());
        let a = agent(AgentVariant::Documenter, 0.7);
        let entry = store
            .archive_agent(&a, score(0.7), ArchiveReason::TopPerformer)
            .await
            .unwrap();

        let reopened = ArchiveStore::open(ArchiveConfig::default(), backend).await;
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get_entry(&entry.id), Some(entry.clone()));
        assert_eq!(reopened.entries_for_agent(&a.id), vec![entry]);
        assert_eq!(reopened.statistics(), store.statistics());
    }

    #[tokio::test]
    async fn test_corrupt_document_leaves_archive_empty() {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .save(crate::DEFAULT_PERSISTENCE_KEY, "{ not json")
            .await
            .unwrap();
        let store = ArchiveStore::open(ArchiveConfig::default(), backend).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failing_backend_is_not_fatal() {
        let mut backend = MockBackend::new();
        backend
            .expect_load()
            .returning(|_| Err(PersistenceError::Unavailable("offline".into())));
        backend
            .expect_save()
            .times(1)
            .returning(|_, _| Err(PersistenceError::Unavailable("offline".into())));

        let store = ArchiveStore::open(ArchiveConfig::default(), Arc::new(backend)).await;
        assert!(store.is_empty());

        let entry = store
            .archive_agent(
                &agent(AgentVariant::CodeGenerator, 0.6),
                score(0.6),
                ArchiveReason::TopPerformer,
            )
            .await
            .unwrap();
        assert_eq!(store.get_entry(&entry.id), Some(entry));
    }

    proptest! {
        #[test]
        fn prop_fitness_range_matches_brute_force(
            values in proptest::collection::vec(0.0f64..=1.0, 1..40),
            a in 0.0f64..=1.0,
            b in 0.0f64..=1.0,
        ) {
            let store = store();
            for (i, value) in values.iter().enumerate() {
                let variant = AgentVariant::ALL[i % AgentVariant::ALL.len()];
                store
                    .record(&agent(variant, *value), score(*value), ArchiveReason::TopPerformer)
                    .unwrap();
            }
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

            let result = store.search(&ArchiveQuery::new().fitness_range(lo, hi));
            let mut got: Vec<EntryId> = result.entries.iter().map(|e| e.id).collect();
            let mut expected: Vec<EntryId> = store
                .entries()
                .into_iter()
                .filter(|e| lo <= e.overall() && e.overall() <= hi)
                .map(|e| e.id)
                .collect();
            got.sort();
            expected.sort();
            prop_assert_eq!(result.total, expected.len());
            prop_assert_eq!(got, expected);
        }
    }
}
