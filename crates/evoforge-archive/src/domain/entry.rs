//! Archive Entry Types
//!
//! Entries are write-once. Re-archiving an agent creates a new entry linked to
//! the previous one through `parent_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use evoforge_common::{
    Agent, AgentId, AgentVariant, EntryId, FitnessScore, Result, SemanticVersion,
};

/// Why an agent was archived
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveReason {
    /// One of the top performers of a generation
    TopPerformer,
    /// Best agent seen so far
    NewBest,
    /// Archived around a notable history event
    Milestone(String),
    /// Archived on explicit request
    Manual(String),
}

impl ArchiveReason {
    /// Tag added to the entry for this reason
    pub fn tag(&self) -> &'static str {
        match self {
            ArchiveReason::TopPerformer => "top_performer",
            ArchiveReason::NewBest => "new_best",
            ArchiveReason::Milestone(_) => "milestone",
            ArchiveReason::Manual(_) => "manual",
        }
    }
}

impl std::fmt::Display for ArchiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveReason::Milestone(detail) | ArchiveReason::Manual(detail) => {
                write!(f, "{}: {}", self.tag(), detail)
            }
            _ => f.write_str(self.tag()),
        }
    }
}

/// Frozen copy of an agent at archive time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent: Agent,
    /// `serde_json` serialisation of `agent`
    pub serialized: String,
    /// BLAKE3 hex digest of `serialized`
    pub hash: String,
}

impl AgentSnapshot {
    /// Snapshot an agent. The live agent is copied, never moved.
    pub fn capture(agent: &Agent) -> Result<Self> {
        let serialized = serde_json::to_string(agent)?;
        let hash = blake3::hash(serialized.as_bytes()).to_hex().to_string();
        Ok(Self {
            agent: agent.clone(),
            serialized,
            hash,
        })
    }

    /// Whether the stored hash still matches the serialisation
    pub fn verify(&self) -> bool {
        blake3::hash(self.serialized.as_bytes()).to_hex().as_str() == self.hash
    }
}

/// Provenance of an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub reason: ArchiveReason,
    pub generation: u64,
    pub variant: AgentVariant,
    pub version: SemanticVersion,
    pub archived_by: String,
}

/// Immutable archive record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub id: EntryId,
    /// Previous entry in this agent's lineage, if one was archived
    pub parent_id: Option<EntryId>,
    pub agent_snapshot: AgentSnapshot,
    pub fitness: FitnessScore,
    pub timestamp: DateTime<Utc>,
    pub metadata: EntryMetadata,
    pub tags: Vec<String>,
}

impl ArchiveEntry {
    #[inline]
    pub fn agent_id(&self) -> AgentId {
        self.agent_snapshot.agent.id
    }

    #[inline]
    pub fn overall(&self) -> f64 {
        self.fitness.overall()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.metadata.generation
    }

    #[inline]
    pub fn variant(&self) -> AgentVariant {
        self.metadata.variant
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }
}
