//! Agent - the unit the evolution engine manipulates
//!
//! Agents are value snapshots. Only `state` and `metadata` are touched by the
//! owning engine; crossover and mutation always build a new agent with a fresh id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::define_id;
use super::fitness::FitnessScore;
use super::mutation::MutationId;

define_id!(
    /// Agent identifier
    AgentId
);

/// Closed set of agent roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentVariant {
    CodeGenerator,
    CodeReviewer,
    TestWriter,
    Refactorer,
    Documenter,
    Debugger,
}

impl AgentVariant {
    /// Every variant, in declaration order
    pub const ALL: [AgentVariant; 6] = [
        AgentVariant::CodeGenerator,
        AgentVariant::CodeReviewer,
        AgentVariant::TestWriter,
        AgentVariant::Refactorer,
        AgentVariant::Documenter,
        AgentVariant::Debugger,
    ];

    /// Stable string tag, used as an index key and in events
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentVariant::CodeGenerator => "code_generator",
            AgentVariant::CodeReviewer => "code_reviewer",
            AgentVariant::TestWriter => "test_writer",
            AgentVariant::Refactorer => "refactorer",
            AgentVariant::Documenter => "documenter",
            AgentVariant::Debugger => "debugger",
        }
    }

    /// Default capability catalogue for this variant
    pub fn default_capabilities(&self) -> Vec<Capability> {
        let names: &[(&str, &[&str])] = match self {
            AgentVariant::CodeGenerator => &[
                ("code_synthesis", &["workspace.write"]),
                ("context_reading", &["workspace.read"]),
                ("snippet_completion", &[]),
            ],
            AgentVariant::CodeReviewer => &[
                ("diff_analysis", &["workspace.read"]),
                ("style_checking", &[]),
                ("risk_flagging", &[]),
            ],
            AgentVariant::TestWriter => &[
                ("test_synthesis", &["workspace.write"]),
                ("coverage_analysis", &["process.spawn"]),
                ("fixture_generation", &["workspace.write"]),
            ],
            AgentVariant::Refactorer => &[
                ("ast_rewriting", &["workspace.write"]),
                ("dead_code_detection", &["workspace.read"]),
                ("rename_propagation", &["workspace.write"]),
            ],
            AgentVariant::Documenter => &[
                ("doc_generation", &["workspace.write"]),
                ("api_summarising", &["workspace.read"]),
                ("changelog_drafting", &[]),
            ],
            AgentVariant::Debugger => &[
                ("stack_trace_analysis", &[]),
                ("breakpoint_planning", &["process.spawn"]),
                ("log_correlation", &["workspace.read"]),
            ],
        };

        names
            .iter()
            .map(|(name, perms)| {
                Capability::new(*name, perms.iter().map(|p| p.to_string()).collect())
            })
            .collect()
    }

    /// Union of every variant's catalogue, first occurrence wins
    pub fn global_catalogue() -> Vec<Capability> {
        let mut catalogue: Vec<Capability> = Vec::new();
        for variant in Self::ALL {
            for cap in variant.default_capabilities() {
                if !catalogue.iter().any(|c| c.name == cap.name) {
                    catalogue.push(cap);
                }
            }
        }
        catalogue
    }
}

impl std::fmt::Display for AgentVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic version, bumped on every mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SemanticVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SemanticVersion {
    /// Version every freshly created or crossed-over agent starts at
    pub const BASELINE: SemanticVersion = SemanticVersion {
        major: 1,
        minor: 0,
        patch: 0,
    };

    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn bump_patch(&self) -> Self {
        Self::new(self.major, self.minor, self.patch + 1)
    }

    pub fn bump_minor(&self) -> Self {
        Self::new(self.major, self.minor + 1, 0)
    }

    pub fn bump_major(&self) -> Self {
        Self::new(self.major + 1, 0, 0)
    }
}

impl Default for SemanticVersion {
    fn default() -> Self {
        Self::BASELINE
    }
}

impl std::fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Named, versioned feature. Opaque to the engine beyond its descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub version: SemanticVersion,
    /// Permission tags the host must grant before the capability runs
    pub required_permissions: Vec<String>,
}

impl Capability {
    pub fn new(name: impl Into<String>, required_permissions: Vec<String>) -> Self {
        Self {
            name: name.into(),
            version: SemanticVersion::BASELINE,
            required_permissions,
        }
    }
}

/// Mutable runtime state owned by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub active: bool,
    pub evolving: bool,
    pub execution_count: u64,
    pub error_count: u64,
    pub fitness: FitnessScore,
}

impl AgentState {
    pub fn new(fitness: FitnessScore) -> Self {
        Self {
            active: true,
            evolving: false,
            execution_count: 0,
            error_count: 0,
            fitness,
        }
    }
}

/// Provenance and lineage information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Primary parent (mutation source or primary crossover parent)
    pub parent_id: Option<AgentId>,
    /// Second crossover parent
    pub co_parent_id: Option<AgentId>,
    /// Non-decreasing along a lineage
    pub generation: u64,
    pub mutation_history: Vec<MutationId>,
    pub tags: Vec<String>,
}

impl AgentMetadata {
    pub fn new(generation: u64) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            parent_id: None,
            co_parent_id: None,
            generation,
            mutation_history: Vec::new(),
            tags: Vec::new(),
        }
    }
}

/// A versioned, capability-bearing unit of behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub variant: AgentVariant,
    pub version: SemanticVersion,
    /// Ordered set, unique by capability name
    pub capabilities: Vec<Capability>,
    pub state: AgentState,
    pub metadata: AgentMetadata,
}

impl Agent {
    /// Create a generation-`generation` agent with the variant's default catalogue
    pub fn new(variant: AgentVariant, fitness: FitnessScore, generation: u64) -> Self {
        Self {
            id: AgentId::new(),
            variant,
            version: SemanticVersion::BASELINE,
            capabilities: variant.default_capabilities(),
            state: AgentState::new(fitness),
            metadata: AgentMetadata::new(generation),
        }
    }

    /// Current fitness
    #[inline]
    pub fn fitness(&self) -> &FitnessScore {
        &self.state.fitness
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.name == name)
    }

    /// Append a capability unless one with the same name exists.
    /// Returns whether it was added.
    pub fn add_capability(&mut self, capability: Capability) -> bool {
        if self.has_capability(&capability.name) {
            return false;
        }
        self.capabilities.push(capability);
        true
    }

    pub fn capability_names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.metadata.tags.contains(&tag) {
            self.metadata.tags.push(tag);
        }
    }

    /// Set both creation and update time
    pub fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.metadata.created_at = at;
        self.metadata.updated_at = at;
        self
    }

    /// Record a new fitness; `updated_at` follows the score's timestamp
    pub fn record_fitness(&mut self, fitness: FitnessScore) {
        self.metadata.updated_at = fitness.timestamp;
        self.state.fitness = fitness;
    }

    /// Fold task counters from an evaluation into the runtime state
    pub fn record_executions(&mut self, executions: u64, errors: u64) {
        self.state.execution_count += executions;
        self.state.error_count += errors;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_catalogues_are_unique_by_name() {
        for variant in AgentVariant::ALL {
            let caps = variant.default_capabilities();
            let mut names: Vec<_> = caps.iter().map(|c| c.name.clone()).collect();
            names.dedup();
            assert_eq!(names.len(), caps.len(), "{variant}");
        }
        assert_eq!(AgentVariant::global_catalogue().len(), 18);
    }

    #[test]
    fn test_version_bumps() {
        let v = SemanticVersion::new(1, 2, 3);
        assert_eq!(v.bump_patch().to_string(), "1.2.4");
        assert_eq!(v.bump_minor().to_string(), "1.3.0");
        assert_eq!(v.bump_major().to_string(), "2.0.0");
    }

    #[test]
    fn test_add_capability_keeps_set_semantics() {
        let mut agent = Agent::new(AgentVariant::Debugger, FitnessScore::default(), 0);
        let before = agent.capabilities.len();
        assert!(!agent.add_capability(Capability::new("log_correlation", vec![])));
        assert!(agent.add_capability(Capability::new("doc_generation", vec![])));
        assert_eq!(agent.capabilities.len(), before + 1);
        assert_eq!(agent.capability_names().last(), Some(&"doc_generation"));
    }

    #[test]
    fn test_agent_serde_round_trip() {
        let agent = Agent::new(AgentVariant::TestWriter, FitnessScore::default(), 4);
        let json = serde_json::to_string(&agent).unwrap();
        let back: Agent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, agent);
        assert!(json.contains("\"test_writer\""));
    }
}
