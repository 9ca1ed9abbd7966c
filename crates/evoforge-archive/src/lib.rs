//! # Evoforge Archive
//!
//! Durable, indexed record of historically notable agents and their
//! parent/child relationships.
//!
//! Agents move from the live population into the archive by copy. Entries are
//! write-once; archiving the same agent again creates a new entry linked to the
//! previous one.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    ArchiveStore                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │  Archive    │  │   Search    │  │  Lineage    │     │
//! │  │  Agent      │  │   Query     │  │  Tree       │     │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘     │
//! │         │                │                │            │
//! │  ┌──────┴────────────────┴────────────────┴──────┐     │
//! │  │      Entry arena + ArchiveIndex (one lock)    │     │
//! │  └──────────────────────┬────────────────────────┘     │
//! │                         │                              │
//! │  ┌──────────────────────┴────────────────────────┐     │
//! │  │              PersistenceBackend                │     │
//! │  └───────────────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod domain;
pub mod infra;

pub use config::ArchiveConfig;
pub use domain::entry::{AgentSnapshot, ArchiveEntry, ArchiveReason, EntryMetadata};
pub use domain::indexing::{ArchiveIndex, IndexStats};
pub use domain::lineage::{LineageNode, LineageTree};
pub use domain::query::{ArchiveQuery, SearchResult, SortBy};
pub use infra::archive_store::{ArchiveStatistics, ArchiveStore};

/// Backend key the archive document is stored under
pub const DEFAULT_PERSISTENCE_KEY: &str = "archive/entries";

/// Fitness index granularity (tenths)
pub const DEFAULT_FITNESS_BUCKETS: usize = 10;
