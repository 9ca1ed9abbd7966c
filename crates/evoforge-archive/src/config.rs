//! Archive configuration

use serde::{Deserialize, Serialize};

/// Archive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Backend key the entry log is saved under
    pub persistence_key: String,
    /// Number of equal-width fitness buckets in the fitness index
    pub fitness_buckets: usize,
    /// Write through to the persistence backend on every insert
    pub enable_persistence: bool,
    /// Recorded as `archived_by` on every entry
    pub archived_by: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            persistence_key: crate::DEFAULT_PERSISTENCE_KEY.to_string(),
            fitness_buckets: crate::DEFAULT_FITNESS_BUCKETS,
            enable_persistence: true,
            archived_by: "evolution-engine".to_string(),
        }
    }
}

impl ArchiveConfig {
    /// Load overrides from `EVOFORGE_ARCHIVE_*` variables
    pub fn from_env() -> Self {
        Self::from_env_prefix("EVOFORGE_ARCHIVE")
    }

    /// Load overrides from `{prefix}_*` variables
    pub fn from_env_prefix(prefix: &str) -> Self {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let var = |name: &str| std::env::var(format!("{prefix}_{name}"));
        let mut cfg = Self::default();

        if let Ok(key) = var("PERSISTENCE_KEY") {
            cfg.persistence_key = key;
        }
        if let Ok(val) = var("FITNESS_BUCKETS") {
            if let Ok(v) = val.parse::<usize>() {
                cfg.fitness_buckets = v.max(1);
            }
        }
        if let Ok(val) = var("ENABLE_PERSISTENCE") {
            if let Ok(v) = val.parse() {
                cfg.enable_persistence = v;
            }
        }
        if let Ok(by) = var("ARCHIVED_BY") {
            cfg.archived_by = by;
        }

        cfg
    }
}
