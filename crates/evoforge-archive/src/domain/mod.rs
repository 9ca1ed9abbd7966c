//! Archive domain logic
//!
//! Entries, secondary indices, queries and lineage reconstruction.

pub mod entry;
pub mod indexing;
pub mod lineage;
pub mod query;
