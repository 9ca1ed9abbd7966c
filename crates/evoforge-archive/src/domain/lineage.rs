//! Lineage reconstruction over `parent_id` links

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use evoforge_common::EntryId;

use super::entry::ArchiveEntry;

/// One entry in a lineage tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageNode {
    pub entry_id: EntryId,
    /// Resolved parent; `None` for roots
    pub parent_id: Option<EntryId>,
    pub children: Vec<EntryId>,
    pub generation: u64,
    pub fitness: f64,
    /// `fitness - parent fitness`, zero for roots
    pub fitness_delta: f64,
}

/// Forest of archive entries keyed by entry id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineageTree {
    pub nodes: HashMap<EntryId, LineageNode>,
    /// Entries without a resolvable parent, in archive order
    pub roots: Vec<EntryId>,
    /// Highest generation observed
    pub depth: u64,
}

impl LineageTree {
    /// Build from entries in archive order. A `parent_id` that does not name
    /// an entry in `entries` makes that entry a root.
    pub fn build(entries: &[ArchiveEntry]) -> Self {
        let fitness_of: HashMap<EntryId, f64> =
            entries.iter().map(|e| (e.id, e.overall())).collect();

        let mut tree = LineageTree::default();

        for entry in entries {
            let parent = entry
                .parent_id
                .filter(|p| *p != entry.id && fitness_of.contains_key(p));
            let fitness_delta = parent
                .and_then(|p| fitness_of.get(&p))
                .map(|parent_fitness| entry.overall() - parent_fitness)
                .unwrap_or(0.0);

            tree.depth = tree.depth.max(entry.generation());
            tree.nodes.insert(
                entry.id,
                LineageNode {
                    entry_id: entry.id,
                    parent_id: parent,
                    children: Vec::new(),
                    generation: entry.generation(),
                    fitness: entry.overall(),
                    fitness_delta,
                },
            );
            if parent.is_none() {
                tree.roots.push(entry.id);
            }
        }

        for entry in entries {
            let parent = tree.nodes.get(&entry.id).and_then(|n| n.parent_id);
            if let Some(parent) = parent {
                if let Some(node) = tree.nodes.get_mut(&parent) {
                    node.children.push(entry.id);
                }
            }
        }

        tree
    }

    pub fn get(&self, id: &EntryId) -> Option<&LineageNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Parent chain from the nearest ancestor up to the root
    pub fn ancestors(&self, id: &EntryId) -> Vec<EntryId> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([*id]);
        let mut current = self.nodes.get(id).and_then(|n| n.parent_id);

        while let Some(parent) = current {
            // Guard against cycles in hand-edited persisted data
            if !seen.insert(parent) {
                break;
            }
            out.push(parent);
            current = self.nodes.get(&parent).and_then(|n| n.parent_id);
        }
        out
    }

    /// Every entry below `id`, breadth-first
    pub fn descendants(&self, id: &EntryId) -> Vec<EntryId> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([*id]);
        let mut frontier = match self.nodes.get(id) {
            Some(node) => node.children.clone(),
            None => return out,
        };

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for child in frontier {
                if !seen.insert(child) {
                    continue;
                }
                out.push(child);
                if let Some(node) = self.nodes.get(&child) {
                    next.extend(node.children.iter().copied());
                }
            }
            frontier = next;
        }
        out
    }
}
