// ── Ledger: Branch Topology Arena ───────────────────────────────────────────
//
// In-memory mirror of the before/after tree, addressed by block_index.
// Hashes stay the external identity; traversal uses arena slots so a hop
// is a Vec lookup instead of a hash-string join against SQLite.
//
// Rows arrive strictly in block_index order. The store assigns indices
// contiguously, so `nodes[i]` normally holds block `origin + i`; a damaged
// ledger (deleted rows, rewritten hashes) still loads, with gaps resolved by
// binary search and dangling parents kept as orphans. verify_chain is what
// reports the damage.

use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::store::blocks::TopologyRow;
use log::warn;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TopologyNode {
    pub block_index: u64,
    pub hash: String,
    pub root: String,
    pub parent: Option<u64>,
    pub children: Vec<u64>,
    pub depth: u32,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub(crate) struct Topology {
    origin: u64,
    nodes: Vec<TopologyNode>,
    by_hash: HashMap<String, u64>,
}

impl Topology {
    pub fn new(origin: u64) -> Self {
        Self {
            origin,
            nodes: Vec::new(),
            by_hash: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Highest block_index loaded so far.
    pub fn last_index(&self) -> Option<u64> {
        self.nodes.last().map(|n| n.block_index)
    }

    /// Timestamp of the most recently appended block.
    pub fn newest_timestamp(&self) -> Option<&str> {
        self.nodes.last().map(|n| n.timestamp.as_str())
    }

    /// block_index the next appended row must carry.
    pub fn next_index(&self) -> u64 {
        self.last_index().map_or(self.origin, |last| last + 1)
    }

    pub fn get(&self, block_index: u64) -> Option<&TopologyNode> {
        self.position(block_index).map(|pos| &self.nodes[pos])
    }

    fn position(&self, block_index: u64) -> Option<usize> {
        let slot = usize::try_from(block_index.checked_sub(self.origin)?).ok()?;
        match self.nodes.get(slot) {
            Some(n) if n.block_index == block_index => Some(slot),
            _ => self
                .nodes
                .binary_search_by_key(&block_index, |n| n.block_index)
                .ok(),
        }
    }

    pub fn index_of(&self, hash: &str) -> Option<u64> {
        self.by_hash.get(hash).copied()
    }

    pub fn by_hash(&self, hash: &str) -> Option<&TopologyNode> {
        self.index_of(hash).and_then(|i| self.get(i))
    }

    /// Append one row and wire it under its parent. Indices must increase;
    /// a skipped index or an unknown parent is logged and tolerated.
    pub fn push(&mut self, row: TopologyRow) -> EngineResult<()> {
        let expected = self.next_index();
        if row.block_index < expected {
            return Err(EngineError::integrity(
                row.block_index,
                format!("topology expected block {expected}"),
            ));
        }
        if row.block_index > expected {
            warn!(
                "[ledger] Block index gap: expected {}, loaded {}",
                expected, row.block_index
            );
        }
        let parent_pos = if row.before.is_empty() {
            None
        } else {
            let pos = self
                .index_of(&row.before)
                .and_then(|p| self.position(p));
            if pos.is_none() {
                warn!(
                    "[ledger] Block {} names an unknown parent, loading it as an orphan",
                    row.block_index
                );
            }
            pos
        };
        let parent = parent_pos.map(|pos| self.nodes[pos].block_index);
        if let Some(pos) = parent_pos {
            self.nodes[pos].children.push(row.block_index);
        }
        self.by_hash.insert(row.hash.clone(), row.block_index);
        self.nodes.push(TopologyNode {
            block_index: row.block_index,
            hash: row.hash,
            root: row.root,
            parent,
            children: Vec::new(),
            depth: row.branch_depth,
            timestamp: row.timestamp,
        });
        Ok(())
    }

    pub fn extend(&mut self, rows: Vec<TopologyRow>) -> EngineResult<()> {
        for row in rows {
            self.push(row)?;
        }
        Ok(())
    }
}
