// ── Ledger Store: Hash Chain ─────────────────────────────────────────────────
//
// Canonical block hashing and full-ledger verification.
//
//   hash = hex(SHA-256(json{block_index, context, importance, prev_hash, timestamp}))
//
// The canonical form is the serde_json encoding of `CanonicalBlock`, whose
// fields are declared in lexicographic order. Nothing else about a block
// (keywords, tags, embedding, metadata, topology, visits) enters the hash.
//
// verify_chain checks two integrity notions:
//   1. the global prev_hash chain across all blocks, and
//   2. the per-branch tree (before ↔ after reciprocity, depth, root).
// Each block is first checked against what precedes it, in block_index
// order; `after` lists are checked in a second pass, so a rewritten or
// deleted block is reported where it happened rather than at its parent.
// The first violation is reported as data; the scan stops there.

use super::blocks::{self, ChainRow};
use crate::atoms::constants::{GENESIS_PREV_HASH, TIMESTAMP_FORMAT};
use crate::atoms::error::EngineResult;
use crate::atoms::ledger_types::{ChainReport, ChainViolation, ViolationKind};
use log::{info, warn};
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

#[derive(Serialize)]
struct CanonicalBlock<'a> {
    block_index: u64,
    context: &'a str,
    importance: f64,
    prev_hash: &'a str,
    timestamp: &'a str,
}

/// Importance as it survives a round trip through SQLite. `-0.0` reads back
/// as `0.0`, so it is folded before hashing or storing.
pub(crate) fn canonical_importance(importance: f64) -> f64 {
    if importance == 0.0 {
        0.0
    } else {
        importance
    }
}

/// Deterministic block hash over the chained fields only.
pub(crate) fn compute_block_hash(
    block_index: u64,
    timestamp: &str,
    context: &str,
    importance: f64,
    prev_hash: &str,
) -> EngineResult<String> {
    let canonical = CanonicalBlock {
        block_index,
        context,
        importance: canonical_importance(importance),
        prev_hash,
        timestamp,
    };
    let payload = serde_json::to_vec(&canonical)?;
    let mut hasher = Sha256::new();
    hasher.update(&payload);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Current time in the hashed timestamp format.
pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Full sequential scan of the ledger. Fails fast at the first violation.
pub(crate) fn verify_chain(conn: &Connection, index_origin: u64) -> EngineResult<ChainReport> {
    let rows = blocks::chain_rows(conn)?;

    // hash → position, for the before/after reciprocity checks
    let by_hash: HashMap<&str, usize> = rows
        .iter()
        .enumerate()
        .map(|(pos, r)| (r.hash.as_str(), pos))
        .collect();

    let mut checked = 0u64;
    for (pos, row) in rows.iter().enumerate() {
        checked += 1;
        if let Some(kind) = check_row(&rows, &by_hash, pos, row, index_origin)? {
            return Ok(violated(checked, row.block_index, kind));
        }
    }
    for (pos, row) in rows.iter().enumerate() {
        if let Some(kind) = check_children(&rows, &by_hash, pos, row) {
            return Ok(violated(checked, row.block_index, kind));
        }
    }

    info!("[ledger:store] Chain verified ({} blocks)", checked);
    Ok(ChainReport {
        blocks_checked: checked,
        first_violation: None,
    })
}

fn violated(checked: u64, block_index: u64, kind: ViolationKind) -> ChainReport {
    warn!(
        "[ledger:store] Chain verification failed at block {}: {:?}",
        block_index, kind
    );
    ChainReport {
        blocks_checked: checked,
        first_violation: Some(ChainViolation { block_index, kind }),
    }
}

fn check_row(
    rows: &[ChainRow],
    by_hash: &HashMap<&str, usize>,
    pos: usize,
    row: &ChainRow,
    index_origin: u64,
) -> EngineResult<Option<ViolationKind>> {
    // ── Global chain ────────────────────────────────────────────────
    let expected_index = index_origin + pos as u64;
    if row.block_index != expected_index {
        return Ok(Some(ViolationKind::IndexGap {
            expected: expected_index,
        }));
    }
    let expected_prev = if pos == 0 {
        GENESIS_PREV_HASH
    } else {
        rows[pos - 1].hash.as_str()
    };
    if row.prev_hash != expected_prev {
        return Ok(Some(ViolationKind::PrevHashMismatch));
    }
    let recomputed = compute_block_hash(
        row.block_index,
        &row.timestamp,
        &row.context,
        row.importance,
        &row.prev_hash,
    )?;
    if recomputed != row.hash {
        return Ok(Some(ViolationKind::HashMismatch));
    }

    // ── Branch tree ─────────────────────────────────────────────────
    if row.before.is_empty() {
        if row.branch_depth != 0 {
            return Ok(Some(ViolationKind::DepthMismatch));
        }
        if row.root != row.hash {
            return Ok(Some(ViolationKind::RootMismatch));
        }
    } else {
        let parent = match by_hash.get(row.before.as_str()) {
            Some(&p) if p < pos => &rows[p],
            _ => return Ok(Some(ViolationKind::MissingParent)),
        };
        if !parent.after.iter().any(|h| *h == row.hash) {
            return Ok(Some(ViolationKind::ParentLinkMissing));
        }
        if row.branch_depth != parent.branch_depth + 1 {
            return Ok(Some(ViolationKind::DepthMismatch));
        }
        if row.root != parent.root {
            return Ok(Some(ViolationKind::RootMismatch));
        }
    }
    Ok(None)
}

/// Every hash in `after` must name a later block whose `before` is this one.
fn check_children(
    rows: &[ChainRow],
    by_hash: &HashMap<&str, usize>,
    pos: usize,
    row: &ChainRow,
) -> Option<ViolationKind> {
    let dangling = row.after.iter().any(|child_hash| {
        !by_hash
            .get(child_hash.as_str())
            .is_some_and(|&c| c > pos && rows[c].before == row.hash)
    });
    dangling.then_some(ViolationKind::ChildLinkMismatch)
}
