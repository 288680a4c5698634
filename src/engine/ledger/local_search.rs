// ── Ledger: Local Search (DFS) ──────────────────────────────────────────────
//
// Depth-bounded traversal from a slot head through its branch tree.
//
//   traverse  — pure walk over the topology arena (ancestry first, then
//               children for within-branch breadth), visited-set guarded,
//               capped at `k * visit_multiplier` blocks
//   search    — loads the visited blocks, scores them, drops irrelevant ones
//
// score = w_similarity·content_similarity + w_recency·recency
//       + w_locality·branch_locality + w_keyword·keyword_bonus
//
// Results are ordered by score, then newer block_index, so an unchanged
// ledger always yields the same order for the same request.

use super::branch_index::BranchIndex;
use super::tokenizer;
use super::topology::Topology;
use crate::atoms::constants::TIMESTAMP_FORMAT;
use crate::atoms::error::EngineResult;
use crate::atoms::ledger_types::{
    Embedding, LocalSearchConfig, MemoryBlock, ScoreBreakdown, SearchHit, SearchSource, StmSlot,
};
use crate::engine::store::blocks;
use crate::engine::store::embedding::embedding_similarity;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;
use rusqlite::Connection;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Query side of a local search, already tokenized.
#[derive(Debug, Clone)]
pub(crate) struct LocalQuery<'a> {
    pub keywords: &'a [String],
    pub embedding: Option<&'a Embedding>,
    pub depth: u32,
    pub k: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct LocalOutcome {
    pub hits: Vec<SearchHit>,
    pub visited: usize,
    pub max_hops: u32,
}

/// `(block_index, hops)` in visit order.
pub(crate) fn traverse(
    topology: &Topology,
    head: u64,
    depth: u32,
    budget: usize,
    expand_children: bool,
) -> Vec<(u64, u32)> {
    let mut stack = vec![(head, 0u32)];
    let mut visited: HashSet<u64> = HashSet::new();
    let mut order = Vec::new();

    while let Some((idx, hops)) = stack.pop() {
        if order.len() >= budget {
            break;
        }
        if !visited.insert(idx) {
            continue;
        }
        let Some(node) = topology.get(idx) else {
            continue;
        };
        order.push((idx, hops));
        if hops >= depth {
            continue;
        }
        if expand_children {
            for &child in node.children.iter().rev() {
                if !visited.contains(&child) {
                    stack.push((child, hops + 1));
                }
            }
        }
        // Pushed last so ancestry is walked first.
        if let Some(parent) = node.parent {
            if !visited.contains(&parent) {
                stack.push((parent, hops + 1));
            }
        }
    }
    order
}

/// Reference point for recency: the newest block in the snapshot, so an
/// unchanged ledger scores the same however much wall time has passed.
/// An empty ledger falls back to the current time.
pub(crate) fn recency_anchor(topology: &Topology) -> DateTime<Utc> {
    topology
        .newest_timestamp()
        .and_then(|ts| NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok())
        .map(|t| t.and_utc())
        .unwrap_or_else(Utc::now)
}

/// Exponential decay with the given half-life. Unparseable or future
/// timestamps count as brand new.
pub(crate) fn recency_score(timestamp: &str, now: DateTime<Utc>, half_life_hours: f64) -> f64 {
    let Ok(created) = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT) else {
        return 1.0;
    };
    let hours_ago = (now - created.and_utc()).num_milliseconds() as f64 / 3_600_000.0;
    if hours_ago <= 0.0 || half_life_hours <= 0.0 {
        return 1.0;
    }
    (-hours_ago * std::f64::consts::LN_2 / half_life_hours)
        .exp()
        .clamp(0.0, 1.0)
}

/// Score one block. `None` when it falls under the relevance floor.
pub(crate) fn score_block(
    block: &MemoryBlock,
    query: &LocalQuery<'_>,
    query_tokens: &BTreeSet<String>,
    same_branch: bool,
    config: &LocalSearchConfig,
    now: DateTime<Utc>,
) -> Option<(f64, ScoreBreakdown)> {
    let content_similarity = match (query.embedding, block.embedding.as_ref()) {
        (Some(q), Some(b)) if q.is_comparable(b) => {
            embedding_similarity(q, b).unwrap_or(0.0).max(0.0)
        }
        _ => {
            let mut block_tokens: BTreeSet<String> =
                tokenizer::tokens(&block.context).into_iter().collect();
            block_tokens.extend(block.keywords.iter().cloned());
            tokenizer::jaccard(query_tokens, &block_tokens)
        }
    };

    let keyword_hits = query
        .keywords
        .iter()
        .filter(|kw| block.keywords.contains(kw.as_str()))
        .count();
    if content_similarity < config.min_similarity_score && keyword_hits == 0 {
        return None;
    }

    let keyword_bonus = if query.keywords.is_empty() {
        0.0
    } else {
        keyword_hits as f64 / query.keywords.len() as f64
    };
    let recency = recency_score(&block.timestamp, now, config.recency_half_life_hours);
    let branch_locality = if same_branch { 1.0 } else { 0.0 };

    let score = config.w_similarity * content_similarity
        + config.w_recency * recency
        + config.w_locality * branch_locality
        + config.w_keyword * keyword_bonus;

    Some((
        score,
        ScoreBreakdown {
            content_similarity,
            recency,
            branch_locality,
            keyword_bonus,
            keyword_hits,
            hybrid_keyword: None,
            hybrid_vector: None,
        },
    ))
}

/// Local search from `slot`'s head. An empty slot yields no results.
pub(crate) fn search(
    conn: &Connection,
    topology: &Topology,
    branches: &BranchIndex,
    slot: &StmSlot,
    query: &LocalQuery<'_>,
    config: &LocalSearchConfig,
    now: DateTime<Utc>,
) -> EngineResult<LocalOutcome> {
    let head = match slot.head_hash.as_deref().and_then(|h| topology.index_of(h)) {
        Some(h) => h,
        None => return Ok(LocalOutcome::default()),
    };

    let budget = query.k.saturating_mul(config.visit_multiplier.max(1));
    let walk = traverse(topology, head, query.depth, budget, config.expand_children);
    let hops_by_index: HashMap<u64, u32> = walk.iter().copied().collect();
    let indices: Vec<u64> = walk.iter().map(|(i, _)| *i).collect();
    let loaded = blocks::get_many(conn, &indices)?;

    let slot_branch = slot.root.as_deref().map(|r| branches.resolve(r));
    let query_tokens: BTreeSet<String> = query.keywords.iter().cloned().collect();

    let mut hits: Vec<SearchHit> = loaded
        .into_iter()
        .filter_map(|block| {
            let same_branch = slot_branch
                .as_deref()
                .map_or(false, |sb| branches.resolve(&block.root) == sb);
            let (score, breakdown) =
                score_block(&block, query, &query_tokens, same_branch, config, now)?;
            let hops = hops_by_index.get(&block.block_index).copied().unwrap_or(0);
            Some(SearchHit {
                block,
                score,
                source: SearchSource::Local,
                hops,
                breakdown,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(b.block.block_index.cmp(&a.block.block_index))
    });
    hits.truncate(query.k);

    let max_hops = walk.iter().map(|(_, h)| *h).max().unwrap_or(0);
    debug!(
        "[ledger:search] Local search from slot {} visited {} blocks, {} hits",
        slot.slot_id,
        walk.len(),
        hits.len()
    );
    Ok(LocalOutcome {
        hits,
        visited: walk.len(),
        max_hops,
    })
}
