// ── Ledger: Hybrid Keyword/Vector Fusion ────────────────────────────────────
//
// Controls the balance between TF-IDF keyword matching (lexical) and cosine
// similarity (semantic) in the global index.
//
// Fusion is a linear blend of normalized scores:
//   keyword  → divided by the best keyword score in the candidate set
//   vector   → cosine clamped to [0, 1]
//   score    = w·keyword + (1 − w)·vector
// Ties: newer timestamp first, then higher block_index.
//
// Optional auto-detection moves `w` per query: literal lookups (hash
// prefixes, block numbers, paths) lean lexical, wordy questions lean
// semantic.

use crate::atoms::constants::QUESTION_OPENERS;
use crate::atoms::ledger_types::{HybridSearchConfig, RankedBlock};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

// ═══════════════════════════════════════════════════════════════════════════
// Auto-Detect Query Type
// ═══════════════════════════════════════════════════════════════════════════

/// Keyword weight for `query`, given the keywords extracted from it.
///
/// With `auto_detect` on, the static weight moves toward `auto_max` in
/// proportion to how literal the query is (block hashes, numbers, paths,
/// quoted text) and toward `auto_min` in proportion to how much of it is
/// phrasing rather than content.
pub fn resolve_keyword_weight(query: &str, keywords: &[String], config: &HybridSearchConfig) -> f64 {
    let base = config.keyword_weight.clamp(0.0, 1.0);
    if !config.auto_detect {
        return base;
    }
    let literal = literal_share(query);
    let phrasing = phrasing_share(query, keywords);
    let weight = base + (config.auto_max - base).max(0.0) * literal
        - (base - config.auto_min).max(0.0) * phrasing;
    weight.clamp(config.auto_min, config.auto_max)
}

/// 0–1: share of query tokens that only match verbatim. Quoting forces 1.
fn literal_share(query: &str) -> f64 {
    if query.contains('"') {
        return 1.0;
    }
    let tokens: Vec<&str> = query
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| matches!(c, ',' | ';' | '?' | '!' | '(' | ')')))
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let exact = tokens.iter().filter(|t| is_literal_token(t)).count();
    exact as f64 / tokens.len() as f64
}

fn is_literal_token(token: &str) -> bool {
    let hash_prefix = token.len() >= 8 && token.chars().all(|c| c.is_ascii_hexdigit());
    hash_prefix
        || token.chars().any(|c| c.is_ascii_digit())
        || token.contains(['_', '/', ':', '#'])
        || (token.contains('.') && !token.ends_with('.'))
}

/// 0–1: open-ended opener plus the share of words that are not keywords.
/// Queries under four words carry no phrasing signal.
fn phrasing_share(query: &str, keywords: &[String]) -> f64 {
    let lower = query.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    if words.len() < 4 {
        return 0.0;
    }
    let opener = if words.first().is_some_and(|w| QUESTION_OPENERS.contains(w)) {
        0.5
    } else {
        0.0
    };
    let filler = 1.0 - (keywords.len() as f64 / words.len() as f64).min(1.0);
    (opener + filler).min(1.0)
}

// ═══════════════════════════════════════════════════════════════════════════
// Fusion
// ═══════════════════════════════════════════════════════════════════════════

/// Descending by score, then newer timestamp, then higher block_index.
pub(crate) fn rank_order(
    a: (f64, u64),
    b: (f64, u64),
    timestamps: &HashMap<u64, String>,
) -> Ordering {
    b.0.total_cmp(&a.0)
        .then_with(|| {
            let ta = timestamps.get(&a.1).map(String::as_str).unwrap_or("");
            let tb = timestamps.get(&b.1).map(String::as_str).unwrap_or("");
            tb.cmp(ta)
        })
        .then(b.1.cmp(&a.1))
}

/// Blend keyword and vector candidate lists into one ranking of `limit`.
pub(crate) fn fuse(
    keyword: &[RankedBlock],
    vector: &[RankedBlock],
    keyword_weight: f64,
    limit: usize,
    timestamps: &HashMap<u64, String>,
) -> Vec<RankedBlock> {
    let w = keyword_weight.clamp(0.0, 1.0);
    let best_kw = keyword.iter().map(|r| r.score).fold(0.0_f64, f64::max);

    let mut merged: BTreeMap<u64, (Option<f64>, Option<f64>)> = BTreeMap::new();
    for r in keyword {
        let norm = if best_kw > 0.0 { r.score / best_kw } else { 0.0 };
        merged.entry(r.block_index).or_default().0 = Some(norm);
    }
    for r in vector {
        merged.entry(r.block_index).or_default().1 = Some(r.score.clamp(0.0, 1.0));
    }

    let mut fused: Vec<RankedBlock> = merged
        .into_iter()
        .map(|(block_index, (k, v))| RankedBlock {
            block_index,
            score: w * k.unwrap_or(0.0) + (1.0 - w) * v.unwrap_or(0.0),
            keyword_score: k,
            vector_score: v,
        })
        .collect();
    fused.sort_by(|a, b| rank_order((a.score, a.block_index), (b.score, b.block_index), timestamps));
    fused.truncate(limit);
    fused
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
