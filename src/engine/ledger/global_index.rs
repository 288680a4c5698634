// ── Ledger: Global Index ────────────────────────────────────────────────────
//
// Secondary index spanning every block, used when local search falls short.
//
//   keywords — inverted index term → [(block_index, tf)]; IDF is derived
//              from posting-list length at query time, so inserting a block
//              only touches its own terms
//   vectors  — one VectorIndex per (embedding_model, dimension) group;
//              vectors from different groups are never compared
//
// The index is a cache of the blocks table: `insert` runs after each commit
// and `rebuild` replays the table for maintenance.

use super::hybrid_search::{fuse, rank_order};
use super::tokenizer;
use crate::atoms::ledger_types::{Embedding, RankedBlock};
use crate::atoms::traits::VectorIndex;
use crate::engine::store::blocks::IndexRow;
use crate::engine::store::embedding::cosine_similarity;
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Builds an empty vector index for a new embedding group.
pub type VectorIndexFactory = Arc<dyn Fn() -> Box<dyn VectorIndex> + Send + Sync>;

// ═══════════════════════════════════════════════════════════════════════════
// Exact cosine (default vector strategy)
// ═══════════════════════════════════════════════════════════════════════════

/// Brute-force cosine scan. Exact, O(n) per query.
#[derive(Debug, Clone, Default)]
pub struct ExactCosineIndex {
    entries: Vec<(u64, Vec<f32>)>,
}

impl ExactCosineIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorIndex for ExactCosineIndex {
    fn insert(&mut self, block_index: u64, vector: &[f32]) {
        self.entries.push((block_index, vector.to_vec()));
    }

    fn search(&self, query: &[f32], limit: usize) -> Vec<(u64, f64)> {
        let mut scored: Vec<(u64, f64)> = self
            .entries
            .iter()
            .map(|(idx, v)| (*idx, cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(b.0.cmp(&a.0)));
        scored.truncate(limit);
        scored
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub(crate) fn default_vector_factory() -> VectorIndexFactory {
    Arc::new(|| Box::new(ExactCosineIndex::new()) as Box<dyn VectorIndex>)
}

// ═══════════════════════════════════════════════════════════════════════════
// Global index
// ═══════════════════════════════════════════════════════════════════════════

pub(crate) struct GlobalIndex {
    postings: HashMap<String, Vec<(u64, u32)>>,
    timestamps: HashMap<u64, String>,
    vectors: HashMap<(String, usize), Box<dyn VectorIndex>>,
    factory: VectorIndexFactory,
    last_index: Option<u64>,
}

impl GlobalIndex {
    pub fn new(factory: VectorIndexFactory) -> Self {
        Self {
            postings: HashMap::new(),
            timestamps: HashMap::new(),
            vectors: HashMap::new(),
            factory,
            last_index: None,
        }
    }

    pub fn last_index(&self) -> Option<u64> {
        self.last_index
    }

    pub fn doc_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn keyword_count(&self) -> usize {
        self.postings.len()
    }

    pub fn group_count(&self) -> usize {
        self.vectors.len()
    }

    /// Index one committed block. Re-inserting a known block is a no-op.
    pub fn insert(&mut self, row: IndexRow) {
        if self.timestamps.contains_key(&row.block_index) {
            return;
        }
        for (term, tf) in tokenizer::term_frequencies(&row.context, &row.keywords) {
            self.postings
                .entry(term)
                .or_default()
                .push((row.block_index, tf));
        }
        if let Some(emb) = row.embedding {
            let factory = &self.factory;
            self.vectors
                .entry(emb.group_key())
                .or_insert_with(|| factory())
                .insert(row.block_index, &emb.vector);
        }
        self.timestamps.insert(row.block_index, row.timestamp);
        self.last_index = Some(self.last_index.map_or(row.block_index, |l| l.max(row.block_index)));
    }

    pub fn extend(&mut self, rows: Vec<IndexRow>) {
        let n = rows.len();
        for row in rows {
            self.insert(row);
        }
        if n > 0 {
            debug!("[ledger:global] Indexed {} blocks", n);
        }
    }

    /// Drop everything and re-index `rows`.
    pub fn rebuild(&mut self, rows: Vec<IndexRow>) {
        self.postings.clear();
        self.timestamps.clear();
        self.vectors.clear();
        self.last_index = None;
        let n = rows.len();
        self.extend(rows);
        info!(
            "[ledger:global] Rebuilt global index: {} blocks, {} terms, {} vector groups",
            n,
            self.postings.len(),
            self.vectors.len()
        );
    }

    fn idf(&self, df: usize) -> f64 {
        let n = self.doc_count() as f64;
        let df = df as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// TF-IDF ranking over distinct lowercased `keywords`.
    pub fn search_keywords(&self, keywords: &[String], limit: usize) -> Vec<RankedBlock> {
        let mut seen = HashSet::new();
        let mut scores: HashMap<u64, f64> = HashMap::new();
        for kw in keywords {
            let term = kw.trim().to_lowercase();
            if term.is_empty() || !seen.insert(term.clone()) {
                continue;
            }
            let Some(postings) = self.postings.get(&term) else {
                continue;
            };
            let idf = self.idf(postings.len());
            for &(idx, tf) in postings {
                *scores.entry(idx).or_default() += (1.0 + (tf as f64).ln()) * idf;
            }
        }
        let mut ranked: Vec<RankedBlock> = scores
            .into_iter()
            .map(|(block_index, score)| RankedBlock {
                block_index,
                score,
                keyword_score: Some(score),
                vector_score: None,
            })
            .collect();
        ranked.sort_by(|a, b| {
            rank_order((a.score, a.block_index), (b.score, b.block_index), &self.timestamps)
        });
        ranked.truncate(limit);
        ranked
    }

    /// Cosine ranking within the query's (model, dimension) group.
    pub fn search_vector(&self, embedding: &Embedding, limit: usize) -> Vec<RankedBlock> {
        let Some(index) = self.vectors.get(&embedding.group_key()) else {
            return Vec::new();
        };
        let mut ranked: Vec<RankedBlock> = index
            .search(&embedding.vector, limit)
            .into_iter()
            .map(|(block_index, score)| RankedBlock {
                block_index,
                score,
                keyword_score: None,
                vector_score: Some(score),
            })
            .collect();
        ranked.sort_by(|a, b| {
            rank_order((a.score, a.block_index), (b.score, b.block_index), &self.timestamps)
        });
        ranked
    }

    /// Keyword weight actually applied: a side with no usable input gets none.
    pub fn effective_keyword_weight(
        &self,
        keywords: &[String],
        embedding: Option<&Embedding>,
        requested: f64,
    ) -> f64 {
        let has_vector = embedding.is_some_and(|e| self.vectors.contains_key(&e.group_key()));
        match (keywords.is_empty(), has_vector) {
            (_, false) => 1.0,
            (true, true) => 0.0,
            (false, true) => requested.clamp(0.0, 1.0),
        }
    }

    /// Blend of both rankings over the union of their top candidates.
    pub fn search_hybrid(
        &self,
        keywords: &[String],
        embedding: Option<&Embedding>,
        limit: usize,
        keyword_weight: f64,
        candidate_multiplier: usize,
    ) -> Vec<RankedBlock> {
        let pool = limit.saturating_mul(candidate_multiplier.max(1));
        let weight = self.effective_keyword_weight(keywords, embedding, keyword_weight);
        let kw = self.search_keywords(keywords, pool);
        let vec = match embedding {
            Some(e) => self.search_vector(e, pool),
            None => Vec::new(),
        };
        fuse(&kw, &vec, weight, limit, &self.timestamps)
    }
}
