// ── Paw Ledger Atoms: Ledger Types ─────────────────────────────────────────
//
// Type definitions for the branch-aware memory ledger.
// These are pure data types (no DB access, no I/O); behaviour lives in engine/.
//
// Follows the project pattern: structs in atoms/, impls in engine/.

use crate::atoms::constants::DEFAULT_SLOT_NAMES;
use crate::atoms::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 1: Embeddings
// ═══════════════════════════════════════════════════════════════════════════

/// A model-tagged embedding vector.
///
/// Vectors produced by different models (or with different widths) are never
/// compared — `is_comparable` is the gate every similarity computation uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub model_id: String,
    pub dimension: usize,
    pub vector: Vec<f32>,
}

impl Embedding {
    pub fn new(model_id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            model_id: model_id.into(),
            dimension: vector.len(),
            vector,
        }
    }

    /// Same model and same width.
    pub fn is_comparable(&self, other: &Embedding) -> bool {
        self.model_id == other.model_id && self.dimension == other.dimension
    }

    /// Grouping key used by the vector index.
    pub fn group_key(&self) -> (String, usize) {
        (self.model_id.clone(), self.dimension)
    }

    /// Reject empty, mis-tagged or non-finite vectors.
    pub fn validate(&self) -> EngineResult<()> {
        if self.model_id.trim().is_empty() {
            return Err(EngineError::validation("embedding model id is empty"));
        }
        if self.vector.is_empty() {
            return Err(EngineError::validation("embedding vector is empty"));
        }
        if self.dimension != self.vector.len() {
            return Err(EngineError::validation(format!(
                "embedding dimension {} does not match vector length {}",
                self.dimension,
                self.vector.len()
            )));
        }
        if self.vector.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::validation("embedding contains non-finite values"));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 2: Blocks
// ═══════════════════════════════════════════════════════════════════════════

/// An immutable, hash-identified unit of stored content.
///
/// Only `{block_index, timestamp, context, importance, prev_hash}` are covered
/// by `hash`. Keywords, tags, embedding, metadata, topology pointers and visit
/// bookkeeping can change (or be relabeled) without touching the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryBlock {
    pub block_index: u64,
    pub timestamp: String,
    pub context: String,
    pub importance: f64,
    pub hash: String,
    pub prev_hash: String,
    /// Hash of the block that originated this block's branch.
    pub root: String,
    /// Parent hash within the branch tree; empty for a branch root.
    pub before: String,
    /// Child hashes in insertion order.
    #[serde(default)]
    pub after: Vec<String>,
    pub branch_depth: u32,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub visit_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<String>,
}

impl MemoryBlock {
    pub fn is_branch_root(&self) -> bool {
        self.before.is_empty()
    }
}

/// Caller-supplied content for a new block. `block_index`, `timestamp` and all
/// chain/topology fields are assigned by the ledger at commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockInput {
    pub context: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
    pub importance: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Target STM slot. `None` routes the block by branch assignment alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
}

impl BlockInput {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            importance: 0.5,
            ..Default::default()
        }
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = Some(slot.into());
        self
    }

    /// Input checks performed before any storage work.
    pub fn validate(&self) -> EngineResult<()> {
        if self.context.trim().is_empty() {
            return Err(EngineError::validation("context must not be empty"));
        }
        if !self.importance.is_finite() || !(0.0..=1.0).contains(&self.importance) {
            return Err(EngineError::validation(format!(
                "importance must be within [0, 1], got {}",
                self.importance
            )));
        }
        if let Some(ref emb) = self.embedding {
            emb.validate()?;
        }
        if !(self.metadata.is_null() || self.metadata.is_object()) {
            return Err(EngineError::validation("metadata must be a JSON object"));
        }
        Ok(())
    }
}

/// A parent → child edge in a branch tree (bulk export for consolidation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLink {
    pub parent_index: u64,
    pub parent_hash: String,
    pub child_index: u64,
    pub child_hash: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 3: Range Queries
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    BlockIndex,
    Timestamp,
    Importance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub(crate) fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// `range(start, end, limit, offset, sort_by, order)` — bounds are inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeQuery {
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub limit: usize,
    pub offset: usize,
    pub sort_by: SortBy,
    pub order: SortOrder,
}

impl Default for RangeQuery {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            limit: 100,
            offset: 0,
            sort_by: SortBy::BlockIndex,
            order: SortOrder::Asc,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 4: Chain Verification
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// `block_index` is not the successor of the previous row.
    IndexGap { expected: u64 },
    /// `prev_hash` does not equal the previous block's `hash`.
    PrevHashMismatch,
    /// Recomputed hash differs from the stored one.
    HashMismatch,
    /// `before` names a hash that is not an earlier block.
    MissingParent,
    /// Parent exists but does not list this block in `after`.
    ParentLinkMissing,
    /// `after` names a block whose `before` is not this block.
    ChildLinkMismatch,
    /// `branch_depth` disagrees with the parent (or a root is not depth 0).
    DepthMismatch,
    /// `root` disagrees with the parent's root (or a root is not self-rooted).
    RootMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainViolation {
    pub block_index: u64,
    pub kind: ViolationKind,
}

/// Outcome of a full sequential chain scan. Stops at the first violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub blocks_checked: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_violation: Option<ChainViolation>,
}

impl ChainReport {
    pub fn is_valid(&self) -> bool {
        self.first_violation.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 5: Branches & Slots
// ═══════════════════════════════════════════════════════════════════════════

/// Centroid of a branch; model-tagged like every other vector in the ledger.
pub type Centroid = Embedding;

/// Per-branch bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchMeta {
    pub root: String,
    pub size: u64,
    /// Tip hashes. One in the common case; several after forks or merges.
    pub heads: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Centroid>,
    /// `block_index` at which this branch was last considered for merging.
    pub last_merge_eval: u64,
}

/// Result of comparing an embedding against known branch centroids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BranchAssignment {
    Existing { root: String, similarity: f64 },
    NewBranch { best_similarity: Option<f64> },
}

impl BranchAssignment {
    pub fn root(&self) -> Option<&str> {
        match self {
            BranchAssignment::Existing { root, .. } => Some(root),
            BranchAssignment::NewBranch { .. } => None,
        }
    }
}

/// A named head pointer. The head is a lookup key only; it never owns the block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StmSlot {
    pub slot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    pub updated_at: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 6: Search
// ═══════════════════════════════════════════════════════════════════════════

/// Full search request as accepted by `MemoryLedger::search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Query embedding. When absent the configured provider (if any) is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
    pub slot: String,
    pub depth: Option<u32>,
    pub k: Option<usize>,
    /// Allow escalation to the global index.
    #[serde(default)]
    pub fallback: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            embedding: None,
            slot: slot.into(),
            depth: None,
            k: None,
            fallback: false,
        }
    }

    pub fn embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    Local,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Local,
    Global,
}

/// Per-signal contributions behind a score (unweighted signal values).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub content_similarity: f64,
    pub recency: f64,
    pub branch_locality: f64,
    pub keyword_bonus: f64,
    pub keyword_hits: usize,
    /// Normalized keyword / vector components of a hybrid (global) score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hybrid_keyword: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hybrid_vector: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub block: MemoryBlock,
    pub score: f64,
    pub source: SearchSource,
    /// DFS distance from the slot head (0 for global hits).
    pub hops: u32,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMeta {
    pub search_type: SearchType,
    /// Deepest hop reached by the local traversal.
    pub hops: u32,
    /// Blocks visited by the local traversal.
    pub visited: usize,
    pub fallback_used: bool,
    pub jumped: bool,
    pub query_complexity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_weight: Option<f64>,
    /// Set when the global index could not be consulted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub meta: SearchMeta,
}

/// A ranked global-index hit (block index + blended score).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedBlock {
    pub block_index: u64,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 7: Metrics & Stats
// ═══════════════════════════════════════════════════════════════════════════

/// Search behaviour counters. Process-local, not durable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMetrics {
    pub total_searches: u64,
    pub total_hops: u64,
    /// Searches answered from the branch without a jump.
    pub graph_hits: u64,
    pub jump_count: u64,
    pub useful_jumps: u64,
    pub jump_success_rate: f64,
    pub local_hit_rate: f64,
    pub last_latency_ms: u64,
    pub max_latency_ms: u64,
    pub avg_latency_ms: f64,
}

/// Learned escalation state (snapshot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpStats {
    pub success_rate: f64,
    pub samples: u64,
    pub effective_min_results: usize,
    pub effective_complexity_ceiling: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub blocks: u64,
    pub branches: u64,
    /// Current similarity threshold for joining an existing branch.
    pub assignment_threshold: f64,
    pub slots_in_use: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_block_index: Option<u64>,
    /// Distinct `(embedding_model, dimension)` groups in the vector index.
    pub embedding_groups: usize,
    pub indexed_keywords: usize,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 8: Configuration
// ═══════════════════════════════════════════════════════════════════════════

/// Centralized configuration for the ledger.
/// Every tuning value lives here with a documented default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// First `block_index` handed out.
    pub index_origin: u64,
    /// Fixed set of STM slot names.
    pub slots: Vec<String>,
    pub store: StoreConfig,
    pub branch: BranchConfig,
    pub search: LocalSearchConfig,
    pub hybrid: HybridSearchConfig,
    pub jump: JumpConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            index_origin: 0,
            slots: DEFAULT_SLOT_NAMES.iter().map(|s| s.to_string()).collect(),
            store: StoreConfig::default(),
            branch: BranchConfig::default(),
            search: LocalSearchConfig::default(),
            hybrid: HybridSearchConfig::default(),
            jump: JumpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite-level wait before a statement reports SQLITE_BUSY.
    pub busy_timeout_ms: u64,
    /// Write attempts after the first one before surfacing `Busy`.
    pub max_write_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 250,
            max_write_retries: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchConfig {
    /// Assignment threshold before enough statistics exist.
    pub initial_threshold: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    /// Number of recent top-1 similarities kept for threshold recomputation.
    pub threshold_window: usize,
    /// Recompute the threshold every N embedded insertions.
    pub threshold_recompute_every: u64,
    /// Quantile of the recent top-1 distribution used as the new threshold.
    pub threshold_quantile: f64,
    /// Lower bound on the centroid learning rate (`max(1/size, floor)`).
    pub centroid_min_alpha: f64,
    /// Centroid similarity above which a pair gains merge confidence.
    pub theta_high: f64,
    pub ema_alpha: f64,
    pub min_confidence: f64,
    /// Insertions between merge evaluations.
    pub evaluation_window: u64,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            initial_threshold: 0.80,
            min_threshold: 0.60,
            max_threshold: 0.92,
            threshold_window: 64,
            threshold_recompute_every: 16,
            threshold_quantile: 0.25,
            centroid_min_alpha: 0.05,
            theta_high: 0.90,
            ema_alpha: 0.30,
            min_confidence: 0.70,
            evaluation_window: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSearchConfig {
    pub w_similarity: f64,
    pub w_recency: f64,
    pub w_locality: f64,
    pub w_keyword: f64,
    pub recency_half_life_hours: f64,
    /// Relevance floor; candidates below it without keyword hits are dropped.
    pub min_similarity_score: f64,
    /// Visit budget = `k * visit_multiplier`.
    pub visit_multiplier: usize,
    /// Also walk `after` children for within-branch breadth.
    pub expand_children: bool,
    pub default_depth: u32,
    pub default_k: usize,
}

impl Default for LocalSearchConfig {
    fn default() -> Self {
        Self {
            w_similarity: 0.6,
            w_recency: 0.1,
            w_locality: 0.2,
            w_keyword: 0.1,
            recency_half_life_hours: 72.0,
            min_similarity_score: 0.2,
            visit_multiplier: 4,
            expand_children: true,
            default_depth: 3,
            default_k: 5,
        }
    }
}

/// Balance between keyword (TF-IDF) and vector scores in the global index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSearchConfig {
    /// Weight of the keyword component (0.0–1.0); vector gets the rest.
    pub keyword_weight: f64,
    /// Adjust `keyword_weight` per query from lexical signals.
    pub auto_detect: bool,
    pub auto_min: f64,
    pub auto_max: f64,
    /// Each ranked list contributes `limit * candidate_multiplier` candidates.
    pub candidate_multiplier: usize,
}

impl Default for HybridSearchConfig {
    fn default() -> Self {
        Self {
            keyword_weight: 0.4,
            auto_detect: false,
            auto_min: 0.1,
            auto_max: 0.9,
            candidate_multiplier: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JumpConfig {
    /// Baseline floor on local results before escalating.
    pub min_local_results: usize,
    /// Baseline ceiling on query complexity before escalating.
    pub complexity_ceiling: f64,
    pub initial_success_rate: f64,
    pub success_rate_floor: f64,
    pub success_rate_ceiling: f64,
    /// Cap on the moving-average sample count.
    pub max_samples: u64,
}

impl Default for JumpConfig {
    fn default() -> Self {
        Self {
            min_local_results: 2,
            complexity_ceiling: 0.6,
            initial_success_rate: 0.5,
            success_rate_floor: 0.05,
            success_rate_ceiling: 0.95,
            max_samples: 50,
        }
    }
}
