// ── Ledger: Memory Ledger Module ────────────────────────────────────────────
//
// A hash-chained, branch-aware memory ledger with local-first search.
//
// Architecture:
//   Slots (STM heads) → Branch trees (DFS neighbourhood) → Global index (jump)
//   all backed by one append-only SQLite block table.
//
// Sub-modules:
//   - tokenizer: Keyword extraction, Jaccard fallback, term frequencies
//   - topology: In-memory parent/child map over every block
//   - branch_index: Centroid assignment, adaptive threshold, merge confidence
//   - slot_manager: Named STM heads
//   - local_search: Depth-bounded DFS from a slot head + multi-signal scoring
//   - global_index: Inverted keyword index + per-model vector groups
//   - hybrid_search: Keyword/vector fusion and auto-detected weighting
//   - jump_optimizer: Adaptive local → global escalation policy
//   - metrics: Search counters and latency
//   - memory_ledger: The MemoryLedger facade tying it together

pub mod branch_index;
pub mod global_index;
pub mod hybrid_search;
pub mod jump_optimizer;
pub mod local_search;
pub mod memory_ledger;
pub mod metrics;
pub mod slot_manager;
pub mod tokenizer;
pub mod topology;

// Re-exports for convenience
pub use global_index::{ExactCosineIndex, VectorIndexFactory};
pub use hybrid_search::resolve_keyword_weight;
pub use jump_optimizer::estimate_complexity;
pub use memory_ledger::MemoryLedger;
pub use tokenizer::{extract_keywords, SimpleKeywordExtractor};
