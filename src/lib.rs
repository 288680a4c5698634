// ── Paw Ledger ─────────────────────────────────────────────────────────────
// Branch-aware, hash-chained memory for OpenPawz agents.
//
//   atoms/   pure types, constants, traits, errors (no I/O)
//   engine/  store, ledger caches + search, config
//
// Entry point: `MemoryLedger::open(path, config)`.

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use atoms::ledger_types::*;
pub use atoms::traits::{EmbeddingProvider, KeywordExtractor, VectorIndex};
pub use engine::ledger::{
    estimate_complexity, extract_keywords, resolve_keyword_weight, ExactCosineIndex, MemoryLedger,
    SimpleKeywordExtractor, VectorIndexFactory,
};
pub use engine::store::LedgerStore;
