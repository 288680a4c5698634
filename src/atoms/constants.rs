// ── Paw Ledger Atoms: Constants ────────────────────────────────────────────
// Named constants for the ledger crate. Tunables that callers may want to
// change live in `LedgerConfig` instead; what remains here is fixed by the
// on-disk format or the hashing contract.

// ── Hash chain ─────────────────────────────────────────────────────────────
// `prev_hash` of the very first block. 64 hex zeros = the width of a SHA-256
// digest, so every stored `prev_hash` has the same shape.
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

// ── Timestamps ─────────────────────────────────────────────────────────────
// Block timestamps are hashed as text, so the format must never change.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

// ── Slots ──────────────────────────────────────────────────────────────────
/// Default named STM slots.
pub const DEFAULT_SLOT_NAMES: [&str; 4] = ["A", "B", "C", "D"];

// ── Merge bookkeeping ──────────────────────────────────────────────────────
/// Merge-confidence values decayed below this are forgotten.
pub(crate) const MERGE_CONFIDENCE_EPSILON: f64 = 0.01;

// ── Tokenizer ──────────────────────────────────────────────────────────────
/// Leading words that mark an open-ended question.
pub(crate) const QUESTION_OPENERS: &[&str] = &["how", "why", "explain", "describe"];

/// Tokens shorter than this are dropped from keyword extraction.
pub(crate) const MIN_KEYWORD_LEN: usize = 2;

/// Stopwords removed by the default keyword extractor.
pub(crate) const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "do", "does", "for", "from", "has",
    "have", "how", "in", "into", "is", "it", "its", "me", "my", "of", "on", "or", "our", "so",
    "that", "the", "their", "then", "there", "these", "this", "to", "was", "we", "were", "what",
    "when", "where", "which", "who", "why", "will", "with", "you", "your",
];
