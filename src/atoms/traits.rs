// ── Paw Ledger Atoms: Collaborator Traits ──────────────────────────────────
// Seams to external collaborators. The ledger consumes embeddings and
// keywords as opaque inputs and lets callers swap the vector search strategy.

use crate::atoms::error::EngineResult;
use crate::atoms::ledger_types::Embedding;

/// `text -> fixed-length vector`, tagged with the producing model.
pub trait EmbeddingProvider: Send + Sync {
    fn model_id(&self) -> &str;
    fn embed(&self, text: &str) -> EngineResult<Embedding>;
}

/// `text -> token list` used for query keywords.
pub trait KeywordExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<String>;
}

/// Vector search strategy for one `(embedding_model, dimension)` group.
///
/// Implementations may be approximate; callers only rely on "higher score =
/// more similar" and on results being sorted descending.
pub trait VectorIndex: Send + Sync {
    fn insert(&mut self, block_index: u64, vector: &[f32]);
    fn search(&self, query: &[f32], limit: usize) -> Vec<(u64, f64)>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
