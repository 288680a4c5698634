// ── Vector math utilities ──────────────────────────────────────────────

use crate::atoms::ledger_types::Embedding;

/// Convert a byte slice (from SQLite BLOB) to a Vec<f32>.
pub(crate) fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Convert a Vec<f32> to bytes for SQLite BLOB storage.
pub fn f32_vec_to_bytes(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Rebuild a tagged embedding from its stored columns.
/// Returns `None` when the blob width disagrees with the recorded dimension.
pub(crate) fn embedding_from_parts(bytes: &[u8], model: String, dim: i64) -> Option<Embedding> {
    let vector = bytes_to_f32_vec(bytes);
    if vector.is_empty() || vector.len() as i64 != dim {
        return None;
    }
    Some(Embedding::new(model, vector))
}

/// Cosine similarity between two raw vectors. Returns 0.0 if either is empty,
/// zero-norm, or the lengths differ.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        dot / denom
    }
}

/// Cosine similarity between tagged embeddings; `None` across models/widths.
pub(crate) fn embedding_similarity(a: &Embedding, b: &Embedding) -> Option<f64> {
    if !a.is_comparable(b) {
        return None;
    }
    Some(cosine_similarity(&a.vector, &b.vector))
}

/// `centroid + alpha * (sample - centroid)`, in place.
pub(crate) fn nudge_towards(centroid: &mut [f32], sample: &[f32], alpha: f64) {
    for (c, s) in centroid.iter_mut().zip(sample.iter()) {
        let delta = (*s as f64 - *c as f64) * alpha;
        *c = (*c as f64 + delta) as f32;
    }
}

/// Size-weighted mean of two vectors of equal width.
pub(crate) fn weighted_mean(a: &[f32], wa: u64, b: &[f32], wb: u64) -> Vec<f32> {
    let total = (wa + wb).max(1) as f64;
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| ((*x as f64 * wa as f64 + *y as f64 * wb as f64) / total) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0f32, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_and_mismatched() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn tagged_similarity_refuses_cross_model() {
        let a = Embedding::new("m1", vec![1.0, 0.0]);
        let b = Embedding::new("m2", vec![1.0, 0.0]);
        assert_eq!(embedding_similarity(&a, &b), None);
        assert!(embedding_similarity(&a, &a).is_some());
    }

    #[test]
    fn bytes_roundtrip_preserves_values() {
        let original = vec![1.0f32, -2.5, 3.14159, 0.0];
        assert_eq!(bytes_to_f32_vec(&f32_vec_to_bytes(&original)), original);
    }

    #[test]
    fn embedding_from_parts_checks_dimension() {
        let bytes = f32_vec_to_bytes(&[1.0, 2.0]);
        assert!(embedding_from_parts(&bytes, "m".into(), 2).is_some());
        assert!(embedding_from_parts(&bytes, "m".into(), 3).is_none());
    }

    #[test]
    fn nudge_moves_fraction_of_the_way() {
        let mut c = vec![0.0f32, 0.0];
        nudge_towards(&mut c, &[1.0, 2.0], 0.5);
        assert!((c[0] - 0.5).abs() < 1e-6);
        assert!((c[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn weighted_mean_respects_sizes() {
        let m = weighted_mean(&[0.0, 0.0], 3, &[4.0, 8.0], 1);
        assert!((m[0] - 1.0).abs() < 1e-6);
        assert!((m[1] - 2.0).abs() < 1e-6);
    }
}
