use std::cmp::Ordering;

/// Cosine similarity between two embedding vectors, in [-1.0, 1.0].
/// Returns `None` when dimensions differ or the vectors are empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Some(0.0);
    }

    // Clamp to absorb floating point drift
    Some((dot_product / (magnitude_a * magnitude_b)).clamp(-1.0, 1.0))
}

/// Keep items scoring at least `threshold`, best first, at most `limit`.
pub fn rank_by_similarity<T>(
    mut scored: Vec<(T, f32)>,
    threshold: f32,
    limit: usize,
) -> Vec<(T, f32)> {
    scored.retain(|(_, score)| !score.is_nan() && *score >= threshold);
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &a).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_vectors() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_opposite_vectors() {
        let sim = cosine_similarity(&[1.0, 2.0, 3.0], &[-1.0, -2.0, -3.0]).unwrap();
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(cosine_similarity(&[], &[]).is_none());
    }

    #[test]
    fn test_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), Some(0.0));
    }

    #[test]
    fn test_rank_by_similarity() {
        let ranked = rank_by_similarity(
            vec![("a", 0.2), ("b", 0.9), ("c", 0.75), ("d", 0.8)],
            0.75,
            2,
        );
        assert_eq!(ranked, vec![("b", 0.9), ("d", 0.8)]);
    }
}
