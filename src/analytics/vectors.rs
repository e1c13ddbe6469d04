//! Embedding vector math
//!
//! Distances are cosine on L2-normalized vectors; zero-norm vectors are
//! treated as unit norm to avoid NaNs.

/// L2 norm, floored to 1.0 for the zero vector
pub fn l2_norm(vec: &[f32]) -> f32 {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        1.0
    } else {
        norm
    }
}

pub fn normalize(vec: &[f32]) -> Vec<f32> {
    let norm = l2_norm(vec);
    vec.iter().map(|v| v / norm).collect()
}

/// Cosine distance between normalized vectors, clamped for numeric stability
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    1.0 - dot.clamp(-1.0, 1.0)
}

/// Element-wise mean of vectors; empty input yields an empty vector
pub fn mean(vectors: &[&[f32]]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let dim = first.len();
    let mut acc = vec![0.0f32; dim];
    for v in vectors {
        for i in 0..dim {
            acc[i] += v[i];
        }
    }
    let n = vectors.len() as f32;
    acc.iter_mut().for_each(|x| *x /= n);
    acc
}

/// Index of the member closest to the centroid (cosine distance)
pub fn medoid_index(indices: &[usize], vectors: &[Vec<f32>], centroid: &[f32]) -> usize {
    let mut best_idx = indices[0];
    let mut best_dist = f32::MAX;
    for &i in indices {
        let d = cosine_distance(&vectors[i], centroid);
        if d < best_dist {
            best_dist = d;
            best_idx = i;
        }
    }
    best_idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_vector_norm_is_one() {
        assert_eq!(l2_norm(&[0.0, 0.0]), 1.0);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_cosine_distance_bounds() {
        let a = normalize(&[1.0, 0.0]);
        let b = normalize(&[0.0, 1.0]);
        let c = normalize(&[-1.0, 0.0]);
        assert!((cosine_distance(&a, &a) - 0.0).abs() < 1e-6);
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&a, &c) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let m = mean(&[&a, &b]);
        assert_eq!(m, vec![0.5, 0.5]);
    }

    #[test]
    fn test_medoid_index_picks_closest() {
        let vectors = vec![
            normalize(&[1.0, 0.0]),
            normalize(&[0.9, 0.1]),
            normalize(&[0.0, 1.0]),
        ];
        let centroid = normalize(&[1.0, 0.05]);
        let idx = medoid_index(&[0, 1, 2], &vectors, &centroid);
        assert!(idx == 0 || idx == 1);
        assert_ne!(idx, 2);
    }
}
