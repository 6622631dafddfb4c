use anyhow::Result;

/// Euclidean (L2) distance between two embedding vectors.
/// 0.0 means identical; grows without bound as vectors diverge.
pub fn l2_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        anyhow::bail!("Vector dimensions must match: {} != {}", a.len(), b.len());
    }

    if a.is_empty() {
        anyhow::bail!("Vectors cannot be empty");
    }

    let sum: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum();

    Ok(sum.sqrt())
}

/// Map a distance to a relevance in (0, 1]; smaller distance, higher relevance.
pub fn relevance_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        let d = l2_distance(&a, &a).unwrap();
        assert!(d.abs() < 1e-6);
        assert!((relevance_from_distance(d) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_known_distance() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        let d = l2_distance(&a, &b).unwrap();
        assert!((d - 5.0).abs() < 1e-6);
        assert!((relevance_from_distance(d) - 1.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!(l2_distance(&a, &b).is_err());
    }

    #[test]
    fn test_empty_vectors() {
        assert!(l2_distance(&[], &[]).is_err());
    }

    #[test]
    fn test_relevance_is_monotonic() {
        assert!(relevance_from_distance(0.5) > relevance_from_distance(1.5));
    }
}
