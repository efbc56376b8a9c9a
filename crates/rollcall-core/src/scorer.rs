//! Per-entry comparison of a probe against one gallery vector.

use crate::math;
use crate::types::{CandidateScore, FeatureVector, GalleryEntry};

/// The two metrics for one comparison, without the entry attached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub euclidean_distance: f64,
    pub cosine_similarity: f64,
    pub cosine_distance: f64,
}

/// Compute both metrics, or `None` when the dimensions differ.
pub fn metrics(probe: &[f64], candidate: &[f64]) -> Option<Metrics> {
    if probe.len() != candidate.len() {
        return None;
    }
    let cosine_similarity = math::cosine_similarity(probe, candidate);
    Some(Metrics {
        euclidean_distance: math::normalized_euclidean_distance(probe, candidate),
        cosine_similarity,
        cosine_distance: 1.0 - cosine_similarity,
    })
}

/// Score `entry` against `probe`. Skips (returns `None`) on dimension mismatch.
pub fn score(probe: &FeatureVector, entry: &GalleryEntry) -> Option<CandidateScore> {
    metrics(probe.as_slice(), entry.feature_vector.as_slice()).map(|m| m.attach(entry))
}

impl Metrics {
    pub fn attach(self, entry: &GalleryEntry) -> CandidateScore {
        CandidateScore {
            entry: entry.clone(),
            euclidean_distance: self.euclidean_distance,
            cosine_distance: self.cosine_distance,
            cosine_similarity: self.cosine_similarity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroupLabels;

    fn entry(values: Vec<f64>) -> GalleryEntry {
        GalleryEntry {
            identity_id: "CSC/19/0042".into(),
            display_name: "Okafor Ada".into(),
            labels: GroupLabels::default(),
            feature_vector: FeatureVector::new(values),
        }
    }

    #[test]
    fn test_score_skips_dimension_mismatch() {
        let probe = FeatureVector::new(vec![1.0, 0.0, 0.0]);
        assert!(score(&probe, &entry(vec![1.0, 0.0])).is_none());
        assert!(score(&probe, &entry(vec![1.0, 0.0, 0.0, 0.0])).is_none());
    }

    #[test]
    fn test_score_populates_both_metrics() {
        let probe = FeatureVector::new(vec![1.0, 1.0, 0.0, 0.0]);
        let s = score(&probe, &entry(vec![0.0, 0.0, 1.0, 1.0])).unwrap();
        assert_eq!(s.entry.identity_id, "CSC/19/0042");
        assert!(s.cosine_similarity.abs() < 1e-12);
        assert!((s.cosine_distance - 1.0).abs() < 1e-12);
        assert!((s.euclidean_distance - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_score_zero_vector_entry() {
        let probe = FeatureVector::new(vec![0.3, 0.4]);
        let s = score(&probe, &entry(vec![0.0, 0.0])).unwrap();
        assert_eq!(s.cosine_similarity, 0.0);
        assert_eq!(s.cosine_distance, 1.0);
    }
}
