//! Encode → load gallery → match, as one call.

use crate::encoder::Encoder;
use crate::gallery::{GalleryError, GallerySnapshot, GallerySource};
use crate::matcher::{Deadline, MatchConfig, Matcher, RecognitionError, TwoTierMatcher};
use crate::types::{FeatureVector, RecognitionOutcome};
use std::path::Path;

/// Recognize the face in `image` against the enrolled gallery.
pub fn recognize<E, S>(
    encoder: &E,
    image: &Path,
    source: &S,
    config: &MatchConfig,
    deadline: Option<&Deadline>,
) -> Result<RecognitionOutcome, RecognitionError>
where
    E: Encoder + ?Sized,
    S: GallerySource + ?Sized,
{
    let probe = encoder.encode(image)?;
    tracing::debug!(image = %image.display(), dim = probe.len(), "probe encoded");
    recognize_probe(&probe, source, config, deadline)
}

/// Match an already-encoded probe against a freshly loaded snapshot.
///
/// The probe and config are checked before the store is touched. A gallery
/// with nothing usable in it is a definitive no-match, not an error.
pub fn recognize_probe<S>(
    probe: &FeatureVector,
    source: &S,
    config: &MatchConfig,
    deadline: Option<&Deadline>,
) -> Result<RecognitionOutcome, RecognitionError>
where
    S: GallerySource + ?Sized,
{
    probe.validate().map_err(RecognitionError::InvalidProbe)?;
    config.validate()?;

    let snapshot = match GallerySnapshot::load(source) {
        Ok(snapshot) => snapshot,
        Err(GalleryError::Empty) => {
            tracing::info!("gallery has no usable enrolled vectors");
            return Ok(RecognitionOutcome::no_candidates(0, config.cosine_threshold, 0));
        }
        Err(err) => return Err(err.into()),
    };

    TwoTierMatcher::new(config.clone()).compare(probe, snapshot.entries(), deadline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncodingError;
    use crate::gallery::StoredEntry;
    use crate::types::{GroupLabels, MatchMethod};
    use std::cell::Cell;
    use std::time::Duration;

    struct FixedEncoder(Vec<f64>);

    impl Encoder for FixedEncoder {
        fn encode(&self, _image: &Path) -> Result<FeatureVector, EncodingError> {
            Ok(FeatureVector::new(self.0.clone()))
        }
    }

    struct Offline;

    impl Encoder for Offline {
        fn encode(&self, _image: &Path) -> Result<FeatureVector, EncodingError> {
            Err(EncodingError::Unavailable("connection timed out".into()))
        }
    }

    /// Counts store round-trips.
    struct CountingSource {
        rows: Vec<StoredEntry>,
        calls: Cell<usize>,
    }

    impl GallerySource for CountingSource {
        fn fetch_enrolled_entries(&self) -> Result<Vec<StoredEntry>, GalleryError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.rows.clone())
        }
    }

    fn row(id: &str, vector: &str) -> StoredEntry {
        StoredEntry {
            identity_id: id.into(),
            display_name: format!("Student {id}"),
            labels: GroupLabels::default(),
            serialized_vector: vector.as_bytes().to_vec(),
        }
    }

    fn source(rows: Vec<StoredEntry>) -> CountingSource {
        CountingSource {
            rows,
            calls: Cell::new(0),
        }
    }

    #[test]
    fn test_recognize_end_to_end() {
        let src = source(vec![
            row("A", "[1, 0, 0, 0]"),
            row("B", "[0, 1, 0, 0]"),
            row("broken", "[1, 0,"),
        ]);
        let out = recognize(
            &FixedEncoder(vec![1.0, 0.0, 0.0, 0.0]),
            Path::new("capture.png"),
            &src,
            &MatchConfig::default(),
            None,
        )
        .unwrap();

        assert!(out.matched);
        assert_eq!(out.identity_id(), Some("A"));
        assert_eq!(out.method, MatchMethod::Cosine);
        assert_eq!(out.confidence, 100.0);
        assert_eq!(out.diagnostics.gallery_size_checked, 2);
    }

    #[test]
    fn test_fully_filtered_gallery_is_no_match() {
        let src = source(vec![row("A", "not a vector"), row("B", "[]")]);
        let out = recognize_probe(
            &FeatureVector::new(vec![1.0, 0.0]),
            &src,
            &MatchConfig::default(),
            None,
        )
        .unwrap();
        assert!(!out.matched);
        assert_eq!(out.method, MatchMethod::None);
        assert_eq!(out.diagnostics.gallery_size_checked, 0);
        assert_eq!(src.calls.get(), 1);
    }

    #[test]
    fn test_invalid_probe_skips_store() {
        let src = source(vec![row("A", "[1.0]")]);
        let err = recognize(
            &FixedEncoder(vec![]),
            Path::new("blurry.png"),
            &src,
            &MatchConfig::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RecognitionError::InvalidProbe(_)));
        assert!(err.to_string().contains("capture a clearer photo"));
        assert_eq!(src.calls.get(), 0);
    }

    #[test]
    fn test_encoder_failure_propagates() {
        let src = source(vec![row("A", "[1.0]")]);
        let err = recognize(&Offline, Path::new("x.png"), &src, &MatchConfig::default(), None)
            .unwrap_err();
        assert!(matches!(err, RecognitionError::Encoding(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_store_failure_is_retryable() {
        struct Down;
        impl GallerySource for Down {
            fn fetch_enrolled_entries(&self) -> Result<Vec<StoredEntry>, GalleryError> {
                Err(GalleryError::Load("database is locked".into()))
            }
        }
        let err = recognize_probe(
            &FeatureVector::new(vec![1.0]),
            &Down,
            &MatchConfig::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RecognitionError::Gallery(GalleryError::Load(_))));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_deadline_reaches_matcher() {
        let src = source(vec![row("A", "[1.0, 0.0]")]);
        let deadline = Deadline::after(Duration::ZERO);
        let err = recognize_probe(
            &FeatureVector::new(vec![1.0, 0.0]),
            &src,
            &MatchConfig::default(),
            Some(&deadline),
        )
        .unwrap_err();
        assert!(matches!(err, RecognitionError::Timeout { .. }));
    }
}
