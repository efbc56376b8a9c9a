//! Boundary to the external face encoder.
//!
//! Feature extraction happens outside this crate. Anything that turns an
//! image into a [`FeatureVector`] plugs in through [`Encoder`].

use crate::codec;
use crate::types::FeatureVector;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("no face detected in {0}")]
    NoFaceDetected(PathBuf),
    #[error("encoder unavailable: {0}")]
    Unavailable(String),
    #[error("encoder returned malformed features: {0}")]
    Malformed(String),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Turns a captured image into an embedding.
pub trait Encoder {
    fn encode(&self, image: &Path) -> Result<FeatureVector, EncodingError>;
}

/// Reads embeddings the encoder service already produced, stored as a JSON
/// sidecar next to the image (`photo.png` → `photo.json`). A path that
/// already ends in `.json` is read directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrecomputedEncoder;

impl PrecomputedEncoder {
    pub fn sidecar_path(image: &Path) -> PathBuf {
        if image.extension().is_some_and(|ext| ext == "json") {
            image.to_path_buf()
        } else {
            image.with_extension("json")
        }
    }
}

impl Encoder for PrecomputedEncoder {
    fn encode(&self, image: &Path) -> Result<FeatureVector, EncodingError> {
        let path = Self::sidecar_path(image);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EncodingError::NoFaceDetected(image.to_path_buf()));
            }
            Err(source) => return Err(EncodingError::Io { path, source }),
        };
        let values =
            codec::parse_json_numbers(&raw).map_err(|e| EncodingError::Malformed(e.to_string()))?;
        tracing::debug!(path = %path.display(), dim = values.len(), "loaded precomputed embedding");
        Ok(FeatureVector::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            PrecomputedEncoder::sidecar_path(Path::new("/tmp/capture.png")),
            PathBuf::from("/tmp/capture.json")
        );
        assert_eq!(
            PrecomputedEncoder::sidecar_path(Path::new("probe.json")),
            PathBuf::from("probe.json")
        );
    }

    #[test]
    fn test_encode_reads_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("shot.json"), r#"{"features": [0.1, 0.2, 0.3]}"#).unwrap();

        let v = PrecomputedEncoder.encode(&dir.path().join("shot.jpg")).unwrap();
        assert_eq!(v.as_slice(), &[0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_encode_missing_sidecar_is_no_face() {
        let dir = tempfile::tempdir().unwrap();
        let err = PrecomputedEncoder.encode(&dir.path().join("none.png")).unwrap_err();
        assert!(matches!(err, EncodingError::NoFaceDetected(_)));
    }

    #[test]
    fn test_encode_malformed_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "[1, 2, \"three\"]").unwrap();
        assert!(matches!(
            PrecomputedEncoder.encode(&path),
            Err(EncodingError::Malformed(_))
        ));
    }

    #[test]
    fn test_encode_passes_empty_through() {
        // empty vectors are the matcher's call, not the encoder's
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(PrecomputedEncoder.encode(&path).unwrap().is_empty());
    }
}
