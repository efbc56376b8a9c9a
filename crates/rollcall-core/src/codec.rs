//! Stored-vector serialization.
//!
//! The gallery loader and the enrollment path both go through a
//! [`VectorCodec`], so the matcher never sees the storage encoding.

use crate::types::{FeatureVector, VectorDefect};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed vector payload: {0}")]
    Malformed(String),
    #[error("unusable vector: {0}")]
    Defect(VectorDefect),
    #[error("blob length {0} is not a multiple of 8")]
    BlobLength(usize),
}

/// Two-way conversion between a [`FeatureVector`] and its stored bytes.
pub trait VectorCodec: Send + Sync {
    fn encode(&self, vector: &FeatureVector) -> Result<Vec<u8>, CodecError>;

    /// Decode and validate. Empty and non-finite vectors are errors.
    fn decode(&self, raw: &[u8]) -> Result<FeatureVector, CodecError>;
}

/// JSON array of numbers, e.g. `[0.12, -0.5, ...]`.
///
/// Also accepts the object shapes the encoder service answers with:
/// `{"features": [...]}` and `{"face_encoding": [...]}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

const OBJECT_KEYS: [&str; 2] = ["features", "face_encoding"];

/// Parse a JSON number array (or encoder object) without validating it.
pub fn parse_json_numbers(raw: &[u8]) -> Result<Vec<f64>, CodecError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| CodecError::Malformed(e.to_string()))?;
    json_numbers(value)
}

fn json_numbers(value: Value) -> Result<Vec<f64>, CodecError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => OBJECT_KEYS
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| CodecError::Malformed("no vector field in object".into()))?,
        other => {
            return Err(CodecError::Malformed(format!("expected array, got {other}")));
        }
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_f64()
                .ok_or_else(|| CodecError::Malformed(format!("element {i} is not a number")))
        })
        .collect()
}

impl JsonCodec {
    pub fn encode_str(&self, vector: &FeatureVector) -> Result<String, CodecError> {
        vector.validate().map_err(CodecError::Defect)?;
        serde_json::to_string(vector.as_slice()).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    pub fn decode_str(&self, raw: &str) -> Result<FeatureVector, CodecError> {
        self.decode(raw.as_bytes())
    }
}

impl VectorCodec for JsonCodec {
    fn encode(&self, vector: &FeatureVector) -> Result<Vec<u8>, CodecError> {
        self.encode_str(vector).map(String::into_bytes)
    }

    fn decode(&self, raw: &[u8]) -> Result<FeatureVector, CodecError> {
        let vector = FeatureVector::new(parse_json_numbers(raw)?);
        vector.validate().map_err(CodecError::Defect)?;
        Ok(vector)
    }
}

/// Packed little-endian `f64` blob.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeBytesCodec;

impl VectorCodec for LeBytesCodec {
    fn encode(&self, vector: &FeatureVector) -> Result<Vec<u8>, CodecError> {
        vector.validate().map_err(CodecError::Defect)?;
        Ok(vector.as_slice().iter().flat_map(|v| v.to_le_bytes()).collect())
    }

    fn decode(&self, raw: &[u8]) -> Result<FeatureVector, CodecError> {
        if raw.len() % 8 != 0 {
            return Err(CodecError::BlobLength(raw.len()));
        }
        let values: Vec<f64> = raw
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                f64::from_le_bytes(buf)
            })
            .collect();
        let vector = FeatureVector::new(values);
        vector.validate().map_err(CodecError::Defect)?;
        Ok(vector)
    }
}
