//! Enrollment: persist an externally produced embedding for an identity.

use crate::store::{IdentityStore, StoreError};
use chrono::Utc;
use rollcall_core::{FeatureVector, GroupLabels, JsonCodec};
use rusqlite::params;
use serde::Serialize;

/// Everything needed to enroll (or re-enroll) one identity.
#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    pub identity_id: String,
    pub display_name: String,
    pub labels: GroupLabels,
    pub embedding: FeatureVector,
    /// Encoder model that produced the embedding, if known.
    pub model_version: Option<String>,
}

/// Receipt for a stored embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrolledEmbedding {
    pub embedding_id: String,
    pub identity_id: String,
    pub dimension: usize,
    pub created_at: String,
    /// False when the identity already existed and was updated.
    pub new_identity: bool,
}

impl IdentityStore {
    /// Validate and store an embedding.
    ///
    /// The identity row is created or its display data refreshed; the
    /// embedding is appended, and the newest one is what the gallery uses.
    pub fn enroll(&self, request: EnrollmentRequest) -> Result<EnrolledEmbedding, StoreError> {
        let identity_id = request.identity_id.trim();
        if identity_id.is_empty() {
            return Err(StoreError::EmptyIdentityId);
        }
        let encoded = JsonCodec.encode_str(&request.embedding)?;

        let new_identity = !self.identity_exists(identity_id)?;
        let created_at = Utc::now().to_rfc3339();
        let embedding_id = uuid::Uuid::new_v4().to_string();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO identities (identity_id, display_name, department, faculty, level, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(identity_id) DO UPDATE SET
                display_name = excluded.display_name,
                department = excluded.department,
                faculty = excluded.faculty,
                level = excluded.level",
            params![
                identity_id,
                request.display_name,
                request.labels.department,
                request.labels.faculty,
                request.labels.level,
                created_at,
            ],
        )?;
        tx.execute(
            "INSERT INTO embeddings (id, identity_id, vector, model_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                embedding_id,
                identity_id,
                encoded,
                request.model_version,
                created_at,
            ],
        )?;
        tx.commit()?;

        tracing::info!(
            identity = identity_id,
            dim = request.embedding.len(),
            new_identity,
            "embedding enrolled"
        );

        Ok(EnrolledEmbedding {
            embedding_id,
            identity_id: identity_id.to_string(),
            dimension: request.embedding.len(),
            created_at,
            new_identity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::codec::CodecError;
    use rollcall_core::GallerySnapshot;

    fn request(id: &str, values: Vec<f64>) -> EnrollmentRequest {
        EnrollmentRequest {
            identity_id: id.into(),
            display_name: "Bello Musa".into(),
            labels: GroupLabels::default(),
            embedding: FeatureVector::new(values),
            model_version: Some("opencv-lbp-v1".into()),
        }
    }

    #[test]
    fn test_enroll_new_then_update() {
        let store = IdentityStore::open_in_memory().unwrap();
        let first = store.enroll(request("MTH/20/117", vec![0.1, 0.2, 0.3])).unwrap();
        assert!(first.new_identity);
        assert_eq!(first.dimension, 3);
        assert_eq!(first.identity_id, "MTH/20/117");

        let mut again = request("MTH/20/117", vec![0.3, 0.2, 0.1]);
        again.display_name = "Bello Musa A.".into();
        let second = store.enroll(again).unwrap();
        assert!(!second.new_identity);
        assert_ne!(first.embedding_id, second.embedding_id);

        let summary = store.get("MTH/20/117").unwrap().unwrap();
        assert_eq!(summary.display_name, "Bello Musa A.");
        assert_eq!(summary.embeddings, 2);
    }

    #[test]
    fn test_enroll_rejects_unusable_embedding() {
        let store = IdentityStore::open_in_memory().unwrap();
        assert!(matches!(
            store.enroll(request("A", vec![])),
            Err(StoreError::InvalidEmbedding(CodecError::Defect(_)))
        ));
        assert!(matches!(
            store.enroll(request("A", vec![1.0, f64::NAN])),
            Err(StoreError::InvalidEmbedding(_))
        ));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_enroll_rejects_blank_identity() {
        let store = IdentityStore::open_in_memory().unwrap();
        assert!(matches!(
            store.enroll(request("   ", vec![1.0])),
            Err(StoreError::EmptyIdentityId)
        ));
    }

    #[test]
    fn test_enrolled_vector_decodes_unchanged() {
        let store = IdentityStore::open_in_memory().unwrap();
        let values = vec![0.1, -0.000123456789, 12345.678, 1e-7];
        store.enroll(request("A", values.clone())).unwrap();

        let snapshot = GallerySnapshot::load(&store).unwrap();
        assert_eq!(snapshot.entries()[0].feature_vector.as_slice(), values.as_slice());
    }
}
