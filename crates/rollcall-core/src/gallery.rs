//! Point-in-time gallery of enrolled identities.

use crate::codec::{JsonCodec, VectorCodec};
use crate::types::{GalleryEntry, GroupLabels};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("no enrolled identities with a usable feature vector")]
    Empty,
    #[error("gallery store unavailable: {0}")]
    Load(String),
}

/// A row as the identity store returns it, vector still serialized.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub identity_id: String,
    pub display_name: String,
    pub labels: GroupLabels,
    pub serialized_vector: Vec<u8>,
}

/// Read-only access to enrolled identities.
pub trait GallerySource {
    fn fetch_enrolled_entries(&self) -> Result<Vec<StoredEntry>, GalleryError>;
}

/// Fixed in-memory rows, for callers that cache the store themselves.
impl GallerySource for Vec<StoredEntry> {
    fn fetch_enrolled_entries(&self) -> Result<Vec<StoredEntry>, GalleryError> {
        Ok(self.clone())
    }
}

/// Immutable copy of the gallery for the duration of one match.
///
/// Cloning is cheap; the entries are shared.
#[derive(Debug, Clone)]
pub struct GallerySnapshot {
    entries: Arc<[GalleryEntry]>,
    dropped: usize,
}

impl GallerySnapshot {
    /// Load with the default JSON vector encoding.
    pub fn load<S: GallerySource + ?Sized>(source: &S) -> Result<Self, GalleryError> {
        Self::load_with(source, &JsonCodec)
    }

    /// Fetch every enrolled row and decode its vector.
    ///
    /// Rows whose vector fails to decode are dropped. Fails with
    /// [`GalleryError::Empty`] if nothing usable is left.
    pub fn load_with<S: GallerySource + ?Sized, C: VectorCodec + ?Sized>(
        source: &S,
        codec: &C,
    ) -> Result<Self, GalleryError> {
        let rows = source.fetch_enrolled_entries()?;
        let fetched = rows.len();

        let entries: Vec<GalleryEntry> = rows
            .into_iter()
            .filter_map(|row| match codec.decode(&row.serialized_vector) {
                Ok(feature_vector) => Some(GalleryEntry {
                    identity_id: row.identity_id,
                    display_name: row.display_name,
                    labels: row.labels,
                    feature_vector,
                }),
                Err(err) => {
                    tracing::debug!(
                        identity = %row.identity_id,
                        error = %err,
                        "dropping gallery row with unusable vector"
                    );
                    None
                }
            })
            .collect();

        let dropped = fetched - entries.len();
        if dropped > 0 {
            tracing::warn!(fetched, dropped, "gallery rows dropped during load");
        }
        if entries.is_empty() {
            return Err(GalleryError::Empty);
        }

        tracing::debug!(entries = entries.len(), "gallery snapshot loaded");
        Ok(Self {
            entries: entries.into(),
            dropped,
        })
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows discarded at load time for malformed vectors.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}
