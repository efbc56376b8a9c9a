use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed-length embedding produced by the external encoder.
///
/// Dimensionality is whatever the encoder emits; two vectors are only
/// comparable when their lengths agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f64>);

/// Why a vector cannot take part in matching.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorDefect {
    #[error("vector is empty")]
    Empty,
    /// NaN or infinite component at this index.
    #[error("component {0} is not a finite number")]
    NonFinite(usize),
}

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check the vector is non-empty and every component is finite.
    pub fn validate(&self) -> Result<(), VectorDefect> {
        if self.0.is_empty() {
            return Err(VectorDefect::Empty);
        }
        match self.0.iter().position(|v| !v.is_finite()) {
            Some(i) => Err(VectorDefect::NonFinite(i)),
            None => Ok(()),
        }
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Opaque grouping metadata carried through matching untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLabels {
    pub department: Option<String>,
    pub faculty: Option<String>,
    pub level: Option<String>,
}

/// An enrolled identity with its stored feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub identity_id: String,
    pub display_name: String,
    pub labels: GroupLabels,
    pub feature_vector: FeatureVector,
}

/// Both metrics for one probe/entry comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub entry: GalleryEntry,
    pub euclidean_distance: f64,
    pub cosine_distance: f64,
    pub cosine_similarity: f64,
}

/// Which decision path accepted (or did not accept) the best candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Cosine,
    EuclideanFallback,
    None,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Cosine => "cosine",
            MatchMethod::EuclideanFallback => "euclidean_fallback",
            MatchMethod::None => "none",
        }
    }
}

/// Audit data attached to every outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Number of gallery entries the probe was checked against.
    pub gallery_size_checked: usize,
    /// Threshold of the path that produced the decision.
    pub threshold_used: f64,
    /// Cosine distance of the best candidate, set on rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_match_distance: Option<f64>,
    /// Entries skipped for dimension mismatch. Debug only.
    #[serde(skip)]
    pub skipped_entries: usize,
}

/// Result of matching one probe against a gallery snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionOutcome {
    pub matched: bool,
    pub best: Option<CandidateScore>,
    /// 0–100, derived from the best candidate; 0 when not matched.
    pub confidence: f64,
    pub method: MatchMethod,
    /// Ascending by cosine distance, at most `shortlist_size` long.
    pub ranked_candidates: Vec<CandidateScore>,
    pub diagnostics: Diagnostics,
}

impl RecognitionOutcome {
    /// Outcome for a scan where nothing was comparable.
    pub fn no_candidates(gallery_size_checked: usize, threshold_used: f64, skipped: usize) -> Self {
        Self {
            matched: false,
            best: None,
            confidence: 0.0,
            method: MatchMethod::None,
            ranked_candidates: Vec::new(),
            diagnostics: Diagnostics {
                gallery_size_checked,
                threshold_used,
                best_match_distance: None,
                skipped_entries: skipped,
            },
        }
    }

    /// Identity of the accepted candidate, if any.
    pub fn identity_id(&self) -> Option<&str> {
        if !self.matched {
            return None;
        }
        self.best.as_ref().map(|b| b.entry.identity_id.as_str())
    }

    /// Flatten into the transport document handed to attendance callers.
    pub fn to_document(&self) -> OutcomeDocument {
        let matched_entry = self.best.as_ref().filter(|_| self.matched).map(|b| &b.entry);
        OutcomeDocument {
            matched: self.matched,
            identity_id: matched_entry.map(|e| e.identity_id.clone()),
            display_name: matched_entry.map(|e| e.display_name.clone()),
            confidence: self.confidence,
            method: self.method,
            ranked_candidates: self
                .ranked_candidates
                .iter()
                .map(|c| RankedCandidate {
                    identity_id: c.entry.identity_id.clone(),
                    cosine_distance: c.cosine_distance,
                    euclidean_distance: c.euclidean_distance,
                })
                .collect(),
            diagnostics: self.diagnostics.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_document())
    }
}

/// Shortlist row of the transport document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub identity_id: String,
    pub cosine_distance: f64,
    pub euclidean_distance: f64,
}

/// Key/value form of [`RecognitionOutcome`] for JSON transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDocument {
    pub matched: bool,
    pub identity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub confidence: f64,
    pub method: MatchMethod,
    pub ranked_candidates: Vec<RankedCandidate>,
    pub diagnostics: Diagnostics,
}
