//! Gallery matching with a cosine primary path and a euclidean fallback.

use crate::encoder::EncodingError;
use crate::gallery::GalleryError;
use crate::scorer::{self, Metrics};
use crate::types::{
    CandidateScore, Diagnostics, FeatureVector, GalleryEntry, MatchMethod, RecognitionOutcome,
    VectorDefect,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{Duration, Instant};
use thiserror::Error;

const DEFAULT_COSINE_THRESHOLD: f64 = 0.4;
const DEFAULT_EUCLIDEAN_THRESHOLD: f64 = 0.8;
const DEFAULT_SHORTLIST_SIZE: usize = 5;
const DEFAULT_PARALLEL_MIN_GALLERY: usize = 2048;
const MAX_COSINE_THRESHOLD: f64 = 1.0;
const MAX_EUCLIDEAN_THRESHOLD: f64 = 2.0;
/// Entries scored between deadline checks.
const SCAN_CHUNK: usize = 1024;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("no usable face features in probe ({0}); capture a clearer photo")]
    InvalidProbe(VectorDefect),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("scan aborted after {elapsed:?} ({scanned} of {total} entries scored)")]
    Timeout {
        elapsed: Duration,
        scanned: usize,
        total: usize,
    },
    #[error("invalid match config: {0}")]
    InvalidConfig(String),
    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodingError),
}

impl RecognitionError {
    /// Infrastructure failures worth retrying; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RecognitionError::Gallery(GalleryError::Load(_))
                | RecognitionError::Timeout { .. }
                | RecognitionError::Encoding(EncodingError::Unavailable(_))
        )
    }
}

/// How to order candidates whose cosine distance is exactly equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// First entry in gallery fetch order wins.
    #[default]
    GalleryOrder,
    /// Lexicographically smallest identity id wins.
    IdentityId,
}

/// Decision thresholds and scan tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Maximum cosine distance for a primary accept. Lower is stricter.
    pub cosine_threshold: f64,
    /// Maximum normalized euclidean distance for a fallback accept.
    pub euclidean_threshold: f64,
    pub shortlist_size: usize,
    pub tie_break: TieBreak,
    /// Galleries at least this large are scored on the rayon pool.
    pub parallel_min_gallery: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            cosine_threshold: DEFAULT_COSINE_THRESHOLD,
            euclidean_threshold: DEFAULT_EUCLIDEAN_THRESHOLD,
            shortlist_size: DEFAULT_SHORTLIST_SIZE,
            tie_break: TieBreak::GalleryOrder,
            parallel_min_gallery: DEFAULT_PARALLEL_MIN_GALLERY,
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<(), RecognitionError> {
        // Upper bounds keep every accepted candidate's confidence in [0, 100].
        for (name, value, max) in [
            ("cosine_threshold", self.cosine_threshold, MAX_COSINE_THRESHOLD),
            ("euclidean_threshold", self.euclidean_threshold, MAX_EUCLIDEAN_THRESHOLD),
        ] {
            if !(0.0..=max).contains(&value) {
                return Err(RecognitionError::InvalidConfig(format!(
                    "{name} must be between 0 and {max}, got {value}"
                )));
            }
        }
        if self.shortlist_size == 0 {
            return Err(RecognitionError::InvalidConfig(
                "shortlist_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Wall-clock budget for one scan.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn expired(&self) -> bool {
        self.elapsed() >= self.budget
    }
}

/// Strategy for comparing a probe against a gallery of enrolled identities.
pub trait Matcher {
    fn compare(
        &self,
        probe: &FeatureVector,
        gallery: &[GalleryEntry],
        deadline: Option<&Deadline>,
    ) -> Result<RecognitionOutcome, RecognitionError>;
}

/// Cosine-first matcher that falls back to normalized euclidean distance.
#[derive(Debug, Clone, Default)]
pub struct TwoTierMatcher {
    pub config: MatchConfig,
}

impl TwoTierMatcher {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }
}

impl Matcher for TwoTierMatcher {
    fn compare(
        &self,
        probe: &FeatureVector,
        gallery: &[GalleryEntry],
        deadline: Option<&Deadline>,
    ) -> Result<RecognitionOutcome, RecognitionError> {
        match_probe_within(probe, gallery, &self.config, deadline)
    }
}

/// Match `probe` against every entry of `gallery` with no time bound.
pub fn match_probe(
    probe: &FeatureVector,
    gallery: &[GalleryEntry],
    config: &MatchConfig,
) -> Result<RecognitionOutcome, RecognitionError> {
    match_probe_within(probe, gallery, config, None)
}

/// Match `probe` against `gallery`, aborting with
/// [`RecognitionError::Timeout`] once `deadline` passes.
///
/// A "no match" is an `Ok` outcome with `matched == false`. Errors are
/// reserved for an unusable probe, a bad config or an expired deadline.
pub fn match_probe_within(
    probe: &FeatureVector,
    gallery: &[GalleryEntry],
    config: &MatchConfig,
    deadline: Option<&Deadline>,
) -> Result<RecognitionOutcome, RecognitionError> {
    probe.validate().map_err(RecognitionError::InvalidProbe)?;
    config.validate()?;

    let mut scored = scan(probe, gallery, config, deadline)?;
    let skipped = gallery.len() - scored.len();
    if skipped > 0 {
        tracing::debug!(
            skipped,
            probe_dim = probe.len(),
            "gallery entries skipped for dimension mismatch"
        );
    }

    if scored.is_empty() {
        tracing::info!(gallery = gallery.len(), "no comparable gallery entries");
        return Ok(RecognitionOutcome::no_candidates(
            gallery.len(),
            config.cosine_threshold,
            skipped,
        ));
    }

    // Sorting on (distance, tie-break key) is independent of scan order, so
    // parallel and sequential scans rank identically. The first element is
    // the argmin.
    scored.sort_by(|a, b| rank_order(a, b, gallery, config.tie_break));
    let (best_idx, best_metrics) = scored[0];
    let best = best_metrics.attach(&gallery[best_idx]);

    let ranked_candidates: Vec<CandidateScore> = scored
        .iter()
        .take(config.shortlist_size)
        .map(|&(idx, m)| m.attach(&gallery[idx]))
        .collect();

    let mut diagnostics = Diagnostics {
        gallery_size_checked: gallery.len(),
        threshold_used: config.cosine_threshold,
        best_match_distance: None,
        skipped_entries: skipped,
    };

    let (matched, method, confidence) = if best.cosine_distance < config.cosine_threshold {
        (true, MatchMethod::Cosine, round2(best.cosine_similarity * 100.0))
    } else if best.euclidean_distance < config.euclidean_threshold {
        diagnostics.threshold_used = config.euclidean_threshold;
        (
            true,
            MatchMethod::EuclideanFallback,
            round2((1.0 - best.euclidean_distance / 2.0) * 100.0),
        )
    } else {
        diagnostics.best_match_distance = Some(best.cosine_distance);
        (false, MatchMethod::None, 0.0)
    };

    if matched {
        tracing::info!(
            identity = %best.entry.identity_id,
            method = method.as_str(),
            confidence,
            cosine_distance = best.cosine_distance,
            euclidean_distance = best.euclidean_distance,
            "probe matched"
        );
    } else {
        tracing::info!(
            best_distance = best.cosine_distance,
            threshold = config.cosine_threshold,
            gallery = gallery.len(),
            "no match above threshold"
        );
    }

    Ok(RecognitionOutcome {
        matched,
        best: Some(best),
        confidence,
        method,
        ranked_candidates,
        diagnostics,
    })
}

/// Score every entry, keeping its gallery index. Mismatched entries are
/// left out.
fn scan(
    probe: &FeatureVector,
    gallery: &[GalleryEntry],
    config: &MatchConfig,
    deadline: Option<&Deadline>,
) -> Result<Vec<(usize, Metrics)>, RecognitionError> {
    let parallel = gallery.len() >= config.parallel_min_gallery;
    let probe = probe.as_slice();
    let mut scored = Vec::with_capacity(gallery.len());

    for (chunk_idx, chunk) in gallery.chunks(SCAN_CHUNK).enumerate() {
        if let Some(deadline) = deadline {
            if deadline.expired() {
                let scanned = chunk_idx * SCAN_CHUNK;
                tracing::warn!(scanned, total = gallery.len(), "match deadline exceeded");
                return Err(RecognitionError::Timeout {
                    elapsed: deadline.elapsed(),
                    scanned,
                    total: gallery.len(),
                });
            }
        }

        let base = chunk_idx * SCAN_CHUNK;
        let score_one = |(offset, entry): (usize, &GalleryEntry)| {
            scorer::metrics(probe, entry.feature_vector.as_slice()).map(|m| (base + offset, m))
        };
        if parallel {
            let part: Vec<(usize, Metrics)> =
                chunk.par_iter().enumerate().filter_map(score_one).collect();
            scored.extend(part);
        } else {
            scored.extend(chunk.iter().enumerate().filter_map(score_one));
        }
    }

    Ok(scored)
}

fn rank_order(
    a: &(usize, Metrics),
    b: &(usize, Metrics),
    gallery: &[GalleryEntry],
    tie_break: TieBreak,
) -> Ordering {
    a.1.cosine_distance
        .total_cmp(&b.1.cosine_distance)
        .then_with(|| match tie_break {
            TieBreak::GalleryOrder => Ordering::Equal,
            TieBreak::IdentityId => gallery[a.0].identity_id.cmp(&gallery[b.0].identity_id),
        })
        .then_with(|| a.0.cmp(&b.0))
}

/// Round to two decimal places, half away from zero.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
