//! rollcall-core — Biometric matching for the attendance portal.
//!
//! Scores a probe embedding against every enrolled identity, accepts on
//! cosine distance first and falls back to normalized euclidean distance.
//! Feature extraction and storage live outside this crate.

pub mod codec;
pub mod encoder;
pub mod gallery;
pub mod math;
pub mod matcher;
pub mod recognize;
pub mod scorer;
pub mod types;

pub use codec::{JsonCodec, VectorCodec};
pub use encoder::{Encoder, EncodingError, PrecomputedEncoder};
pub use gallery::{GalleryError, GallerySnapshot, GallerySource, StoredEntry};
pub use matcher::{
    match_probe, match_probe_within, Deadline, MatchConfig, Matcher, RecognitionError, TieBreak,
    TwoTierMatcher,
};
pub use recognize::{recognize, recognize_probe};
pub use types::{
    CandidateScore, Diagnostics, FeatureVector, GalleryEntry, GroupLabels, MatchMethod,
    OutcomeDocument, RecognitionOutcome,
};
