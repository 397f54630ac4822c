//! Similarity scoring
//!
//! Blends alignment distance, loudness matching, and temporal coverage into
//! the progressive score surfaced to callers.

pub mod realtime;

pub use realtime::{
    quality_description, RealtimeFeedback, RealtimeScorer, RealtimeScorerConfig, ScoreInputs,
    SimilarityScore,
};
