//! Engine facade module
//!
//! **Module structure:**
//! - `core.rs`: lifecycle, registry, dispatch, configuration knobs
//! - `session.rs`: per-session state
//! - `pipeline.rs`: the chunk processing pipeline and finalize path
//! - `views.rs`: read-only snapshot views and JSON export

mod core;
mod pipeline;
mod session;
mod views;

pub use self::core::Engine;
pub use views::{
    CoachingFeedback, EnhancedAnalysisSummary, RealtimeSimilarityState,
    SimilarityScoresSnapshot, WaveformOverlayData,
};
