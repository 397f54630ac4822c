//! Read-only snapshot views
//!
//! Structured views assembled from session state for dashboards and
//! exports. All types serialize with serde; the JSON helpers exist for
//! callers that want strings rather than structs.

use crate::audio::levels::LevelMeasurement;
use crate::audio::spectrogram::{SpectrogramConfig, SpectrogramData, SpectrogramProcessor};
use crate::audio::waveform::{decimate, WaveformConfig, WaveformData};
use crate::engine::core::Engine;
use crate::error::{EngineError, Result};
use crate::scoring::{RealtimeFeedback, SimilarityScore};
use bugle_common::SessionId;
use serde::Serialize;

/// Lightweight realtime state: counters and the latest blended values.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeSimilarityState {
    pub frames_observed: u64,
    pub frames_dropped: u64,
    pub samples_analyzed: u64,
    pub last_similarity: f32,
    pub peak_similarity: f32,
    pub finalized: bool,
    pub first_voice_frame: Option<u64>,
    pub last_voice_frame: Option<u64>,
}

/// Score summary for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityScoresSnapshot {
    pub current: SimilarityScore,

    /// Mean overall of the recent history.
    pub trending: f32,

    /// Best overall since reset.
    pub peak: f32,

    /// Coverage of the master call, [0, 1].
    pub progress: f32,

    pub is_reliable: bool,
    pub is_match: bool,
}

/// Qualitative guidance for the user.
#[derive(Debug, Clone, Serialize)]
pub struct CoachingFeedback {
    pub quality_assessment: String,
    pub recommendation: String,
    pub is_improving: bool,
}

/// Aggregated confidences from the enhanced analyzers.
///
/// The analyzers themselves are external; until one reports in, the
/// confidences stay at zero and `enabled` only reflects the toggle.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EnhancedAnalysisSummary {
    pub enabled: bool,
    pub pitch_confidence: f32,
    pub harmonic_confidence: f32,
    pub tempo_confidence: f32,
}

/// Decimated user and master waveforms for overlay display.
#[derive(Debug, Clone, Serialize)]
pub struct WaveformOverlayData {
    pub user: WaveformData,
    pub master: WaveformData,
}

impl Engine {
    /// Counters plus the latest blended similarity values.
    pub fn realtime_similarity_state(&self, id: SessionId) -> Result<RealtimeSimilarityState> {
        self.with_session(id, |session| {
            Ok(RealtimeSimilarityState {
                frames_observed: session.frames_observed,
                frames_dropped: session.frames_dropped,
                samples_analyzed: session.sample_count,
                last_similarity: session.scorer.current().overall,
                peak_similarity: session.scorer.peak().overall,
                finalized: session.scorer.is_finalized(),
                first_voice_frame: session.first_voice_frame,
                last_voice_frame: session.last_voice_frame,
            })
        })
    }

    /// Current / trending / peak scores with progress and flags.
    pub fn similarity_scores_snapshot(&self, id: SessionId) -> Result<SimilarityScoresSnapshot> {
        self.with_session(id, |session| {
            let current = session.scorer.current();
            Ok(SimilarityScoresSnapshot {
                trending: session.scorer.trending_overall(),
                peak: session.scorer.peak().overall,
                progress: session.progress(),
                is_reliable: current.is_reliable,
                is_match: current.is_match,
                current,
            })
        })
    }

    /// Full feedback view (scores plus text guidance).
    pub fn realtime_feedback(&self, id: SessionId) -> Result<RealtimeFeedback> {
        self.with_session(id, |session| {
            let progress = session.progress();
            Ok(session.scorer.feedback(progress))
        })
    }

    /// Text guidance only.
    pub fn coaching_feedback(&self, id: SessionId) -> Result<CoachingFeedback> {
        self.with_session(id, |session| {
            let feedback = session.scorer.feedback(session.progress());
            Ok(CoachingFeedback {
                quality_assessment: feedback.quality_assessment,
                recommendation: feedback.recommendation,
                is_improving: feedback.is_improving,
            })
        })
    }

    /// Enhanced-analyzer confidences (neutral until analyzers report).
    pub fn enhanced_analysis_summary(&self, id: SessionId) -> Result<EnhancedAnalysisSummary> {
        self.with_session(id, |session| {
            Ok(EnhancedAnalysisSummary {
                enabled: session.enhanced_analyzers_enabled,
                ..Default::default()
            })
        })
    }

    /// Decimated session and master waveforms for overlay display.
    pub fn waveform_overlay_data(
        &self,
        id: SessionId,
        max_points: usize,
    ) -> Result<WaveformOverlayData> {
        self.with_session(id, |session| {
            let config = WaveformConfig::default();
            let user = session.waveform.overlay(max_points);
            let master = session
                .master
                .as_ref()
                .map(|m| decimate(&m.samples, max_points, &config))
                .unwrap_or_default();
            Ok(WaveformOverlayData { user, master })
        })
    }

    /// STFT magnitude map of the session's recent audio ring, strided to
    /// at most `max_time_bins` x `max_freq_bins` (0 = no limit).
    ///
    /// Needs at least one analysis window of audio; before that the call
    /// reports `InsufficientData`.
    pub fn spectrogram_data(
        &self,
        id: SessionId,
        max_time_bins: usize,
        max_freq_bins: usize,
    ) -> Result<SpectrogramData> {
        self.with_session(id, |session| {
            let config = SpectrogramConfig {
                sample_rate_hz: session.sample_rate_hz,
                ..Default::default()
            };
            let samples = session.waveform.snapshot();
            if samples.len() < config.window_size {
                return Err(EngineError::InsufficientData(session.id));
            }

            let mut processor = SpectrogramProcessor::new(config)?;
            let data = processor.compute(&samples)?;
            Ok(data.downsampled(max_time_bins, max_freq_bins))
        })
    }

    /// Most-recent-first score history, at most `max_count` (0 = all).
    pub fn scoring_history(&self, id: SessionId, max_count: usize) -> Result<Vec<SimilarityScore>> {
        self.with_session(id, |session| Ok(session.scorer.history(max_count)))
    }

    /// Current smoothed levels.
    pub fn level_snapshot(&self, id: SessionId) -> Result<LevelMeasurement> {
        self.with_session(id, |session| Ok(session.levels.current()))
    }

    /// Most-recent-first level history, at most `max_count` (0 = all).
    pub fn level_history(&self, id: SessionId, max_count: usize) -> Result<Vec<LevelMeasurement>> {
        self.with_session(id, |session| Ok(session.levels.history(max_count)))
    }

    // ---- JSON export helpers -------------------------------------------

    /// Current score as a JSON string.
    pub fn export_score_json(&self, id: SessionId) -> Result<String> {
        let current = self.with_session(id, |session| Ok(session.scorer.current()))?;
        serde_json::to_string(&current)
            .map_err(|e| crate::error::EngineError::ProcessingFailed(e.to_string()))
    }

    /// Full feedback view as a JSON string.
    pub fn export_feedback_json(&self, id: SessionId) -> Result<String> {
        let feedback = self.realtime_feedback(id)?;
        serde_json::to_string(&feedback)
            .map_err(|e| crate::error::EngineError::ProcessingFailed(e.to_string()))
    }

    /// Score history as a JSON array string.
    pub fn export_history_json(&self, id: SessionId, max_count: usize) -> Result<String> {
        let history = self.scoring_history(id, max_count)?;
        serde_json::to_string(&history)
            .map_err(|e| crate::error::EngineError::ProcessingFailed(e.to_string()))
    }

    /// Spectrogram of the recent audio ring as a JSON string.
    pub fn export_spectrogram_json(
        &self,
        id: SessionId,
        max_time_bins: usize,
        max_freq_bins: usize,
    ) -> Result<String> {
        let data = self.spectrogram_data(id, max_time_bins, max_freq_bins)?;
        serde_json::to_string(&data)
            .map_err(|e| crate::error::EngineError::ProcessingFailed(e.to_string()))
    }
}
