//! Real-time multi-dimensional similarity scoring
//!
//! Combines the DTW alignment distance with volume matching, temporal
//! coverage, and a (currently neutral) pitch slot into one weighted score
//! with confidence, trend, and plain-language feedback.
//!
//! The scorer is a pure accumulator: it never touches audio or features
//! itself. The pipeline feeds it one [`ScoreInputs`] per processed chunk
//! and it maintains the current score, the peak, and a bounded history ring
//! for trend analysis.

use serde::Serialize;
use std::collections::VecDeque;
use tracing::trace;

/// Configuration for the scorer. Weights must sum to 1.0 within 0.01.
#[derive(Debug, Clone)]
pub struct RealtimeScorerConfig {
    pub sample_rate_hz: u32,

    /// Weight of the MFCC/DTW pattern subscore.
    pub mfcc_weight: f32,

    /// Weight of the volume-matching subscore.
    pub volume_weight: f32,

    /// Weight of the timing subscore.
    pub timing_weight: f32,

    /// Weight of the pitch subscore.
    pub pitch_weight: f32,

    /// Minimum confidence for a score to be flagged reliable.
    pub confidence_threshold: f32,

    /// Minimum overall score to be flagged a match.
    pub min_score_for_match: f32,

    /// Pitch analysis toggle; the subscore stays neutral until an analyzer
    /// lands, so this only affects reporting.
    pub enable_pitch_analysis: bool,

    /// Bounded history length for trend analysis.
    pub scoring_history_size: usize,

    /// Scaling k in `1 / (1 + k * dtw_distance)`. 10.0 maps identical
    /// sequences close to 1.0; the old value of 100 made perfect matches
    /// read as ~0.88.
    pub dtw_distance_scaling: f32,

    /// Samples needed before confidence saturates; defaults to half a
    /// second at the configured rate.
    pub min_samples_for_confidence: usize,

    /// Relative tolerance for the volume ratio before exponential falloff.
    pub volume_tolerance: f32,
}

impl RealtimeScorerConfig {
    pub fn new(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            mfcc_weight: 0.5,
            volume_weight: 0.2,
            timing_weight: 0.2,
            pitch_weight: 0.1,
            confidence_threshold: 0.7,
            min_score_for_match: 0.005,
            enable_pitch_analysis: false,
            scoring_history_size: 50,
            dtw_distance_scaling: 10.0,
            min_samples_for_confidence: (sample_rate_hz / 2) as usize,
            volume_tolerance: 0.3,
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.sample_rate_hz == 0 {
            return Err("sample rate must be positive");
        }
        let total =
            self.mfcc_weight + self.volume_weight + self.timing_weight + self.pitch_weight;
        if (total - 1.0).abs() > 0.01 {
            return Err("subscore weights must sum to 1.0");
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err("confidence_threshold must lie in [0, 1]");
        }
        if self.min_score_for_match < 0.0 {
            return Err("min_score_for_match must be non-negative");
        }
        if self.scoring_history_size == 0 {
            return Err("scoring_history_size must be positive");
        }
        if self.dtw_distance_scaling <= 0.0 {
            return Err("dtw_distance_scaling must be positive");
        }
        if self.volume_tolerance <= 0.0 {
            return Err("volume_tolerance must be positive");
        }
        Ok(())
    }
}

impl Default for RealtimeScorerConfig {
    fn default() -> Self {
        Self::new(44_100)
    }
}

/// Detailed similarity score breakdown.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SimilarityScore {
    /// Weighted blend of the subscores.
    pub overall: f32,

    /// MFCC/DTW pattern similarity.
    pub mfcc: f32,

    /// Volume-level matching.
    pub volume: f32,

    /// Timing / coverage accuracy.
    pub timing: f32,

    /// Pitch similarity (neutral until pitch analysis exists).
    pub pitch: f32,

    /// Confidence in the score, [0, 1].
    pub confidence: f32,

    /// Confidence cleared the configured threshold.
    pub is_reliable: bool,

    /// Overall score cleared the match threshold.
    pub is_match: bool,

    /// Samples used for this score.
    pub samples_analyzed: u64,

    /// Wall-clock timestamp, epoch milliseconds.
    pub timestamp_ms: u64,
}

impl Default for SimilarityScore {
    fn default() -> Self {
        Self {
            overall: 0.0,
            mfcc: 0.0,
            volume: 0.0,
            timing: 0.0,
            pitch: 0.0,
            confidence: 0.0,
            is_reliable: false,
            is_match: false,
            samples_analyzed: 0,
            timestamp_ms: 0,
        }
    }
}

/// Everything the scorer needs for one update, gathered by the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs {
    /// DTW distance against the master; infinite when either side is empty.
    pub dtw_distance: f32,

    /// Session loudness (smoothed RMS during streaming, true RMS at
    /// finalize).
    pub session_rms: f32,

    /// Master loudness captured at load.
    pub master_rms: f32,

    /// Feature vectors accumulated for the session.
    pub session_feature_count: usize,

    /// Feature vectors in the master sequence.
    pub master_feature_count: usize,

    /// Total session samples analyzed so far.
    pub samples_analyzed: u64,
}

/// Real-time feedback assembled for display.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeFeedback {
    pub current: SimilarityScore,

    /// Mean overall of the most recent scores.
    pub trending_overall: f32,

    /// Best overall seen since the last reset.
    pub peak_overall: f32,

    /// Coverage of the master call, [0, 1].
    pub progress: f32,

    pub quality_assessment: String,
    pub recommendation: String,
    pub is_improving: bool,
}

/// Number of recent scores averaged for the trending value.
const TREND_WINDOW: usize = 5;

/// Scores per side of the improvement comparison.
const IMPROVE_WINDOW: usize = 3;

/// Relative improvement required before `is_improving` reports true.
const IMPROVE_FACTOR: f32 = 1.1;

/// Progressive similarity scorer.
#[derive(Debug)]
pub struct RealtimeScorer {
    config: RealtimeScorerConfig,
    history: VecDeque<SimilarityScore>,
    current: SimilarityScore,
    peak: SimilarityScore,
    finalized: bool,
}

impl RealtimeScorer {
    pub fn new(config: RealtimeScorerConfig) -> Result<Self, &'static str> {
        config.validate()?;
        Ok(Self {
            history: VecDeque::with_capacity(config.scoring_history_size),
            current: SimilarityScore::default(),
            peak: SimilarityScore::default(),
            finalized: false,
            config,
        })
    }

    pub fn config(&self) -> &RealtimeScorerConfig {
        &self.config
    }

    /// Replace the configuration; the history is trimmed if it shrank.
    pub fn set_config(&mut self, config: RealtimeScorerConfig) -> Result<(), &'static str> {
        config.validate()?;
        while self.history.len() > config.scoring_history_size {
            self.history.pop_back();
        }
        self.config = config;
        Ok(())
    }

    /// Blend one set of inputs into a new current score.
    pub fn update(&mut self, inputs: ScoreInputs) -> SimilarityScore {
        let mfcc = self.mfcc_similarity(inputs.dtw_distance);
        let volume = volume_similarity(
            inputs.session_rms,
            inputs.master_rms,
            self.config.volume_tolerance,
        );
        let timing = timing_accuracy(inputs.session_feature_count, inputs.master_feature_count);
        let pitch = 0.5; // neutral until pitch analysis is implemented

        let overall = self.config.mfcc_weight * mfcc
            + self.config.volume_weight * volume
            + self.config.timing_weight * timing
            + self.config.pitch_weight * pitch;

        let signal_quality = (inputs.session_rms * 10.0).min(1.0);
        let confidence = confidence(
            inputs.samples_analyzed,
            signal_quality,
            self.config.min_samples_for_confidence,
        );

        let score = SimilarityScore {
            overall,
            mfcc,
            volume,
            timing,
            pitch,
            confidence,
            is_reliable: confidence >= self.config.confidence_threshold,
            is_match: overall >= self.config.min_score_for_match,
            samples_analyzed: inputs.samples_analyzed,
            timestamp_ms: bugle_common::time::epoch_millis(),
        };

        trace!(
            overall = score.overall,
            mfcc = score.mfcc,
            volume = score.volume,
            confidence = score.confidence,
            "score updated"
        );

        self.current = score;
        if score.overall > self.peak.overall {
            self.peak = score;
        }

        self.history.push_front(score);
        while self.history.len() > self.config.scoring_history_size {
            self.history.pop_back();
        }

        score
    }

    fn mfcc_similarity(&self, dtw_distance: f32) -> f32 {
        if !dtw_distance.is_finite() {
            return 0.0;
        }
        (1.0 / (1.0 + self.config.dtw_distance_scaling * dtw_distance)).max(0.0)
    }

    /// Latest blended score.
    pub fn current(&self) -> SimilarityScore {
        self.current
    }

    /// Best score since the last reset.
    pub fn peak(&self) -> SimilarityScore {
        self.peak
    }

    /// Most-recent-first history copy, at most `max_count` (0 = all).
    pub fn history(&self, max_count: usize) -> Vec<SimilarityScore> {
        let count = if max_count == 0 {
            self.history.len()
        } else {
            max_count.min(self.history.len())
        };
        self.history.iter().take(count).copied().collect()
    }

    /// Mean overall of the most recent scores.
    pub fn trending_overall(&self) -> f32 {
        if self.history.is_empty() {
            return 0.0;
        }
        let count = TREND_WINDOW.min(self.history.len());
        self.history.iter().take(count).map(|s| s.overall).sum::<f32>() / count as f32
    }

    /// True when the mean of the newest scores beats the mean of the three
    /// before them by at least 10%.
    pub fn is_improving(&self) -> bool {
        if self.history.len() < IMPROVE_WINDOW + 1 {
            return false;
        }

        let recent_count = IMPROVE_WINDOW.min(self.history.len());
        let older_count = IMPROVE_WINDOW.min(self.history.len() - recent_count);
        if older_count == 0 {
            return false;
        }

        let recent: f32 = self
            .history
            .iter()
            .take(recent_count)
            .map(|s| s.overall)
            .sum::<f32>()
            / recent_count as f32;
        let older: f32 = self
            .history
            .iter()
            .skip(recent_count)
            .take(older_count)
            .map(|s| s.overall)
            .sum::<f32>()
            / older_count as f32;

        recent > older * IMPROVE_FACTOR
    }

    /// Assemble the feedback view; `progress` is coverage of the master.
    pub fn feedback(&self, progress: f32) -> RealtimeFeedback {
        RealtimeFeedback {
            current: self.current,
            trending_overall: self.trending_overall(),
            peak_overall: self.peak.overall,
            progress: progress.clamp(0.0, 1.0),
            quality_assessment: quality_description(self.current.overall).to_string(),
            recommendation: self.recommendation(),
            is_improving: self.is_improving(),
        }
    }

    fn recommendation(&self) -> String {
        let score = &self.current;
        if score.overall >= self.config.min_score_for_match {
            if score.mfcc < score.volume {
                "Good volume matching! Focus on call pattern and timing.".to_string()
            } else if score.volume < score.mfcc {
                "Good call pattern! Adjust your volume level.".to_string()
            } else {
                "Excellent technique! Keep it consistent.".to_string()
            }
        } else if score.mfcc < 0.002 {
            "Focus on matching the call pattern and pitch contour.".to_string()
        } else if score.volume < 0.5 {
            "Adjust your volume to better match the master call.".to_string()
        } else {
            "Work on timing and overall consistency.".to_string()
        }
    }

    /// Whether `finalize` was applied.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn mark_finalized(&mut self) {
        self.finalized = true;
    }

    /// Clear per-run state; master-related inputs are owned by the session
    /// and survive.
    pub fn reset(&mut self) {
        self.history.clear();
        self.current = SimilarityScore::default();
        self.peak = SimilarityScore::default();
        self.finalized = false;
    }
}

/// Quality label for an overall score.
pub fn quality_description(overall: f32) -> &'static str {
    if overall >= 0.020 {
        "Excellent match"
    } else if overall >= 0.010 {
        "Very good match"
    } else if overall >= 0.005 {
        "Good match"
    } else if overall >= 0.002 {
        "Fair match"
    } else {
        "Needs improvement"
    }
}

/// Volume similarity from the session/master RMS ratio.
///
/// Inside the tolerance band the score falls linearly from 1; outside it
/// decays exponentially. A silent master scores 0 (nothing to match).
fn volume_similarity(session_rms: f32, master_rms: f32, tolerance: f32) -> f32 {
    if master_rms <= 0.0 {
        return 0.0;
    }
    let difference = (1.0 - session_rms / master_rms).abs();
    if difference <= tolerance {
        1.0 - difference / tolerance
    } else {
        (-(difference - tolerance) * 2.0).exp()
    }
}

/// Length-ratio proxy for timing accuracy; both sides empty is neutral.
fn timing_accuracy(session_frames: usize, master_frames: usize) -> f32 {
    if session_frames == 0 && master_frames == 0 {
        return 0.5;
    }
    if master_frames == 0 {
        return 0.0;
    }
    let ratio = session_frames as f32 / master_frames as f32;
    (1.0 - (1.0 - ratio).abs()).clamp(0.0, 1.0)
}

/// Confidence from data quantity and signal quality; the square root keeps
/// early progression smooth.
fn confidence(samples_analyzed: u64, signal_quality: f32, min_samples: usize) -> f32 {
    if samples_analyzed == 0 || min_samples == 0 {
        return 0.0;
    }
    let quantity = (samples_analyzed as f32 / min_samples as f32).min(1.0);
    let quality = signal_quality.clamp(0.0, 1.0);
    (quantity * quality).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> RealtimeScorer {
        RealtimeScorer::new(RealtimeScorerConfig::default()).unwrap()
    }

    fn good_inputs() -> ScoreInputs {
        ScoreInputs {
            dtw_distance: 0.0,
            session_rms: 0.3,
            master_rms: 0.3,
            session_feature_count: 100,
            master_feature_count: 100,
            samples_analyzed: 44_100,
        }
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut config = RealtimeScorerConfig::default();
        config.mfcc_weight = 0.9;
        assert!(RealtimeScorer::new(config).is_err());
    }

    #[test]
    fn perfect_inputs_score_near_one() {
        let mut s = scorer();
        let score = s.update(good_inputs());

        assert!((score.mfcc - 1.0).abs() < 1e-6);
        assert!((score.volume - 1.0).abs() < 1e-6);
        assert!((score.timing - 1.0).abs() < 1e-6);
        assert_eq!(score.pitch, 0.5);
        // 0.5 + 0.2 + 0.2 + 0.05 = 0.95
        assert!(score.overall >= 0.95);
        assert!(score.is_match);
        assert!(score.is_reliable);
    }

    #[test]
    fn infinite_distance_zeroes_the_mfcc_subscore() {
        let mut s = scorer();
        let score = s.update(ScoreInputs {
            dtw_distance: f32::INFINITY,
            ..good_inputs()
        });
        assert_eq!(score.mfcc, 0.0);
        assert!(score.overall < 0.95);
    }

    #[test]
    fn distance_scaling_controls_the_mapping() {
        let mut s = scorer();
        // k = 10, d = 0.1: 1 / (1 + 1) = 0.5
        let score = s.update(ScoreInputs {
            dtw_distance: 0.1,
            ..good_inputs()
        });
        assert!((score.mfcc - 0.5).abs() < 1e-6);
    }

    #[test]
    fn volume_similarity_band_and_falloff() {
        // Exact match.
        assert!((volume_similarity(0.3, 0.3, 0.3) - 1.0).abs() < 1e-6);
        // 15% off inside the band: 1 - 0.15/0.3 = 0.5.
        assert!((volume_similarity(0.255, 0.3, 0.3) - 0.5).abs() < 1e-3);
        // Far outside the band decays but stays positive.
        let far = volume_similarity(0.03, 0.3, 0.3);
        assert!(far > 0.0 && far < 0.35);
        // Silent master.
        assert_eq!(volume_similarity(0.3, 0.0, 0.3), 0.0);
    }

    #[test]
    fn timing_accuracy_cases() {
        assert_eq!(timing_accuracy(0, 0), 0.5);
        assert_eq!(timing_accuracy(0, 50), 0.0);
        assert!((timing_accuracy(50, 50) - 1.0).abs() < 1e-6);
        assert!((timing_accuracy(25, 50) - 0.5).abs() < 1e-6);
        // Overshoot clamps at zero once the ratio passes 2.
        assert_eq!(timing_accuracy(150, 50), 0.0);
    }

    #[test]
    fn confidence_needs_quantity_and_quality() {
        assert_eq!(confidence(0, 1.0, 22_050), 0.0);
        // Full quantity, full quality.
        assert!((confidence(44_100, 1.0, 22_050) - 1.0).abs() < 1e-6);
        // Half quantity: sqrt(0.5) ~ 0.707.
        assert!((confidence(11_025, 1.0, 22_050) - 0.7071).abs() < 1e-3);
        // Quality zero kills confidence regardless of quantity.
        assert_eq!(confidence(44_100, 0.0, 22_050), 0.0);
    }

    #[test]
    fn low_signal_is_unreliable() {
        let mut s = scorer();
        let score = s.update(ScoreInputs {
            session_rms: 0.005, // signal quality 0.05
            ..good_inputs()
        });
        assert!(score.confidence < 0.7);
        assert!(!score.is_reliable);
    }

    #[test]
    fn peak_tracks_best_score() {
        let mut s = scorer();
        s.update(ScoreInputs {
            dtw_distance: 1.0,
            ..good_inputs()
        });
        let best = s.update(good_inputs());
        s.update(ScoreInputs {
            dtw_distance: 5.0,
            ..good_inputs()
        });

        assert_eq!(s.peak().overall, best.overall);
        assert!(s.current().overall < best.overall);
    }

    #[test]
    fn history_is_bounded_and_recent_first() {
        let mut config = RealtimeScorerConfig::default();
        config.scoring_history_size = 4;
        let mut s = RealtimeScorer::new(config).unwrap();

        for i in 0..10 {
            s.update(ScoreInputs {
                dtw_distance: i as f32,
                ..good_inputs()
            });
        }

        let history = s.history(0);
        assert_eq!(history.len(), 4);
        // Distances rose, so overall fell: the newest (front) is lowest.
        assert!(history[0].overall < history[3].overall);
        assert_eq!(s.history(2).len(), 2);
    }

    #[test]
    fn improvement_detection() {
        let mut s = scorer();
        // Three mediocre scores, then three strong ones.
        for _ in 0..3 {
            s.update(ScoreInputs {
                dtw_distance: 3.0,
                ..good_inputs()
            });
        }
        for _ in 0..3 {
            s.update(good_inputs());
        }
        assert!(s.is_improving());

        // Flat history is not improvement.
        let mut flat = scorer();
        for _ in 0..6 {
            flat.update(good_inputs());
        }
        assert!(!flat.is_improving());
    }

    #[test]
    fn quality_thresholds() {
        assert_eq!(quality_description(0.05), "Excellent match");
        assert_eq!(quality_description(0.012), "Very good match");
        assert_eq!(quality_description(0.006), "Good match");
        assert_eq!(quality_description(0.003), "Fair match");
        assert_eq!(quality_description(0.0001), "Needs improvement");
    }

    #[test]
    fn feedback_assembles_all_fields() {
        let mut s = scorer();
        s.update(good_inputs());
        let fb = s.feedback(0.5);

        assert_eq!(fb.progress, 0.5);
        assert_eq!(fb.quality_assessment, "Excellent match");
        assert!(!fb.recommendation.is_empty());
        assert!(fb.peak_overall >= fb.current.overall);
    }

    #[test]
    fn reset_clears_run_state() {
        let mut s = scorer();
        s.update(good_inputs());
        s.mark_finalized();
        s.reset();

        assert_eq!(s.current().overall, 0.0);
        assert_eq!(s.peak().overall, 0.0);
        assert!(s.history(0).is_empty());
        assert!(!s.is_finalized());
    }

    #[test]
    fn scores_serialize_to_json() {
        let mut s = scorer();
        let score = s.update(good_inputs());
        let json = serde_json::to_string(&score).unwrap();
        assert!(json.contains("\"overall\""));
        assert!(json.contains("\"confidence\""));
        assert!(json.contains("\"isMatch\"") || json.contains("\"is_match\""));
    }
}
