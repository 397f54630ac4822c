//! Per-session processing state
//!
//! Everything one concurrent call stream owns: configuration, analyzers,
//! accumulated features, the master call, and the recording/playback
//! state. Sessions never share mutable state; the facade guarantees at
//! most one thread is inside a session at a time.

use crate::audio::dtw::{DtwComparator, DtwConfig};
use crate::audio::levels::{LevelConfig, LevelMeter};
use crate::audio::mfcc::{FeatureSeq, MfccConfig, MfccExtractor};
use crate::audio::vad::{VadConfig, VoiceActivityDetector};
use crate::audio::waveform::{WaveformBuffer, WaveformConfig};
use crate::error::EngineError;
use crate::master_call::MasterCall;
use crate::playback::{NullPlayer, Player};
use crate::recording::SessionRecorder;
use crate::scoring::{RealtimeScorer, RealtimeScorerConfig};
use bugle_common::SessionId;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::debug;

/// Multiplier on the master length bounding the live DTW window.
///
/// Per-chunk comparisons use the session-feature suffix of
/// `LIVE_WINDOW_FACTOR * master_len` frames so cost stays proportional to
/// the master length however long the session runs.
pub(crate) const LIVE_WINDOW_FACTOR: usize = 2;

/// State owned by a single session.
pub(crate) struct SessionState {
    pub id: SessionId,
    pub sample_rate_hz: u32,
    pub created_at: Instant,

    // Analyzers; frame size, hop, and sample rate are fixed for the
    // session's lifetime.
    pub mfcc: MfccExtractor,
    pub vad: VoiceActivityDetector,
    pub vad_enabled: bool,
    pub dtw: DtwComparator,
    pub levels: LevelMeter,
    pub scorer: RealtimeScorer,

    pub master: Option<MasterCall>,

    // Accumulated feature sequence and counters.
    pub session_features: FeatureSeq,
    /// Frames handed to the extraction stage (including rejected ones).
    pub frames_observed: u64,
    /// Frames rejected for non-finite output.
    pub frames_dropped: u64,
    pub first_voice_frame: Option<u64>,
    pub last_voice_frame: Option<u64>,

    /// Samples awaiting framing; straddles chunk boundaries.
    pub carry: Vec<f32>,
    /// Recent gated-out samples, replayed into `carry` when the gate opens
    /// so call onsets survive the VAD's candidate phase.
    pub pre_roll: VecDeque<f32>,

    // Whole-session accumulators for true RMS at finalize.
    pub sum_squares: f64,
    pub sample_count: u64,

    pub finalize_fallback_threshold: f32,
    pub finalize_fallback_used: bool,
    /// Reported score after finalize (fallback-substituted when used).
    pub finalized_score: Option<f32>,

    pub waveform: WaveformBuffer,
    pub recorder: SessionRecorder,
    pub player: Box<dyn Player>,

    pub enhanced_analyzers_enabled: bool,
}

impl SessionState {
    pub fn new(id: SessionId, sample_rate_hz: u32) -> Result<Self, EngineError> {
        let mfcc_config = MfccConfig {
            sample_rate_hz,
            ..Default::default()
        };
        let mfcc = MfccExtractor::new(mfcc_config)
            .map_err(|e| EngineError::InitFailed(format!("mfcc: {e}")))?;

        let vad = VoiceActivityDetector::new(VadConfig::default(), sample_rate_hz)
            .map_err(|e| EngineError::InitFailed(format!("vad: {e}")))?;

        let levels = LevelMeter::new(LevelConfig {
            sample_rate_hz,
            ..Default::default()
        })
        .map_err(|e| EngineError::InitFailed(format!("levels: {e}")))?;

        let scorer = RealtimeScorer::new(RealtimeScorerConfig::new(sample_rate_hz))
            .map_err(|e| EngineError::InitFailed(format!("scorer: {e}")))?;

        debug!(%id, sample_rate_hz, "session state created");

        Ok(Self {
            id,
            sample_rate_hz,
            created_at: Instant::now(),
            mfcc,
            vad_enabled: true,
            vad,
            dtw: DtwComparator::new(DtwConfig::default()),
            levels,
            scorer,
            master: None,
            session_features: Vec::new(),
            frames_observed: 0,
            frames_dropped: 0,
            first_voice_frame: None,
            last_voice_frame: None,
            carry: Vec::new(),
            pre_roll: VecDeque::new(),
            sum_squares: 0.0,
            sample_count: 0,
            finalize_fallback_threshold: 0.70,
            finalize_fallback_used: false,
            finalized_score: None,
            waveform: WaveformBuffer::new(WaveformConfig::default()),
            recorder: SessionRecorder::new(sample_rate_hz),
            player: Box::new(NullPlayer::new()),
            enhanced_analyzers_enabled: false,
        })
    }

    /// Duration of audio processed so far, in seconds.
    pub fn audio_seconds(&self) -> f64 {
        self.sample_count as f64 / self.sample_rate_hz as f64
    }

    /// True RMS over everything processed so far.
    pub fn session_rms(&self) -> f32 {
        if self.sample_count == 0 {
            return 0.0;
        }
        (self.sum_squares / self.sample_count as f64).sqrt() as f32
    }

    /// Start index of the live-side DTW sequence: the feature suffix is
    /// bounded by the master length so per-chunk cost stays flat.
    pub fn live_window_start(&self) -> usize {
        let limit = match &self.master {
            Some(master) => (master.features.len() * LIVE_WINDOW_FACTOR).max(1),
            None => return 0,
        };
        self.session_features.len().saturating_sub(limit)
    }

    /// Coverage of the master call, [0, 1]; 0 without a master.
    pub fn progress(&self) -> f32 {
        let Some(master) = &self.master else { return 0.0 };
        let master_seconds =
            master.duration_seconds(self.mfcc.config().hop_size, self.sample_rate_hz);
        if master_seconds <= 0.0 {
            return 0.0;
        }
        (self.audio_seconds() as f32 / master_seconds).min(1.0)
    }

    /// Maximum pre-roll length in samples from the VAD config.
    pub fn pre_roll_limit(&self) -> usize {
        (self.vad.config().pre_buffer_ms / 1000.0 * self.sample_rate_hz as f32) as usize
    }

    /// Clear per-run state; the master call and configuration survive.
    pub fn reset_run_state(&mut self) {
        self.session_features.clear();
        self.frames_observed = 0;
        self.frames_dropped = 0;
        self.first_voice_frame = None;
        self.last_voice_frame = None;
        self.carry.clear();
        self.pre_roll.clear();
        self.sum_squares = 0.0;
        self.sample_count = 0;
        self.finalize_fallback_used = false;
        self.finalized_score = None;
        self.scorer.reset();
        self.vad.reset();
        self.levels.reset();
        self.waveform.clear();
        debug!(id = %self.id, "session run state reset");
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("id", &self.id)
            .field("sample_rate_hz", &self.sample_rate_hz)
            .field("frames_observed", &self.frames_observed)
            .field("features", &self.session_features.len())
            .field("master", &self.master.as_ref().map(|m| m.name.as_str()))
            .finish()
    }
}
