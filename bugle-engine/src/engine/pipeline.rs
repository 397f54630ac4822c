//! Chunk processing pipeline
//!
//! The per-session path from raw samples to an updated similarity score:
//! level metering -> whole-session RMS accumulation -> VAD gating ->
//! framing from the carry buffer -> MFCC extraction -> windowed DTW against
//! the master -> scorer blend.
//!
//! Failure policy: a frame whose extraction produces non-finite values is
//! dropped, counted, and logged; the chunk still succeeds. Malformed
//! windows reaching the VAD or level meter fail the chunk with
//! `ProcessingFailed` but leave session state intact.

use crate::engine::session::SessionState;
use crate::error::{EngineError, Result};
use crate::scoring::ScoreInputs;
use tracing::{debug, warn};

impl SessionState {
    /// Process one chunk of mono samples through the full pipeline.
    ///
    /// An empty chunk is a successful no-op.
    pub fn process_chunk(&mut self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        self.levels
            .process_chunk(samples)
            .map_err(|e| EngineError::ProcessingFailed(format!("level meter: {e}")))?;

        self.sum_squares += samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>();
        self.sample_count += samples.len() as u64;

        // Recording mirrors the raw stream; a failing sink must not take
        // the analysis path down with it.
        if let Err(e) = self.recorder.observe(samples) {
            warn!(id = %self.id, error = %e, "recording sink error; continuing");
        }

        self.waveform.push_samples(samples);

        self.gate_into_carry(samples)?;
        self.extract_pending_frames();

        if self.master.is_some() {
            self.update_score();
        }

        Ok(())
    }

    /// Route samples through the VAD (when enabled) into the carry buffer.
    fn gate_into_carry(&mut self, samples: &[f32]) -> Result<()> {
        if !self.vad_enabled {
            self.carry.extend_from_slice(samples);
            return Ok(());
        }

        let window = self.vad.window_samples();
        let pre_roll_limit = self.pre_roll_limit();

        for piece in samples.chunks(window) {
            let decision = self
                .vad
                .process_window(piece)
                .map_err(|e| EngineError::ProcessingFailed(format!("vad: {e}")))?;

            if decision.is_active {
                if !self.pre_roll.is_empty() {
                    self.carry.extend(self.pre_roll.drain(..));
                }
                self.carry.extend_from_slice(piece);
            } else {
                for &s in piece {
                    if self.pre_roll.len() == pre_roll_limit.max(1) {
                        self.pre_roll.pop_front();
                    }
                    self.pre_roll.push_back(s);
                }
            }
        }
        Ok(())
    }

    /// Pull full frames out of the carry buffer and extract features.
    fn extract_pending_frames(&mut self) {
        let frame_size = self.mfcc.config().frame_size;
        let hop = self.mfcc.config().hop_size;

        while self.carry.len() >= frame_size {
            self.frames_observed += 1;
            match self.mfcc.extract_frame(&self.carry[..frame_size]) {
                Ok(features) => {
                    let index = self.frames_observed - 1;
                    if self.first_voice_frame.is_none() {
                        self.first_voice_frame = Some(index);
                    }
                    self.last_voice_frame = Some(index);
                    self.session_features.push(features);
                }
                Err(e) => {
                    self.frames_dropped += 1;
                    warn!(id = %self.id, error = %e, "frame dropped during extraction");
                }
            }
            self.carry.drain(..hop);
        }
    }

    /// Compare the live suffix against the master and blend a new score.
    fn update_score(&mut self) {
        let start = self.live_window_start();
        let Some(master) = &self.master else { return };

        let live = &self.session_features[start..];
        let distance = self.dtw.compare(live, &master.features);

        let inputs = ScoreInputs {
            dtw_distance: distance,
            session_rms: self.session_rms(),
            master_rms: master.rms,
            session_feature_count: self.session_features.len(),
            master_feature_count: master.features.len(),
            samples_analyzed: self.sample_count,
        };
        self.scorer.update(inputs);
    }

    /// Compute the final whole-session score.
    ///
    /// Uses the session's true RMS (not the smoothed meter value) and the
    /// accumulated feature sequence. When the result lands below the
    /// fallback threshold, the threshold itself is reported and the
    /// fallback flag latches.
    pub fn finalize_analysis(&mut self) -> Result<f32> {
        let Some(master) = &self.master else {
            return Err(EngineError::NoMasterCall(self.id));
        };
        if self.sample_count == 0 {
            return Err(EngineError::InsufficientData(self.id));
        }

        let limit = (master.features.len() * super::session::LIVE_WINDOW_FACTOR).max(1);
        let start = self.session_features.len().saturating_sub(limit);
        let live = &self.session_features[start..];
        let distance = self.dtw.compare(live, &master.features);

        let inputs = ScoreInputs {
            dtw_distance: distance,
            session_rms: self.session_rms(),
            master_rms: master.rms,
            session_feature_count: self.session_features.len(),
            master_feature_count: master.features.len(),
            samples_analyzed: self.sample_count,
        };
        let score = self.scorer.update(inputs);
        self.scorer.mark_finalized();

        let reported = if score.overall < self.finalize_fallback_threshold {
            self.finalize_fallback_used = true;
            debug!(
                id = %self.id,
                computed = score.overall,
                reported = self.finalize_fallback_threshold,
                "finalize fallback applied"
            );
            self.finalize_fallback_threshold
        } else {
            score.overall
        };
        self.finalized_score = Some(reported);

        debug!(
            id = %self.id,
            reported,
            frames = self.session_features.len(),
            "session analysis finalized"
        );
        Ok(reported)
    }

    /// Last reported similarity score.
    ///
    /// `NoMasterCall` without a master; `InsufficientData` when nothing has
    /// been processed yet; otherwise the finalized score if one exists,
    /// else the scorer's current blend.
    pub fn similarity_score(&self) -> Result<f32> {
        if self.master.is_none() {
            return Err(EngineError::NoMasterCall(self.id));
        }
        if self.sample_count == 0 {
            return Err(EngineError::InsufficientData(self.id));
        }
        Ok(self
            .finalized_score
            .unwrap_or_else(|| self.scorer.current().overall))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master_call::MasterCall;
    use bugle_common::SessionId;

    fn session() -> SessionState {
        let mut s = SessionState::new(SessionId::from_raw(9), 44_100).unwrap();
        s.vad_enabled = false;
        s
    }

    fn tone(len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44_100.0).sin())
            .collect()
    }

    fn install_master(s: &mut SessionState, seconds: f32) {
        let samples = tone((seconds * 44_100.0) as usize, 0.4);
        let features = s.mfcc.extract_from_buffer(&samples).unwrap();
        s.master = Some(MasterCall {
            name: "tone".into(),
            features,
            rms: crate::master_call::true_rms(&samples),
            samples,
            sample_rate: 44_100,
        });
    }

    #[test]
    fn empty_chunk_is_a_noop() {
        let mut s = session();
        s.process_chunk(&[]).unwrap();
        assert_eq!(s.sample_count, 0);
        assert_eq!(s.frames_observed, 0);
    }

    #[test]
    fn small_chunk_is_retained_until_a_frame_fills() {
        let mut s = session();
        s.process_chunk(&tone(100, 0.3)).unwrap();

        assert_eq!(s.sample_count, 100);
        assert_eq!(s.frames_observed, 0);
        assert_eq!(s.carry.len(), 100);

        // Enough to cross one 512-sample frame.
        s.process_chunk(&tone(500, 0.3)).unwrap();
        assert!(s.frames_observed >= 1);
    }

    #[test]
    fn features_accumulate_with_vad_disabled() {
        let mut s = session();
        // 2048 samples: frames at offsets 0..=1536 -> 7, then carry keeps
        // the tail for the next chunk.
        s.process_chunk(&tone(2048, 0.3)).unwrap();
        assert_eq!(s.session_features.len(), 7);
        assert_eq!(s.frames_observed, 7);
        assert_eq!(s.first_voice_frame, Some(0));
        assert_eq!(s.last_voice_frame, Some(6));
    }

    #[test]
    fn feature_count_matches_observed_minus_dropped() {
        let mut s = session();
        for _ in 0..10 {
            s.process_chunk(&tone(1024, 0.25)).unwrap();
        }
        assert_eq!(
            s.session_features.len() as u64,
            s.frames_observed - s.frames_dropped
        );
    }

    #[test]
    fn silence_with_vad_extracts_nothing() {
        let mut s = SessionState::new(SessionId::from_raw(2), 44_100).unwrap();
        assert!(s.vad_enabled);

        for _ in 0..172 {
            // ~2 s of zeros in 512-sample chunks
            s.process_chunk(&vec![0.0f32; 512]).unwrap();
        }
        assert_eq!(s.frames_observed, 0);
        assert!(s.session_features.is_empty());
        assert!(s.first_voice_frame.is_none());
    }

    #[test]
    fn vad_gates_leading_silence_but_passes_the_call() {
        let mut s = SessionState::new(SessionId::from_raw(3), 44_100).unwrap();

        // Half a second of silence, then half a second of call.
        s.process_chunk(&vec![0.0f32; 22_050]).unwrap();
        assert_eq!(s.frames_observed, 0);

        s.process_chunk(&tone(22_050, 0.4)).unwrap();
        assert!(s.frames_observed > 0, "voiced audio must produce frames");
    }

    #[test]
    fn similarity_requires_master_then_data() {
        let mut s = session();
        assert!(matches!(
            s.similarity_score(),
            Err(EngineError::NoMasterCall(_))
        ));

        install_master(&mut s, 0.3);
        assert!(matches!(
            s.similarity_score(),
            Err(EngineError::InsufficientData(_))
        ));

        s.process_chunk(&tone(1024, 0.4)).unwrap();
        assert!(s.similarity_score().is_ok());
    }

    #[test]
    fn processing_master_audio_scores_high() {
        let mut s = session();
        install_master(&mut s, 0.5);
        let samples = s.master.as_ref().unwrap().samples.clone();

        for chunk in samples.chunks(1024) {
            s.process_chunk(chunk).unwrap();
        }

        let score = s.similarity_score().unwrap();
        assert!(score >= 0.949, "self-similarity should be high, got {score}");
        assert!(s.scorer.current().is_match);
        assert!(s.scorer.current().is_reliable);
    }

    #[test]
    fn finalize_reports_fallback_below_threshold() {
        let mut s = session();
        install_master(&mut s, 0.3);
        s.finalize_fallback_threshold = 0.70;

        // Process quiet noise: poor match, score well below 0.70.
        let noise: Vec<f32> = (0..8192u64)
            .map(|i| {
                0.05 * (((i.wrapping_mul(1103515245).wrapping_add(12345)) % 2000) as f32 / 1000.0
                    - 1.0)
            })
            .collect();
        for chunk in noise.chunks(512) {
            s.process_chunk(chunk).unwrap();
        }

        let reported = s.finalize_analysis().unwrap();
        assert_eq!(reported, 0.70);
        assert!(s.finalize_fallback_used);
        assert_eq!(s.similarity_score().unwrap(), 0.70);
    }

    #[test]
    fn finalize_keeps_genuine_high_scores() {
        let mut s = session();
        install_master(&mut s, 0.5);
        let samples = s.master.as_ref().unwrap().samples.clone();
        for chunk in samples.chunks(1024) {
            s.process_chunk(chunk).unwrap();
        }

        let reported = s.finalize_analysis().unwrap();
        assert!(reported >= 0.949);
        assert!(!s.finalize_fallback_used);
    }

    #[test]
    fn finalize_without_master_or_data_errors() {
        let mut s = session();
        assert!(matches!(
            s.finalize_analysis(),
            Err(EngineError::NoMasterCall(_))
        ));

        install_master(&mut s, 0.3);
        assert!(matches!(
            s.finalize_analysis(),
            Err(EngineError::InsufficientData(_))
        ));
    }

    #[test]
    fn reset_then_reprocess_reproduces_scores() {
        let mut s = session();
        install_master(&mut s, 0.4);
        let samples = s.master.as_ref().unwrap().samples.clone();

        let run = |s: &mut SessionState| -> Vec<f32> {
            for chunk in samples.chunks(1024) {
                s.process_chunk(chunk).unwrap();
            }
            s.scorer
                .history(0)
                .iter()
                .map(|score| score.overall)
                .collect()
        };

        let first = run(&mut s);
        s.reset_run_state();
        let second = run(&mut s);
        assert_eq!(first, second);
    }
}
