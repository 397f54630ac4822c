//! Voice activity detection
//!
//! Windowed energy gate with a four-state machine that keeps brief level
//! dips from flickering the gate: a window must stay above threshold for
//! `min_sound_duration` before the detector commits to Voiced, and once
//! voiced it lingers in a Hangover state for `post_buffer` after the energy
//! drops, re-arming instantly if the call resumes.
//!
//! Energy is the mean-square of the window, so the threshold is amplitude
//! squared: a threshold of 1e-4 corresponds to an RMS of 0.01.

use crate::error::VadError;
use tracing::trace;

/// Gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// Below threshold, gate closed.
    Silence,
    /// Above threshold but not yet long enough to commit.
    Candidate,
    /// Gate open.
    Voiced,
    /// Recently voiced; gate still open while the post-buffer timer runs.
    Hangover,
}

/// Configuration for the detector.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Whether the gate participates in the pipeline at all.
    pub enabled: bool,

    /// Mean-square energy threshold.
    pub energy_threshold: f32,

    /// Analysis window length in milliseconds.
    pub window_duration_ms: f32,

    /// Cumulative above-threshold time required to commit to Voiced.
    pub min_sound_duration_ms: f32,

    /// Pre-roll retained by the pipeline so call onsets survive the
    /// Candidate phase.
    pub pre_buffer_ms: f32,

    /// Hangover length after the energy drops below threshold.
    pub post_buffer_ms: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            energy_threshold: 1e-4,
            window_duration_ms: 20.0,
            min_sound_duration_ms: 100.0,
            pre_buffer_ms: 50.0,
            post_buffer_ms: 100.0,
        }
    }
}

impl VadConfig {
    pub fn validate(&self) -> Result<(), VadError> {
        if self.energy_threshold < 0.0 {
            return Err(VadError::InvalidConfiguration(
                "energy_threshold must be non-negative",
            ));
        }
        if self.window_duration_ms <= 0.0 {
            return Err(VadError::InvalidConfiguration(
                "window_duration_ms must be positive",
            ));
        }
        if self.min_sound_duration_ms < 0.0
            || self.pre_buffer_ms < 0.0
            || self.post_buffer_ms < 0.0
        {
            return Err(VadError::InvalidConfiguration(
                "durations must be non-negative",
            ));
        }
        Ok(())
    }
}

/// Per-window decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadDecision {
    /// Whether frames derived from this window should be extracted.
    pub is_active: bool,

    /// Mean-square energy of the window.
    pub energy_level: f32,

    /// Time spent in the current state, milliseconds.
    pub duration_in_state_ms: f32,
}

/// Windowed energy gate.
#[derive(Debug)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    sample_rate_hz: u32,
    state: VadState,
    /// Cumulative above-threshold time while in Candidate, ms.
    candidate_ms: f32,
    /// Remaining hangover time, ms.
    hangover_ms: f32,
    /// Time in the current state, ms.
    state_ms: f32,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig, sample_rate_hz: u32) -> Result<Self, VadError> {
        config.validate()?;
        if sample_rate_hz == 0 {
            return Err(VadError::InvalidConfiguration(
                "sample rate must be positive",
            ));
        }
        Ok(Self {
            config,
            sample_rate_hz,
            state: VadState::Silence,
            candidate_ms: 0.0,
            hangover_ms: 0.0,
            state_ms: 0.0,
        })
    }

    /// Window length in samples implied by the configuration.
    pub fn window_samples(&self) -> usize {
        let n = (self.config.window_duration_ms / 1000.0 * self.sample_rate_hz as f32).round();
        (n as usize).max(1)
    }

    /// Classify one window of samples.
    pub fn process_window(&mut self, window: &[f32]) -> Result<VadDecision, VadError> {
        if window.is_empty() {
            return Err(VadError::InvalidInput);
        }

        let window_ms = window.len() as f32 / self.sample_rate_hz as f32 * 1000.0;
        let energy = window.iter().map(|&x| x * x).sum::<f32>() / window.len() as f32;
        let above = energy > self.config.energy_threshold;

        let previous = self.state;
        match self.state {
            VadState::Silence => {
                if above {
                    self.state = VadState::Candidate;
                    self.candidate_ms = window_ms;
                    // A zero minimum commits on the first hot window.
                    if self.candidate_ms >= self.config.min_sound_duration_ms {
                        self.state = VadState::Voiced;
                    }
                }
            }
            VadState::Candidate => {
                if above {
                    self.candidate_ms += window_ms;
                    if self.candidate_ms >= self.config.min_sound_duration_ms {
                        self.state = VadState::Voiced;
                    }
                } else {
                    self.state = VadState::Silence;
                    self.candidate_ms = 0.0;
                }
            }
            VadState::Voiced => {
                if !above {
                    self.state = VadState::Hangover;
                    self.hangover_ms = self.config.post_buffer_ms;
                }
            }
            VadState::Hangover => {
                if above {
                    self.state = VadState::Voiced;
                } else {
                    self.hangover_ms -= window_ms;
                    if self.hangover_ms <= 0.0 {
                        self.state = VadState::Silence;
                        self.candidate_ms = 0.0;
                    }
                }
            }
        }

        if self.state == previous {
            self.state_ms += window_ms;
        } else {
            trace!(from = ?previous, to = ?self.state, energy, "vad transition");
            self.state_ms = window_ms;
        }

        Ok(VadDecision {
            is_active: matches!(self.state, VadState::Voiced | VadState::Hangover),
            energy_level: energy,
            duration_in_state_ms: self.state_ms,
        })
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Replace the configuration, preserving the current gate state.
    pub fn set_config(&mut self, config: VadConfig) -> Result<(), VadError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Return to Silence and zero all timers.
    pub fn reset(&mut self) {
        self.state = VadState::Silence;
        self.candidate_ms = 0.0;
        self.hangover_ms = 0.0;
        self.state_ms = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;

    fn detector(min_sound_ms: f32, post_ms: f32) -> VoiceActivityDetector {
        VoiceActivityDetector::new(
            VadConfig {
                min_sound_duration_ms: min_sound_ms,
                post_buffer_ms: post_ms,
                ..Default::default()
            },
            RATE,
        )
        .unwrap()
    }

    fn loud_window(detector: &VoiceActivityDetector) -> Vec<f32> {
        vec![0.5; detector.window_samples()]
    }

    fn quiet_window(detector: &VoiceActivityDetector) -> Vec<f32> {
        vec![0.0; detector.window_samples()]
    }

    #[test]
    fn empty_window_is_invalid() {
        let mut vad = detector(100.0, 100.0);
        assert_eq!(vad.process_window(&[]), Err(VadError::InvalidInput));
    }

    #[test]
    fn silence_stays_silent() {
        let mut vad = detector(100.0, 100.0);
        let quiet = quiet_window(&vad);

        for _ in 0..50 {
            let decision = vad.process_window(&quiet).unwrap();
            assert!(!decision.is_active);
        }
        assert_eq!(vad.state(), VadState::Silence);
    }

    #[test]
    fn candidate_commits_after_min_sound_duration() {
        // 100 ms minimum over 20 ms windows: five hot windows to commit.
        let mut vad = detector(100.0, 100.0);
        let loud = loud_window(&vad);

        for _ in 0..4 {
            let decision = vad.process_window(&loud).unwrap();
            assert!(!decision.is_active, "should still be candidate");
        }
        let decision = vad.process_window(&loud).unwrap();
        assert!(decision.is_active);
        assert_eq!(vad.state(), VadState::Voiced);
    }

    #[test]
    fn candidate_falls_back_to_silence_on_first_quiet_window() {
        let mut vad = detector(100.0, 100.0);
        let loud = loud_window(&vad);
        let quiet = quiet_window(&vad);

        vad.process_window(&loud).unwrap();
        assert_eq!(vad.state(), VadState::Candidate);

        vad.process_window(&quiet).unwrap();
        assert_eq!(vad.state(), VadState::Silence);
    }

    #[test]
    fn zero_min_duration_commits_immediately() {
        let mut vad = detector(0.0, 100.0);
        let loud = loud_window(&vad);
        let decision = vad.process_window(&loud).unwrap();
        assert!(decision.is_active);
        assert_eq!(vad.state(), VadState::Voiced);
    }

    #[test]
    fn hangover_bridges_short_gaps() {
        // 100 ms hangover over 20 ms windows: the timer starts on the first
        // quiet window and decrements on the following ones, so several
        // quiet windows keep the gate open.
        let mut vad = detector(0.0, 100.0);
        let loud = loud_window(&vad);
        let quiet = quiet_window(&vad);

        vad.process_window(&loud).unwrap();
        assert_eq!(vad.state(), VadState::Voiced);

        for _ in 0..4 {
            let decision = vad.process_window(&quiet).unwrap();
            assert!(decision.is_active, "hangover should keep the gate open");
        }
        assert_eq!(vad.state(), VadState::Hangover);

        // Energy returns before expiry: straight back to Voiced.
        vad.process_window(&loud).unwrap();
        assert_eq!(vad.state(), VadState::Voiced);
    }

    #[test]
    fn hangover_expires_to_silence() {
        let mut vad = detector(0.0, 40.0);
        let loud = loud_window(&vad);
        let quiet = quiet_window(&vad);

        vad.process_window(&loud).unwrap();
        vad.process_window(&quiet).unwrap(); // enters hangover, timer = 40 ms
        vad.process_window(&quiet).unwrap(); // timer -> 20 ms
        let decision = vad.process_window(&quiet).unwrap(); // timer -> 0: expired
        assert!(!decision.is_active);
        assert_eq!(vad.state(), VadState::Silence);
    }

    #[test]
    fn reset_returns_to_silence() {
        let mut vad = detector(0.0, 100.0);
        let loud = loud_window(&vad);
        vad.process_window(&loud).unwrap();
        assert_eq!(vad.state(), VadState::Voiced);

        vad.reset();
        assert_eq!(vad.state(), VadState::Silence);
        let decision = vad.process_window(&loud_window(&vad)).unwrap();
        assert!(decision.is_active); // min_sound 0: re-commits right away
    }

    #[test]
    fn duration_in_state_accumulates() {
        let mut vad = detector(100.0, 100.0);
        let quiet = quiet_window(&vad);

        let mut last = 0.0;
        for _ in 0..5 {
            last = vad.process_window(&quiet).unwrap().duration_in_state_ms;
        }
        assert!((last - 100.0).abs() < 1.0);
    }
}
