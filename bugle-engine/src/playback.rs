//! Playback surface
//!
//! The engine routes play/stop/position/volume calls to a [`Player`]
//! implementation supplied at session creation. Device output belongs to
//! the host application; the bundled [`NullPlayer`] tracks state and
//! position without touching any audio hardware, which is also exactly what
//! tests need.

use crate::error::PlaybackError;
use std::time::Instant;

/// Playback backend seam.
pub trait Player: Send {
    /// Begin playing a mono buffer. Fails if something is already playing.
    fn play(&mut self, samples: Vec<f32>, sample_rate: u32) -> Result<(), PlaybackError>;

    /// Stop playback; a no-op when idle.
    fn stop(&mut self);

    fn is_playing(&self) -> bool;

    /// Position within the current buffer, in seconds.
    fn position_seconds(&self) -> f64;

    /// Set the output volume, clamped to [0, 1].
    fn set_volume(&mut self, volume: f32);

    fn volume(&self) -> f32;
}

/// State-only player: no device, positions derived from wall-clock time.
pub struct NullPlayer {
    started: Option<Instant>,
    duration_seconds: f64,
    volume: f32,
}

impl NullPlayer {
    pub fn new() -> Self {
        Self {
            started: None,
            duration_seconds: 0.0,
            volume: 1.0,
        }
    }
}

impl Default for NullPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Player for NullPlayer {
    fn play(&mut self, samples: Vec<f32>, sample_rate: u32) -> Result<(), PlaybackError> {
        if self.is_playing() {
            return Err(PlaybackError::AlreadyPlaying);
        }
        if sample_rate == 0 {
            return Err(PlaybackError::Player("zero sample rate".to_string()));
        }
        self.duration_seconds = samples.len() as f64 / sample_rate as f64;
        self.started = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) {
        self.started = None;
    }

    fn is_playing(&self) -> bool {
        match self.started {
            Some(started) => started.elapsed().as_secs_f64() < self.duration_seconds,
            None => false,
        }
    }

    fn position_seconds(&self) -> f64 {
        match self.started {
            Some(started) => started.elapsed().as_secs_f64().min(self.duration_seconds),
            None => 0.0,
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f32 {
        self.volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_stop_lifecycle() {
        let mut player = NullPlayer::new();
        assert!(!player.is_playing());

        // One second of audio.
        player.play(vec![0.0; 44_100], 44_100).unwrap();
        assert!(player.is_playing());
        assert!(matches!(
            player.play(vec![0.0; 10], 44_100),
            Err(PlaybackError::AlreadyPlaying)
        ));

        player.stop();
        assert!(!player.is_playing());
        assert_eq!(player.position_seconds(), 0.0);
    }

    #[test]
    fn short_buffer_finishes_on_its_own() {
        let mut player = NullPlayer::new();
        // ~2 ms of audio.
        player.play(vec![0.0; 88], 44_100).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(!player.is_playing());
        assert!((player.position_seconds() - 88.0 / 44_100.0).abs() < 1e-6);
    }

    #[test]
    fn volume_is_clamped() {
        let mut player = NullPlayer::new();
        player.set_volume(2.0);
        assert_eq!(player.volume(), 1.0);
        player.set_volume(-0.5);
        assert_eq!(player.volume(), 0.0);
        player.set_volume(0.4);
        assert_eq!(player.volume(), 0.4);
    }

    #[test]
    fn zero_sample_rate_is_rejected() {
        let mut player = NullPlayer::new();
        assert!(player.play(vec![0.0; 10], 0).is_err());
    }
}
