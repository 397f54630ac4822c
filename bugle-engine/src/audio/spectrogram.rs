//! STFT spectrogram generation for frequency visualization
//!
//! Computes short-time Fourier magnitude maps in dB for dashboard display:
//! Hann-windowed frames at a configurable hop, magnitude spectra clamped to
//! a dB floor, plus time/frequency axes and a normalized color map. The
//! display band can be limited (wildlife calls rarely need bins above a
//! few kHz).
//!
//! Like the waveform generator, output feeds visualization only; nothing
//! here flows back into scoring.

use crate::error::SpectrogramError;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::Serialize;
use std::f32::consts::PI;
use std::sync::Arc;

/// Configuration for spectrogram generation.
#[derive(Debug, Clone)]
pub struct SpectrogramConfig {
    /// Analysis window size; must be a power of two.
    pub window_size: usize,

    /// Hop between successive windows; at most `window_size`.
    pub hop_size: usize,

    pub sample_rate_hz: u32,

    /// Lowest displayed frequency in Hz.
    pub min_frequency_hz: f32,

    /// Highest displayed frequency in Hz; 0 means Nyquist.
    pub max_frequency_hz: f32,

    /// Apply the Hann window before the FFT.
    pub apply_window: bool,

    /// dB floor for magnitude clamping and color mapping.
    pub db_floor: f32,

    /// dB ceiling for color mapping.
    pub db_ceiling: f32,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            window_size: 2048,
            hop_size: 512,
            sample_rate_hz: 44_100,
            min_frequency_hz: 0.0,
            max_frequency_hz: 8000.0,
            apply_window: true,
            db_floor: -80.0,
            db_ceiling: 0.0,
        }
    }
}

impl SpectrogramConfig {
    fn validate(&self) -> Result<(), SpectrogramError> {
        if self.sample_rate_hz == 0 {
            return Err(SpectrogramError::InvalidConfiguration(
                "sample rate must be positive",
            ));
        }
        if self.window_size < 2 || !self.window_size.is_power_of_two() {
            return Err(SpectrogramError::InvalidConfiguration(
                "window size must be a power of two >= 2",
            ));
        }
        if self.hop_size == 0 || self.hop_size > self.window_size {
            return Err(SpectrogramError::InvalidConfiguration(
                "hop size must lie in [1, window_size]",
            ));
        }
        let nyquist = self.sample_rate_hz as f32 / 2.0;
        let max = self.effective_max_hz();
        if self.min_frequency_hz < 0.0 || self.min_frequency_hz >= max || max > nyquist {
            return Err(SpectrogramError::InvalidConfiguration(
                "frequency band must satisfy 0 <= min < max <= nyquist",
            ));
        }
        if self.db_floor >= self.db_ceiling {
            return Err(SpectrogramError::InvalidConfiguration(
                "db_floor must be below db_ceiling",
            ));
        }
        Ok(())
    }

    fn effective_max_hz(&self) -> f32 {
        let nyquist = self.sample_rate_hz as f32 / 2.0;
        if self.max_frequency_hz <= 0.0 {
            nyquist
        } else {
            self.max_frequency_hz.min(nyquist)
        }
    }
}

/// Spectrogram analysis result for visualization.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SpectrogramData {
    /// Magnitude in dB, time-major: `magnitude_db[time][frequency]`.
    pub magnitude_db: Vec<Vec<f32>>,

    /// Start time of each column in seconds.
    pub time_axis: Vec<f32>,

    /// Center frequency of each displayed bin in Hz.
    pub frequency_axis: Vec<f32>,

    /// dB floor used for clamping / color mapping.
    pub min_db: f32,

    /// dB ceiling used for color mapping.
    pub max_db: f32,

    pub time_bins: usize,
    pub frequency_bins: usize,
    pub sample_rate_hz: u32,

    /// Time step between columns in seconds.
    pub hop_seconds: f32,
}

impl SpectrogramData {
    /// Reduce the map to at most `max_time_bins` x `max_freq_bins` by
    /// striding, for display transports that cap payload size. Zero means
    /// no limit on that axis.
    pub fn downsampled(&self, max_time_bins: usize, max_freq_bins: usize) -> SpectrogramData {
        let time_step = stride(self.time_bins, max_time_bins);
        let freq_step = stride(self.frequency_bins, max_freq_bins);

        let magnitude_db: Vec<Vec<f32>> = self
            .magnitude_db
            .iter()
            .step_by(time_step)
            .map(|row| row.iter().step_by(freq_step).copied().collect())
            .collect();
        let time_axis: Vec<f32> = self.time_axis.iter().step_by(time_step).copied().collect();
        let frequency_axis: Vec<f32> = self
            .frequency_axis
            .iter()
            .step_by(freq_step)
            .copied()
            .collect();

        SpectrogramData {
            time_bins: magnitude_db.len(),
            frequency_bins: frequency_axis.len(),
            magnitude_db,
            time_axis,
            frequency_axis,
            min_db: self.min_db,
            max_db: self.max_db,
            sample_rate_hz: self.sample_rate_hz,
            hop_seconds: self.hop_seconds * time_step as f32,
        }
    }

    /// Color values normalized to [0, 1] against the dB range, same shape
    /// as `magnitude_db`.
    pub fn color_map(&self) -> Vec<Vec<f32>> {
        let range = self.max_db - self.min_db;
        let inv_range = if range > 0.0 { 1.0 / range } else { 1.0 };

        self.magnitude_db
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&db| ((db - self.min_db) * inv_range).clamp(0.0, 1.0))
                    .collect()
            })
            .collect()
    }
}

fn stride(len: usize, max: usize) -> usize {
    if max > 0 && len > max {
        len / max
    } else {
        1
    }
}

/// STFT spectrogram generator with precomputed window and reusable scratch.
pub struct SpectrogramProcessor {
    config: SpectrogramConfig,
    fft: Arc<dyn Fft<f32>>,

    /// Hann window; empty when windowing is disabled.
    window: Vec<f32>,

    /// Displayed bin range, inclusive start / exclusive end.
    bin_lo: usize,
    bin_hi: usize,

    fft_buf: Vec<Complex<f32>>,
}

impl SpectrogramProcessor {
    pub fn new(config: SpectrogramConfig) -> Result<Self, SpectrogramError> {
        config.validate()?;

        let n = config.window_size;
        let bins = n / 2 + 1;

        let window = if config.apply_window {
            (0..n)
                .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (n - 1) as f32).cos()))
                .collect()
        } else {
            Vec::new()
        };

        let hz_per_bin = config.sample_rate_hz as f32 / n as f32;
        let bin_lo = (config.min_frequency_hz / hz_per_bin).floor() as usize;
        let bin_hi = ((config.effective_max_hz() / hz_per_bin).ceil() as usize + 1).min(bins);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n);

        Ok(Self {
            fft,
            window,
            bin_lo,
            bin_hi,
            fft_buf: vec![Complex::new(0.0, 0.0); n],
            config,
        })
    }

    pub fn config(&self) -> &SpectrogramConfig {
        &self.config
    }

    /// Displayed frequency bins per column.
    pub fn frequency_bins(&self) -> usize {
        self.bin_hi - self.bin_lo
    }

    /// Compute the full spectrogram of a sample buffer.
    ///
    /// The buffer must hold at least one analysis window.
    pub fn compute(&mut self, samples: &[f32]) -> Result<SpectrogramData, SpectrogramError> {
        if samples.is_empty() {
            return Err(SpectrogramError::InvalidInput("empty buffer"));
        }
        let n = self.config.window_size;
        if samples.len() < n {
            return Err(SpectrogramError::InvalidInput(
                "buffer shorter than one analysis window",
            ));
        }

        let hop = self.config.hop_size;
        let num_frames = (samples.len() - n) / hop + 1;
        let hop_seconds = hop as f32 / self.config.sample_rate_hz as f32;
        let hz_per_bin = self.config.sample_rate_hz as f32 / n as f32;

        let mut data = SpectrogramData {
            magnitude_db: Vec::with_capacity(num_frames),
            time_axis: (0..num_frames).map(|i| i as f32 * hop_seconds).collect(),
            frequency_axis: (self.bin_lo..self.bin_hi)
                .map(|b| b as f32 * hz_per_bin)
                .collect(),
            min_db: self.config.db_floor,
            max_db: self.config.db_ceiling,
            time_bins: num_frames,
            frequency_bins: self.frequency_bins(),
            sample_rate_hz: self.config.sample_rate_hz,
            hop_seconds,
        };

        for frame_idx in 0..num_frames {
            let start = frame_idx * hop;
            let column = self.process_frame(&samples[start..start + n])?;
            data.magnitude_db.push(column);
        }

        Ok(data)
    }

    /// One dB magnitude column from a frame of exactly `window_size`
    /// samples.
    pub fn process_frame(&mut self, frame: &[f32]) -> Result<Vec<f32>, SpectrogramError> {
        let n = self.config.window_size;
        if frame.len() != n {
            return Err(SpectrogramError::InvalidInput(
                "frame length must equal window_size",
            ));
        }
        if frame.iter().any(|s| !s.is_finite()) {
            return Err(SpectrogramError::InvalidInput("non-finite sample in frame"));
        }

        if self.window.is_empty() {
            for (dst, &s) in self.fft_buf.iter_mut().zip(frame) {
                *dst = Complex::new(s, 0.0);
            }
        } else {
            for (dst, (&s, &w)) in self.fft_buf.iter_mut().zip(frame.iter().zip(&self.window)) {
                *dst = Complex::new(s * w, 0.0);
            }
        }
        self.fft.process(&mut self.fft_buf);

        let mut column = Vec::with_capacity(self.frequency_bins());
        for bin in self.bin_lo..self.bin_hi {
            let c = self.fft_buf[bin];
            let magnitude = (c.re * c.re + c.im * c.im).sqrt();
            if !magnitude.is_finite() {
                return Err(SpectrogramError::ProcessingFailed(
                    "non-finite magnitude bin",
                ));
            }
            column.push(magnitude);
        }

        Ok(magnitude_to_db(&column, self.config.db_floor))
    }
}

impl std::fmt::Debug for SpectrogramProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrogramProcessor")
            .field("config", &self.config)
            .field("frequency_bins", &self.frequency_bins())
            .finish()
    }
}

/// Convert linear magnitudes to dB, clamped at the floor.
pub fn magnitude_to_db(magnitudes: &[f32], floor_db: f32) -> Vec<f32> {
    let floor_linear = 10.0f32.powf(floor_db / 20.0);
    magnitudes
        .iter()
        .map(|&m| (20.0 * m.max(floor_linear).log10()).max(floor_db))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> SpectrogramProcessor {
        SpectrogramProcessor::new(SpectrogramConfig::default()).unwrap()
    }

    fn tone(freq: f32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / 44_100.0).sin())
            .collect()
    }

    #[test]
    fn config_validation() {
        let bad_window = SpectrogramConfig {
            window_size: 1000,
            ..Default::default()
        };
        assert!(SpectrogramProcessor::new(bad_window).is_err());

        let bad_hop = SpectrogramConfig {
            hop_size: 4096,
            ..Default::default()
        };
        assert!(SpectrogramProcessor::new(bad_hop).is_err());

        let bad_band = SpectrogramConfig {
            min_frequency_hz: 9000.0,
            max_frequency_hz: 8000.0,
            ..Default::default()
        };
        assert!(SpectrogramProcessor::new(bad_band).is_err());

        let bad_range = SpectrogramConfig {
            db_floor: 0.0,
            db_ceiling: -80.0,
            ..Default::default()
        };
        assert!(SpectrogramProcessor::new(bad_range).is_err());
    }

    #[test]
    fn short_buffer_is_invalid() {
        let mut sp = processor();
        assert!(matches!(
            sp.compute(&[]),
            Err(SpectrogramError::InvalidInput(_))
        ));
        assert!(matches!(
            sp.compute(&vec![0.1; 2047]),
            Err(SpectrogramError::InvalidInput(_))
        ));
    }

    #[test]
    fn frame_count_and_axes() {
        let mut sp = processor();
        // 2048 + 3 * 512 samples: four frames.
        let samples = tone(440.0, 2048 + 3 * 512, 0.5);
        let data = sp.compute(&samples).unwrap();

        assert_eq!(data.time_bins, 4);
        assert_eq!(data.magnitude_db.len(), 4);
        assert_eq!(data.time_axis.len(), 4);
        assert!((data.time_axis[1] - 512.0 / 44_100.0).abs() < 1e-6);

        assert_eq!(data.frequency_bins, data.frequency_axis.len());
        assert_eq!(data.magnitude_db[0].len(), data.frequency_bins);
        // Band capped at 8 kHz by default.
        assert!(*data.frequency_axis.last().unwrap() <= 8100.0);
    }

    #[test]
    fn pure_tone_peaks_at_its_bin() {
        let mut sp = processor();
        let freq = 1000.0;
        let data = sp.compute(&tone(freq, 4096, 0.5)).unwrap();

        let column = &data.magnitude_db[0];
        let peak_bin = column
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();

        let peak_hz = data.frequency_axis[peak_bin];
        let hz_per_bin = 44_100.0 / 2048.0;
        assert!(
            (peak_hz - freq).abs() <= 2.0 * hz_per_bin,
            "peak at {peak_hz} Hz, expected near {freq} Hz"
        );
    }

    #[test]
    fn silence_sits_at_the_db_floor() {
        let mut sp = processor();
        let data = sp.compute(&vec![0.0; 4096]).unwrap();
        for column in &data.magnitude_db {
            assert!(column.iter().all(|&db| db == -80.0));
        }
    }

    #[test]
    fn magnitude_to_db_clamps_at_floor() {
        let db = magnitude_to_db(&[0.0, 1.0, 10.0], -80.0);
        assert_eq!(db[0], -80.0);
        assert!((db[1] - 0.0).abs() < 1e-5);
        assert!((db[2] - 20.0).abs() < 1e-4);
    }

    #[test]
    fn color_map_is_normalized() {
        let mut sp = processor();
        let data = sp.compute(&tone(660.0, 8192, 0.5)).unwrap();
        let colors = data.color_map();

        assert_eq!(colors.len(), data.time_bins);
        for (row, db_row) in colors.iter().zip(&data.magnitude_db) {
            assert_eq!(row.len(), data.frequency_bins);
            for (&c, &db) in row.iter().zip(db_row) {
                assert!((0.0..=1.0).contains(&c));
                if db <= data.min_db {
                    assert_eq!(c, 0.0);
                }
            }
        }
    }

    #[test]
    fn downsampling_strides_both_axes() {
        let mut sp = processor();
        let data = sp.compute(&tone(500.0, 2048 + 19 * 512, 0.4)).unwrap();
        assert_eq!(data.time_bins, 20);

        let reduced = data.downsampled(5, 64);
        assert!(reduced.time_bins <= data.time_bins);
        assert!(reduced.time_bins >= 5);
        assert!(reduced.frequency_bins <= 64 * 2);
        assert_eq!(reduced.magnitude_db.len(), reduced.time_bins);
        assert_eq!(reduced.magnitude_db[0].len(), reduced.frequency_bins);
        assert_eq!(reduced.time_axis.len(), reduced.time_bins);

        // Zero means no limit.
        let full = data.downsampled(0, 0);
        assert_eq!(full.time_bins, data.time_bins);
        assert_eq!(full.frequency_bins, data.frequency_bins);
    }

    #[test]
    fn windowing_can_be_disabled() {
        let mut windowed = processor();
        let mut plain = SpectrogramProcessor::new(SpectrogramConfig {
            apply_window: false,
            ..Default::default()
        })
        .unwrap();

        let samples = tone(440.0, 2048, 0.5);
        let a = windowed.compute(&samples).unwrap();
        let b = plain.compute(&samples).unwrap();
        assert_eq!(a.magnitude_db[0].len(), b.magnitude_db[0].len());
        assert_ne!(a.magnitude_db[0], b.magnitude_db[0]);
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let mut sp = processor();
        let mut samples = vec![0.0; 2048];
        samples[100] = f32::INFINITY;
        assert!(matches!(
            sp.compute(&samples),
            Err(SpectrogramError::InvalidInput(_))
        ));
    }
}
