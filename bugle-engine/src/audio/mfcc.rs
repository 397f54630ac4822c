//! MFCC feature extraction
//!
//! Maps a frame of N samples to a K-dimensional cepstral vector:
//! Hamming window -> real FFT -> power spectrum -> triangular mel filter
//! bank -> log energies -> DCT-II. Window, filter bank, and DCT matrix are
//! precomputed at construction; per-frame work reuses scratch buffers.
//!
//! Numerical hygiene: input samples must be finite, and any non-finite
//! value appearing after the FFT, the filter bank, or the DCT rejects the
//! frame rather than letting NaNs reach the feature sequence.

use crate::error::MfccError;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Log-energy floor applied before the logarithm.
const ENERGY_EPSILON: f32 = 1e-10;

/// A single cepstral vector (length = `num_coefficients`).
pub type FeatureVec = Vec<f32>;

/// An ordered sequence of cepstral vectors.
pub type FeatureSeq = Vec<FeatureVec>;

/// Configuration for the extractor.
#[derive(Debug, Clone)]
pub struct MfccConfig {
    /// Sample rate in Hz.
    pub sample_rate_hz: u32,

    /// Frame size N; must be a power of two.
    pub frame_size: usize,

    /// Hop H between successive frames in buffer extraction.
    pub hop_size: usize,

    /// Cepstral coefficients K per frame.
    pub num_coefficients: usize,

    /// Triangular mel filters F.
    pub num_filters: usize,

    /// Lower filter-bank edge in Hz.
    pub low_freq_hz: f32,

    /// Upper filter-bank edge in Hz; 0 means Nyquist.
    pub high_freq_hz: f32,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 44_100,
            frame_size: 512,
            hop_size: 256,
            num_coefficients: 13,
            num_filters: 26,
            low_freq_hz: 0.0,
            high_freq_hz: 0.0,
        }
    }
}

impl MfccConfig {
    fn validate(&self) -> Result<(), MfccError> {
        if self.sample_rate_hz == 0 {
            return Err(MfccError::InvalidConfiguration("sample rate must be positive"));
        }
        if self.frame_size < 2 || !self.frame_size.is_power_of_two() {
            return Err(MfccError::InvalidConfiguration(
                "frame size must be a power of two >= 2",
            ));
        }
        if self.hop_size == 0 {
            return Err(MfccError::InvalidConfiguration("hop size must be positive"));
        }
        if self.num_filters == 0 || self.num_coefficients == 0 {
            return Err(MfccError::InvalidConfiguration(
                "filter and coefficient counts must be positive",
            ));
        }
        if self.num_coefficients > self.num_filters {
            return Err(MfccError::InvalidConfiguration(
                "coefficient count cannot exceed filter count",
            ));
        }
        Ok(())
    }

    /// Effective upper edge: configured value clamped to Nyquist, 0 meaning
    /// Nyquist outright.
    fn effective_high_hz(&self) -> f32 {
        let nyquist = self.sample_rate_hz as f32 / 2.0;
        if self.high_freq_hz <= 0.0 {
            nyquist
        } else {
            self.high_freq_hz.min(nyquist)
        }
    }
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

/// MFCC extractor with precomputed window, filter bank, and DCT matrix.
pub struct MfccExtractor {
    config: MfccConfig,
    fft: Arc<dyn Fft<f32>>,

    /// Hamming window of length N.
    window: Vec<f32>,

    /// Flattened filter bank: `num_filters` rows of `N/2 + 1` weights.
    filter_bank: Vec<f32>,

    /// Flattened DCT-II matrix: `num_coefficients` rows of `num_filters`.
    dct_matrix: Vec<f32>,

    // Scratch, reused per frame.
    fft_buf: Vec<Complex<f32>>,
    power: Vec<f32>,
    mel_energies: Vec<f32>,
}

impl MfccExtractor {
    pub fn new(config: MfccConfig) -> Result<Self, MfccError> {
        config.validate()?;

        let n = config.frame_size;
        let bins = n / 2 + 1;

        let window: Vec<f32> = (0..n)
            .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / (n - 1) as f32).cos())
            .collect();

        let filter_bank = build_filter_bank(&config, bins);
        let dct_matrix = build_dct_matrix(config.num_coefficients, config.num_filters);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n);

        Ok(Self {
            fft,
            window,
            filter_bank,
            dct_matrix,
            fft_buf: vec![Complex::new(0.0, 0.0); n],
            power: vec![0.0; bins],
            mel_energies: vec![0.0; config.num_filters],
            config,
        })
    }

    pub fn config(&self) -> &MfccConfig {
        &self.config
    }

    /// Extract one cepstral vector from a frame of exactly N samples.
    pub fn extract_frame(&mut self, frame: &[f32]) -> Result<FeatureVec, MfccError> {
        let n = self.config.frame_size;
        if frame.len() != n {
            return Err(MfccError::InvalidInput("frame length must equal frame_size"));
        }
        if frame.iter().any(|s| !s.is_finite()) {
            return Err(MfccError::InvalidInput("non-finite sample in frame"));
        }

        for (dst, (&s, &w)) in self.fft_buf.iter_mut().zip(frame.iter().zip(&self.window)) {
            *dst = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.fft_buf);

        for (i, p) in self.power.iter_mut().enumerate() {
            let c = self.fft_buf[i];
            *p = c.re * c.re + c.im * c.im;
            if !p.is_finite() {
                return Err(MfccError::ProcessingFailed("non-finite power spectrum bin"));
            }
        }

        let bins = self.power.len();
        for (j, energy) in self.mel_energies.iter_mut().enumerate() {
            let row = &self.filter_bank[j * bins..(j + 1) * bins];
            let acc: f32 = row.iter().zip(&self.power).map(|(&f, &p)| f * p).sum();
            *energy = (acc + ENERGY_EPSILON).ln();
            if !energy.is_finite() {
                return Err(MfccError::ProcessingFailed("non-finite mel energy"));
            }
        }

        let f = self.config.num_filters;
        let mut coeffs = vec![0.0f32; self.config.num_coefficients];
        for (k, c) in coeffs.iter_mut().enumerate() {
            let row = &self.dct_matrix[k * f..(k + 1) * f];
            *c = row
                .iter()
                .zip(&self.mel_energies)
                .map(|(&d, &m)| d * m)
                .sum();
            if !c.is_finite() {
                return Err(MfccError::ProcessingFailed("non-finite cepstral coefficient"));
            }
        }

        Ok(coeffs)
    }

    /// Extract a feature matrix from a buffer at the configured hop.
    ///
    /// Produces one vector per offset `0, H, 2H, ...` while a full frame
    /// fits. The first extraction error short-circuits. An empty buffer is
    /// invalid; a non-empty buffer shorter than one frame yields an empty
    /// matrix.
    pub fn extract_from_buffer(&mut self, buffer: &[f32]) -> Result<FeatureSeq, MfccError> {
        if buffer.is_empty() {
            return Err(MfccError::InvalidInput("empty buffer"));
        }

        let n = self.config.frame_size;
        let hop = self.config.hop_size;
        let mut features = Vec::with_capacity(buffer.len() / hop + 1);

        let mut offset = 0;
        while offset + n <= buffer.len() {
            features.push(self.extract_frame(&buffer[offset..offset + n])?);
            offset += hop;
        }
        Ok(features)
    }
}

impl std::fmt::Debug for MfccExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MfccExtractor")
            .field("config", &self.config)
            .finish()
    }
}

/// Triangular mel filter bank, flattened row-major.
///
/// F+2 equally spaced mel points between the configured edges, mapped back
/// to Hz and snapped to FFT bins. When adjacent edges land on the same bin
/// the corresponding slope has zero width and contributes nothing (the
/// near-zero denominators are guarded, never divided by).
fn build_filter_bank(config: &MfccConfig, bins: usize) -> Vec<f32> {
    let mel_low = hz_to_mel(config.low_freq_hz.max(0.0));
    let mel_high = hz_to_mel(config.effective_high_hz());
    let num_filters = config.num_filters;
    let mel_step = (mel_high - mel_low) / (num_filters + 1) as f32;

    let bin_points: Vec<i64> = (0..num_filters + 2)
        .map(|i| {
            let hz = mel_to_hz(mel_low + i as f32 * mel_step);
            (hz * config.frame_size as f32 / config.sample_rate_hz as f32) as i64
        })
        .collect();

    let mut bank = vec![0.0f32; num_filters * bins];
    for j in 0..num_filters {
        let start = bin_points[j];
        let center = bin_points[j + 1];
        let end = bin_points[j + 2];
        let row = &mut bank[j * bins..(j + 1) * bins];

        let left_denom = (center - start) as f32;
        if left_denom > 1e-6 {
            for bin in start..center {
                if (0..bins as i64).contains(&bin) {
                    row[bin as usize] = (bin - start) as f32 / left_denom;
                }
            }
        }

        let right_denom = (end - center) as f32;
        if right_denom > 1e-6 {
            for bin in center..end {
                if (0..bins as i64).contains(&bin) {
                    row[bin as usize] = (end - bin) as f32 / right_denom;
                }
            }
        }
    }
    bank
}

/// Orthonormal DCT-II matrix, flattened row-major (K rows of F).
fn build_dct_matrix(num_coefficients: usize, num_filters: usize) -> Vec<f32> {
    let scale0 = (1.0 / num_filters as f32).sqrt();
    let scale = (2.0 / num_filters as f32).sqrt();

    let mut matrix = vec![0.0f32; num_coefficients * num_filters];
    for k in 0..num_coefficients {
        let alpha = if k == 0 { scale0 } else { scale };
        for j in 0..num_filters {
            matrix[k * num_filters + j] =
                alpha * (PI * k as f32 * (j as f32 + 0.5) / num_filters as f32).cos();
        }
    }
    matrix
}
