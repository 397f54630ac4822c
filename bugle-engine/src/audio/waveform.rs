//! Waveform visualization data
//!
//! Maintains a bounded ring of recent session samples and decimates it to a
//! caller-chosen point budget, with optional peak-hold and RMS envelopes.
//! Output feeds display overlays; nothing here flows back into analysis.

use serde::Serialize;
use std::collections::VecDeque;

/// Configuration for the waveform ring.
#[derive(Debug, Clone)]
pub struct WaveformConfig {
    /// Bounded ring size in samples.
    pub max_samples: usize,

    /// Generate the peak-hold envelope.
    pub enable_peak_hold: bool,

    /// Generate the RMS envelope.
    pub enable_rms_overlay: bool,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            max_samples: 8192,
            enable_peak_hold: true,
            enable_rms_overlay: true,
        }
    }
}

/// Decimated waveform data for display.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WaveformData {
    /// Bucket-averaged samples, at most `max_points` of them.
    pub samples: Vec<f32>,

    /// Peak-hold envelope (absolute maxima per bucket); empty if disabled.
    pub peaks: Vec<f32>,

    /// RMS envelope per bucket; empty if disabled.
    pub rms_envelope: Vec<f32>,

    /// Largest absolute amplitude over the decimated range.
    pub max_amplitude: f32,

    /// Number of original samples the output represents.
    pub original_sample_count: usize,
}

/// Bounded ring of recent samples with decimating readout.
#[derive(Debug)]
pub struct WaveformBuffer {
    config: WaveformConfig,
    ring: VecDeque<f32>,
}

impl WaveformBuffer {
    pub fn new(config: WaveformConfig) -> Self {
        let capacity = config.max_samples;
        Self {
            config,
            ring: VecDeque::with_capacity(capacity),
        }
    }

    /// Append samples, discarding the oldest past the ring bound.
    pub fn push_samples(&mut self, samples: &[f32]) {
        for &s in samples {
            if self.ring.len() == self.config.max_samples {
                self.ring.pop_front();
            }
            self.ring.push_back(s);
        }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }

    /// Contiguous copy of the buffered samples, oldest first.
    pub fn snapshot(&self) -> Vec<f32> {
        self.ring.iter().copied().collect()
    }

    /// Decimate the ring down to at most `max_points` buckets.
    pub fn overlay(&self, max_points: usize) -> WaveformData {
        decimate(&self.snapshot(), max_points, &self.config)
    }
}

/// Decimate an arbitrary sample slice to at most `max_points` buckets.
///
/// Each bucket contributes its mean (display sample), absolute peak, and
/// RMS. A zero point budget or empty input yields empty output.
pub fn decimate(samples: &[f32], max_points: usize, config: &WaveformConfig) -> WaveformData {
    if samples.is_empty() || max_points == 0 {
        return WaveformData::default();
    }

    let bucket = samples.len().div_ceil(max_points).max(1);
    let points = samples.len().div_ceil(bucket);

    let mut data = WaveformData {
        samples: Vec::with_capacity(points),
        peaks: Vec::new(),
        rms_envelope: Vec::new(),
        max_amplitude: 0.0,
        original_sample_count: samples.len(),
    };
    if config.enable_peak_hold {
        data.peaks.reserve(points);
    }
    if config.enable_rms_overlay {
        data.rms_envelope.reserve(points);
    }

    for chunk in samples.chunks(bucket) {
        let mut sum = 0.0f32;
        let mut sum_sq = 0.0f32;
        let mut peak = 0.0f32;
        for &s in chunk {
            sum += s;
            sum_sq += s * s;
            peak = peak.max(s.abs());
        }

        data.samples.push(sum / chunk.len() as f32);
        if config.enable_peak_hold {
            data.peaks.push(peak);
        }
        if config.enable_rms_overlay {
            data.rms_envelope.push((sum_sq / chunk.len() as f32).sqrt());
        }
        data.max_amplitude = data.max_amplitude.max(peak);
    }

    data
}
