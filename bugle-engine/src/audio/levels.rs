//! Smoothed audio level metering
//!
//! Per-chunk RMS and peak with independent attack/release smoothing, in
//! linear and dB. Current values are stored in bit-cast atomics so a
//! display thread can snapshot them without taking any lock; the bounded
//! history ring is owned by the meter and shares its owner's lock.
//!
//! Smoothing coefficients are per-sample one-pole values,
//! `1 - exp(-1 / (tau_ms * rate / 1000))`, compounded over the chunk length
//! so the effective time constant is independent of chunk size.

use crate::error::LevelError;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

/// Configuration for the level meter.
#[derive(Debug, Clone)]
pub struct LevelConfig {
    pub sample_rate_hz: u32,

    /// RMS attack time constant, milliseconds.
    pub rms_attack_ms: f32,

    /// RMS release time constant, milliseconds.
    pub rms_release_ms: f32,

    /// Peak attack time constant, milliseconds.
    pub peak_attack_ms: f32,

    /// Peak release time constant, milliseconds.
    pub peak_release_ms: f32,

    /// dB floor for conversion and clamping.
    pub db_floor: f32,

    /// dB ceiling for clamping.
    pub db_ceiling: f32,

    /// Bounded history length in measurements.
    pub history_size: usize,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 44_100,
            rms_attack_ms: 10.0,
            rms_release_ms: 300.0,
            peak_attack_ms: 1.0,
            peak_release_ms: 500.0,
            db_floor: -60.0,
            db_ceiling: 0.0,
            history_size: 100,
        }
    }
}

impl LevelConfig {
    fn validate(&self) -> Result<(), LevelError> {
        if self.sample_rate_hz == 0 {
            return Err(LevelError::InvalidConfiguration("sample rate must be positive"));
        }
        if self.rms_attack_ms <= 0.0
            || self.rms_release_ms <= 0.0
            || self.peak_attack_ms <= 0.0
            || self.peak_release_ms <= 0.0
        {
            return Err(LevelError::InvalidConfiguration(
                "time constants must be positive",
            ));
        }
        if self.db_floor >= self.db_ceiling {
            return Err(LevelError::InvalidConfiguration(
                "db_floor must be below db_ceiling",
            ));
        }
        if self.history_size == 0 {
            return Err(LevelError::InvalidConfiguration("history_size must be positive"));
        }
        Ok(())
    }
}

/// One smoothed measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelMeasurement {
    pub rms_linear: f32,
    pub rms_db: f32,
    pub peak_linear: f32,
    pub peak_db: f32,

    /// Wall-clock timestamp, epoch milliseconds.
    pub timestamp_ms: u64,
}

/// Convert a linear amplitude to clamped dB.
pub fn linear_to_db(linear: f32, floor_db: f32, ceiling_db: f32) -> f32 {
    let epsilon = 10.0f32.powf(floor_db / 20.0);
    let db = 20.0 * linear.max(epsilon).log10();
    db.clamp(floor_db, ceiling_db)
}

/// Smoothing coefficients derived from the config; recomputed whenever the
/// config changes. Each is a per-sample value clamped to [0.001, 1.0].
#[derive(Debug, Clone, Copy)]
struct Coefficients {
    rms_attack: f32,
    rms_release: f32,
    peak_attack: f32,
    peak_release: f32,
}

impl Coefficients {
    fn from_config(config: &LevelConfig) -> Self {
        let per_ms = config.sample_rate_hz as f32 / 1000.0;
        let coeff = |tau_ms: f32| (1.0 - (-1.0 / (tau_ms * per_ms)).exp()).clamp(0.001, 1.0);

        Self {
            rms_attack: coeff(config.rms_attack_ms),
            rms_release: coeff(config.rms_release_ms),
            peak_attack: coeff(config.peak_attack_ms),
            peak_release: coeff(config.peak_release_ms),
        }
    }
}

/// Smoothed RMS / peak meter.
#[derive(Debug)]
pub struct LevelMeter {
    config: LevelConfig,
    coeffs: Coefficients,

    // Bit-cast f32 values for lock-free snapshot reads.
    rms_linear: AtomicU32,
    peak_linear: AtomicU32,
    rms_db: AtomicU32,
    peak_db: AtomicU32,

    history: VecDeque<LevelMeasurement>,
}

impl LevelMeter {
    pub fn new(config: LevelConfig) -> Result<Self, LevelError> {
        config.validate()?;
        let coeffs = Coefficients::from_config(&config);
        let floor = config.db_floor;
        Ok(Self {
            coeffs,
            rms_linear: AtomicU32::new(0.0f32.to_bits()),
            peak_linear: AtomicU32::new(0.0f32.to_bits()),
            rms_db: AtomicU32::new(floor.to_bits()),
            peak_db: AtomicU32::new(floor.to_bits()),
            history: VecDeque::with_capacity(config.history_size),
            config,
        })
    }

    pub fn config(&self) -> &LevelConfig {
        &self.config
    }

    /// Replace the configuration and recompute coefficients.
    pub fn set_config(&mut self, config: LevelConfig) -> Result<(), LevelError> {
        config.validate()?;
        self.coeffs = Coefficients::from_config(&config);
        while self.history.len() > config.history_size {
            self.history.pop_back();
        }
        self.config = config;
        Ok(())
    }

    /// Update the meter with one chunk of mono samples.
    pub fn process_chunk(&mut self, samples: &[f32]) -> Result<LevelMeasurement, LevelError> {
        if samples.is_empty() {
            return Err(LevelError::InvalidInput("empty chunk"));
        }

        let mut sum_squares = 0.0f32;
        let mut chunk_peak = 0.0f32;
        for &s in samples {
            sum_squares += s * s;
            chunk_peak = chunk_peak.max(s.abs());
        }
        let chunk_rms = (sum_squares / samples.len() as f32).sqrt();

        let prev_rms = f32::from_bits(self.rms_linear.load(Ordering::Relaxed));
        let prev_peak = f32::from_bits(self.peak_linear.load(Ordering::Relaxed));

        let rms_coeff = if chunk_rms > prev_rms {
            self.coeffs.rms_attack
        } else {
            self.coeffs.rms_release
        };
        let peak_coeff = if chunk_peak > prev_peak {
            self.coeffs.peak_attack
        } else {
            self.coeffs.peak_release
        };

        // One-pole smoothing, compounded over the chunk length.
        let n = samples.len() as f32;
        let rms_keep = (1.0 - rms_coeff).powf(n);
        let peak_keep = (1.0 - peak_coeff).powf(n);
        let smoothed_rms = chunk_rms + (prev_rms - chunk_rms) * rms_keep;
        let smoothed_peak = chunk_peak + (prev_peak - chunk_peak) * peak_keep;

        let rms_db = linear_to_db(smoothed_rms, self.config.db_floor, self.config.db_ceiling);
        let peak_db = linear_to_db(smoothed_peak, self.config.db_floor, self.config.db_ceiling);

        self.rms_linear.store(smoothed_rms.to_bits(), Ordering::Relaxed);
        self.peak_linear.store(smoothed_peak.to_bits(), Ordering::Relaxed);
        self.rms_db.store(rms_db.to_bits(), Ordering::Relaxed);
        self.peak_db.store(peak_db.to_bits(), Ordering::Relaxed);

        let measurement = LevelMeasurement {
            rms_linear: smoothed_rms,
            rms_db,
            peak_linear: smoothed_peak,
            peak_db,
            timestamp_ms: bugle_common::time::epoch_millis(),
        };

        self.history.push_front(measurement);
        while self.history.len() > self.config.history_size {
            self.history.pop_back();
        }

        Ok(measurement)
    }

    /// Lock-free snapshot of the current smoothed values.
    pub fn current(&self) -> LevelMeasurement {
        LevelMeasurement {
            rms_linear: f32::from_bits(self.rms_linear.load(Ordering::Relaxed)),
            rms_db: f32::from_bits(self.rms_db.load(Ordering::Relaxed)),
            peak_linear: f32::from_bits(self.peak_linear.load(Ordering::Relaxed)),
            peak_db: f32::from_bits(self.peak_db.load(Ordering::Relaxed)),
            timestamp_ms: bugle_common::time::epoch_millis(),
        }
    }

    /// Most-recent-first history, at most `max_count` entries (0 = all).
    pub fn history(&self, max_count: usize) -> Vec<LevelMeasurement> {
        let count = if max_count == 0 {
            self.history.len()
        } else {
            max_count.min(self.history.len())
        };
        self.history.iter().take(count).copied().collect()
    }

    /// Zero the smoothed values and clear the history.
    pub fn reset(&mut self) {
        self.rms_linear.store(0.0f32.to_bits(), Ordering::Relaxed);
        self.peak_linear.store(0.0f32.to_bits(), Ordering::Relaxed);
        self.rms_db.store(self.config.db_floor.to_bits(), Ordering::Relaxed);
        self.peak_db.store(self.config.db_floor.to_bits(), Ordering::Relaxed);
        self.history.clear();
    }
}
