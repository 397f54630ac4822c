//! Master call loading and feature caching
//!
//! Resolves a logical master-call name to a feature sequence and a loudness
//! value. Two paths, tried in order:
//!
//! 1. Cached feature file `<features_dir>/<name>.mfc` — read directly, no
//!    recomputation.
//! 2. Source recording `<master_calls_dir>/<name>.wav` — decoded to mono,
//!    run through the session's MFCC extractor, true RMS computed over the
//!    whole recording, and (optionally) the features written back to the
//!    cache.
//!
//! The `.mfc` format is little-endian: `u32 frame_count`,
//! `u32 coefficient_count`, then `frame_count * coefficient_count` f32
//! values in frame-major order. The reader rejects zero counts and
//! truncated files.
//!
//! The format carries no loudness field, so a cache hit recomputes RMS from
//! the source WAV when it is still present and otherwise falls back to an
//! estimate from the mean first cepstral coefficient.

use crate::audio::mfcc::{FeatureSeq, MfccExtractor};
use crate::audio::wav;
use crate::error::MasterCallError;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A loaded master call.
#[derive(Debug, Clone)]
pub struct MasterCall {
    pub name: String,

    /// Feature sequence, one vector per analysis frame.
    pub features: FeatureSeq,

    /// True RMS over the entire recording (or the cache-only estimate).
    pub rms: f32,

    /// Raw mono samples, retained for overlay export. Empty when only the
    /// feature cache was available.
    pub samples: Vec<f32>,

    /// Source sample rate; 0 when only the feature cache was available.
    pub sample_rate: u32,
}

impl MasterCall {
    /// Master duration in seconds, derived from frame count, hop, and rate.
    pub fn duration_seconds(&self, hop_size: usize, sample_rate_hz: u32) -> f32 {
        if sample_rate_hz == 0 {
            return 0.0;
        }
        (self.features.len() * hop_size) as f32 / sample_rate_hz as f32
    }
}

/// Resolves names against the data directories.
#[derive(Debug, Clone)]
pub struct MasterCallLoader {
    master_calls_dir: PathBuf,
    features_dir: PathBuf,
    cache_features: bool,
}

impl MasterCallLoader {
    pub fn new(master_calls_dir: PathBuf, features_dir: PathBuf, cache_features: bool) -> Self {
        Self {
            master_calls_dir,
            features_dir,
            cache_features,
        }
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.features_dir.join(format!("{name}.mfc"))
    }

    fn wav_path(&self, name: &str) -> PathBuf {
        self.master_calls_dir.join(format!("{name}.wav"))
    }

    /// Load a master call, preferring the feature cache.
    ///
    /// `extractor` supplies the frame/hop/filter configuration, so cached
    /// and freshly computed features share one parameterization per
    /// session.
    pub fn load(
        &self,
        name: &str,
        extractor: &mut MfccExtractor,
    ) -> Result<MasterCall, MasterCallError> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(MasterCallError::ResourceUnavailable {
                name: name.to_string(),
                searched: "(invalid name)".to_string(),
            });
        }

        let cache = self.cache_path(name);
        let source = self.wav_path(name);

        if cache.is_file() {
            let features = read_feature_file(&cache)?;
            debug!(name, frames = features.len(), "master call loaded from feature cache");

            // The cache has no loudness field; prefer the source recording
            // when it is still around.
            if source.is_file() {
                let decoded = wav::read_mono(&source)
                    .map_err(|e| MasterCallError::Decode(e.to_string()))?;
                let rms = true_rms(&decoded.samples);
                return Ok(MasterCall {
                    name: name.to_string(),
                    features,
                    rms,
                    samples: decoded.samples,
                    sample_rate: decoded.sample_rate,
                });
            }

            let rms = estimate_rms_from_features(&features);
            return Ok(MasterCall {
                name: name.to_string(),
                features,
                rms,
                samples: Vec::new(),
                sample_rate: 0,
            });
        }

        if source.is_file() {
            return self.load_from_wav(name, &source, &cache, extractor);
        }

        Err(MasterCallError::ResourceUnavailable {
            name: name.to_string(),
            searched: format!(
                "{} | {}",
                self.master_calls_dir.display(),
                self.features_dir.display()
            ),
        })
    }

    fn load_from_wav(
        &self,
        name: &str,
        source: &Path,
        cache: &Path,
        extractor: &mut MfccExtractor,
    ) -> Result<MasterCall, MasterCallError> {
        let decoded = wav::read_mono(source).map_err(|e| MasterCallError::Decode(e.to_string()))?;
        if decoded.samples.is_empty() {
            return Err(MasterCallError::NoFeatures {
                name: name.to_string(),
            });
        }
        if decoded.sample_rate != extractor.config().sample_rate_hz {
            warn!(
                name,
                file_rate = decoded.sample_rate,
                session_rate = extractor.config().sample_rate_hz,
                "master call sample rate differs from session rate"
            );
        }

        let features = extractor
            .extract_from_buffer(&decoded.samples)
            .map_err(|e| MasterCallError::Decode(e.to_string()))?;
        if features.is_empty() {
            return Err(MasterCallError::NoFeatures {
                name: name.to_string(),
            });
        }

        let rms = true_rms(&decoded.samples);

        if self.cache_features {
            if let Some(parent) = cache.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match write_feature_file(cache, &features) {
                Ok(()) => debug!(name, path = %cache.display(), "feature cache written"),
                Err(e) => warn!(name, error = %e, "feature cache write failed"),
            }
        }

        info!(
            name,
            frames = features.len(),
            rms,
            duration_s = decoded.duration_seconds(),
            "master call loaded from source audio"
        );

        Ok(MasterCall {
            name: name.to_string(),
            features,
            rms,
            samples: decoded.samples,
            sample_rate: decoded.sample_rate,
        })
    }
}

/// True RMS over a full sample buffer.
pub fn true_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Loudness estimate from the mean first cepstral coefficient, used only
/// when the source recording is gone. Clamped non-negative so the volume
/// subscore stays defined.
fn estimate_rms_from_features(features: &FeatureSeq) -> f32 {
    if features.is_empty() {
        return 0.0;
    }
    let mean_c0: f32 =
        features.iter().filter_map(|f| f.first()).sum::<f32>() / features.len() as f32;
    mean_c0.max(0.0)
}

/// Read a `.mfc` feature file.
pub fn read_feature_file(path: &Path) -> Result<FeatureSeq, MasterCallError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut header = [0u8; 8];
    reader.read_exact(&mut header).map_err(|_| MasterCallError::BadCache {
        reason: "file shorter than header".to_string(),
    })?;
    let frame_count = u32::from_le_bytes(header[0..4].try_into().expect("fixed slice"));
    let coeff_count = u32::from_le_bytes(header[4..8].try_into().expect("fixed slice"));

    if frame_count == 0 || coeff_count == 0 {
        return Err(MasterCallError::BadCache {
            reason: format!("zero dimension: {frame_count} x {coeff_count}"),
        });
    }

    let mut features = Vec::with_capacity(frame_count as usize);
    let mut frame_bytes = vec![0u8; coeff_count as usize * 4];
    for index in 0..frame_count {
        reader.read_exact(&mut frame_bytes).map_err(|_| MasterCallError::BadCache {
            reason: format!("truncated at frame {index} of {frame_count}"),
        })?;
        let frame: Vec<f32> = frame_bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(b.try_into().expect("fixed slice")))
            .collect();
        features.push(frame);
    }

    Ok(features)
}

/// Write a `.mfc` feature file.
pub fn write_feature_file(path: &Path, features: &FeatureSeq) -> Result<(), MasterCallError> {
    if features.is_empty() || features[0].is_empty() {
        return Err(MasterCallError::BadCache {
            reason: "refusing to write empty feature matrix".to_string(),
        });
    }

    let coeff_count = features[0].len();
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&(features.len() as u32).to_le_bytes())?;
    writer.write_all(&(coeff_count as u32).to_le_bytes())?;
    for frame in features {
        debug_assert_eq!(frame.len(), coeff_count);
        for &value in frame {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    writer.flush()?;
    Ok(())
}
