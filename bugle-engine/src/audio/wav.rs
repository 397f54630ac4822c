//! WAV file collaborator
//!
//! The engine consumes mono f32 PCM; this seam turns WAV files of any
//! common sample format into that shape (averaging multi-channel sources
//! down to mono) and writes recordings back out. Decoding is intentionally
//! thin: anything beyond WAV (compressed formats, resampling) lives outside
//! the engine boundary.

use crate::audio::types::DecodedAudio;
use std::path::Path;
use tracing::debug;

/// Read a WAV file as mono f32 samples.
///
/// Integer formats are scaled by their nominal full-scale value; float
/// files pass through. Multi-channel files are averaged per frame.
pub fn read_mono(path: &Path) -> Result<DecodedAudio, hound::Error> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let full_scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<Result<_, _>>()?
        }
    };

    let channels = spec.channels.max(1);
    let samples = if channels > 1 {
        interleaved
            .chunks(channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        interleaved
    };

    debug!(
        path = %path.display(),
        channels,
        sample_rate = spec.sample_rate,
        samples = samples.len(),
        "decoded wav"
    );

    Ok(DecodedAudio {
        samples,
        channels,
        sample_rate: spec.sample_rate,
    })
}

/// Write mono f32 samples as a 16-bit PCM WAV file.
pub fn write_mono_16bit(
    path: &Path,
    samples: &[f32],
    sample_rate: u32,
) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        let value = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
        writer.write_sample(value)?;
    }
    writer.finalize()
}

/// Write mono f32 samples as a 32-bit float WAV file.
///
/// Used by the feature-cache tests and tools where bit-exact sample
/// round-trips matter.
pub fn write_mono_f32(
    path: &Path,
    samples: &[f32],
    sample_rate: u32,
) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_wav(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("bugle-wav-tests");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn tone(len: usize, rate: u32) -> Vec<f32> {
        (0..len)
            .map(|i| 0.4 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn float_wav_round_trips_exactly() {
        let path = temp_wav("float_roundtrip.wav");
        let samples = tone(4410, 44_100);

        write_mono_f32(&path, &samples, 44_100).unwrap();
        let decoded = read_mono(&path).unwrap();

        assert_eq!(decoded.sample_rate, 44_100);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.samples, samples);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn int_wav_round_trips_within_quantization() {
        let path = temp_wav("int_roundtrip.wav");
        let samples = tone(2000, 16_000);

        write_mono_16bit(&path, &samples, 16_000).unwrap();
        let decoded = read_mono(&path).unwrap();

        assert_eq!(decoded.samples.len(), samples.len());
        for (a, b) in samples.iter().zip(&decoded.samples) {
            assert!((a - b).abs() < 1.0 / 16384.0, "{a} vs {b}");
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let path = temp_wav("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        // Left 0.5, right -0.1: mono average 0.2.
        for _ in 0..100 {
            writer.write_sample(0.5f32).unwrap();
            writer.write_sample(-0.1f32).unwrap();
        }
        writer.finalize().unwrap();

        let decoded = read_mono(&path).unwrap();
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.samples.len(), 100);
        assert!(decoded.samples.iter().all(|&s| (s - 0.2).abs() < 1e-6));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_an_error() {
        let missing = temp_wav("does_not_exist.wav");
        let _ = std::fs::remove_file(&missing);
        assert!(read_mono(&missing).is_err());
    }
}
