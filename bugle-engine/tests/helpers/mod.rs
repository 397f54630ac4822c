//! Shared fixtures for integration tests
//!
//! Synthesizes distinct call-like signals (harmonic stacks with different
//! fundamentals, envelopes, and lengths) and lays them out in the data
//! directory structure the engine expects.

// Not every suite uses every helper.
#![allow(dead_code)]

use bugle_engine::audio::wav;
use bugle_engine::{Engine, EngineConfig};
use std::f32::consts::PI;
use std::path::Path;
use tempfile::TempDir;

/// Sample rate used across the integration suites.
pub const RATE: u32 = 44_100;

/// Synthesize a named call. Each name has a distinct spectral shape so
/// cross-call comparisons genuinely mismatch.
pub fn synth_call(name: &str, seconds: f32) -> Vec<f32> {
    let len = (seconds * RATE as f32) as usize;
    match name {
        // Low fundamental with strong harmonics and slow amplitude pulse.
        "buck_grunt" => harmonic_stack(len, 220.0, &[1.0, 0.6, 0.35], 0.4, 3.0),
        // Higher, brighter, with vibrato.
        "doe_bleat" => vibrato_tone(len, 660.0, 0.5, 6.0, 20.0),
        // Quiet upward sweep.
        "buck_bawl" => sweep(len, 280.0, 520.0, 0.08),
        other => panic!("unknown test call: {other}"),
    }
}

fn harmonic_stack(
    len: usize,
    fundamental: f32,
    harmonics: &[f32],
    amplitude: f32,
    pulse_hz: f32,
) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / RATE as f32;
            let pulse = 0.75 + 0.25 * (2.0 * PI * pulse_hz * t).sin();
            let mut s = 0.0;
            for (h, &gain) in harmonics.iter().enumerate() {
                s += gain * (2.0 * PI * fundamental * (h + 1) as f32 * t).sin();
            }
            amplitude * pulse * s / harmonics.len() as f32
        })
        .collect()
}

fn vibrato_tone(len: usize, freq: f32, amplitude: f32, vibrato_hz: f32, depth_hz: f32) -> Vec<f32> {
    let mut phase = 0.0f32;
    (0..len)
        .map(|i| {
            let t = i as f32 / RATE as f32;
            let instantaneous = freq + depth_hz * (2.0 * PI * vibrato_hz * t).sin();
            phase += 2.0 * PI * instantaneous / RATE as f32;
            amplitude * phase.sin()
        })
        .collect()
}

fn sweep(len: usize, from_hz: f32, to_hz: f32, amplitude: f32) -> Vec<f32> {
    let mut phase = 0.0f32;
    (0..len)
        .map(|i| {
            let t = i as f32 / len as f32;
            let instantaneous = from_hz + (to_hz - from_hz) * t;
            phase += 2.0 * PI * instantaneous / RATE as f32;
            amplitude * phase.sin()
        })
        .collect()
}

/// Create a data directory with the given calls installed as masters.
pub fn data_dir_with_calls(calls: &[(&str, f32)]) -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    let masters = dir.path().join("master_calls");
    std::fs::create_dir_all(&masters).unwrap();
    for &(name, seconds) in calls {
        let samples = synth_call(name, seconds);
        wav::write_mono_f32(&masters.join(format!("{name}.wav")), &samples, RATE).unwrap();
    }
    dir
}

/// Engine rooted at a prepared data directory.
pub fn engine_at(dir: &Path) -> Engine {
    Engine::new(EngineConfig::rooted_at(dir))
}

/// Stream samples through a session in fixed-size chunks.
pub fn stream(engine: &Engine, id: bugle_engine::SessionId, samples: &[f32], chunk: usize) {
    for piece in samples.chunks(chunk) {
        engine.process_audio_chunk(id, piece).expect("chunk processes");
    }
}
