//! Recording surface
//!
//! Sessions can mirror the raw samples they process into a bounded memory
//! buffer, a streaming sink, or both. The engine only routes: actual file
//! IO lives behind [`RecordingSink`], with a WAV implementation provided so
//! the surface is usable out of the box.

use crate::audio::wav;
use crate::error::RecordingError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where recorded samples go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordingMode {
    /// Mirror into the in-memory buffer only.
    Memory,
    /// Stream into the sink only.
    File,
    /// Both.
    Hybrid,
}

/// Streaming destination for recorded samples.
pub trait RecordingSink: Send {
    fn write(&mut self, samples: &[f32]) -> Result<(), RecordingError>;

    /// Flush and close the destination.
    fn finalize(&mut self) -> Result<(), RecordingError>;
}

/// WAV-file sink (16-bit PCM).
pub struct WavFileSink {
    writer: Option<hound::WavWriter<std::io::BufWriter<std::fs::File>>>,
    path: PathBuf,
}

impl WavFileSink {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self, RecordingError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| RecordingError::Sink(e.to_string()))?;
        Ok(Self {
            writer: Some(writer),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordingSink for WavFileSink {
    fn write(&mut self, samples: &[f32]) -> Result<(), RecordingError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| RecordingError::Sink("sink already finalized".to_string()))?;
        for &s in samples {
            let value = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(value)
                .map_err(|e| RecordingError::Sink(e.to_string()))?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), RecordingError> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| RecordingError::Sink(e.to_string()))?;
        }
        Ok(())
    }
}

/// Memory-buffer occupancy snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemoryBufferInfo {
    pub used_samples: usize,
    pub max_samples: usize,
    pub used_seconds: f64,
    pub is_full: bool,
}

/// Per-session recording state.
pub struct SessionRecorder {
    sample_rate_hz: u32,
    mode: RecordingMode,
    active: bool,
    buffer: Vec<f32>,
    max_samples: usize,
    sink: Option<Box<dyn RecordingSink>>,
}

impl SessionRecorder {
    /// Default memory cap when no explicit duration is given.
    const DEFAULT_MAX_SECONDS: f64 = 300.0;

    pub fn new(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            mode: RecordingMode::Memory,
            active: false,
            buffer: Vec::new(),
            max_samples: (Self::DEFAULT_MAX_SECONDS * sample_rate_hz as f64) as usize,
            sink: None,
        }
    }

    /// Start recording in the current mode.
    pub fn start(&mut self) -> Result<(), RecordingError> {
        if self.active {
            return Err(RecordingError::AlreadyRecording);
        }
        self.active = true;
        debug!(mode = ?self.mode, "recording started");
        Ok(())
    }

    /// Start memory recording with an explicit duration cap.
    pub fn start_memory(&mut self, max_seconds: f64) -> Result<(), RecordingError> {
        if self.active {
            return Err(RecordingError::AlreadyRecording);
        }
        self.mode = RecordingMode::Memory;
        self.max_samples = (max_seconds.max(0.0) * self.sample_rate_hz as f64) as usize;
        self.buffer.clear();
        self.active = true;
        debug!(max_seconds, "memory recording started");
        Ok(())
    }

    /// Stop recording, finalizing any sink.
    pub fn stop(&mut self) -> Result<(), RecordingError> {
        if !self.active {
            return Err(RecordingError::NotRecording);
        }
        self.active = false;
        if let Some(sink) = self.sink.as_mut() {
            sink.finalize()?;
        }
        self.sink = None;
        debug!(buffered = self.buffer.len(), "recording stopped");
        Ok(())
    }

    /// Mirror samples from the processing pipeline. No-op when inactive.
    pub fn observe(&mut self, samples: &[f32]) -> Result<(), RecordingError> {
        if !self.active {
            return Ok(());
        }

        if matches!(self.mode, RecordingMode::Memory | RecordingMode::Hybrid) {
            let room = self.max_samples.saturating_sub(self.buffer.len());
            let take = room.min(samples.len());
            self.buffer.extend_from_slice(&samples[..take]);
        }

        if matches!(self.mode, RecordingMode::File | RecordingMode::Hybrid) {
            if let Some(sink) = self.sink.as_mut() {
                sink.write(samples)?;
            }
        }
        Ok(())
    }

    /// Write the memory buffer to a WAV file and return the path written.
    pub fn save_to(&self, dir: &Path, filename: &str) -> Result<PathBuf, RecordingError> {
        if self.buffer.is_empty() {
            return Err(RecordingError::NotRecording);
        }
        std::fs::create_dir_all(dir).map_err(|e| RecordingError::Sink(e.to_string()))?;
        let path = dir.join(filename);
        wav::write_mono_16bit(&path, &self.buffer, self.sample_rate_hz)
            .map_err(|e| RecordingError::Sink(e.to_string()))?;
        info!(path = %path.display(), samples = self.buffer.len(), "recording saved");
        Ok(path)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn mode(&self) -> RecordingMode {
        self.mode
    }

    /// Change the routing mode; only allowed while stopped.
    pub fn set_mode(&mut self, mode: RecordingMode) -> Result<(), RecordingError> {
        if self.active {
            return Err(RecordingError::AlreadyRecording);
        }
        self.mode = mode;
        Ok(())
    }

    /// Install the streaming sink used by File/Hybrid modes.
    pub fn set_sink(&mut self, sink: Box<dyn RecordingSink>) -> Result<(), RecordingError> {
        if self.active {
            return Err(RecordingError::AlreadyRecording);
        }
        self.sink = Some(sink);
        Ok(())
    }

    /// Copy of the buffered samples.
    pub fn recorded_samples(&self) -> &[f32] {
        &self.buffer
    }

    /// Copy buffered samples into `out`, returning the count copied.
    pub fn copy_recorded_samples(&self, out: &mut [f32]) -> usize {
        let count = out.len().min(self.buffer.len());
        out[..count].copy_from_slice(&self.buffer[..count]);
        count
    }

    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    pub fn buffer_info(&self) -> MemoryBufferInfo {
        MemoryBufferInfo {
            used_samples: self.buffer.len(),
            max_samples: self.max_samples,
            used_seconds: self.buffer.len() as f64 / self.sample_rate_hz as f64,
            is_full: self.buffer.len() >= self.max_samples,
        }
    }

    /// Recorded duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.buffer.len() as f64 / self.sample_rate_hz as f64
    }
}

impl std::fmt::Debug for SessionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecorder")
            .field("mode", &self.mode)
            .field("active", &self.active)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
