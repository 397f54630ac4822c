//! Core audio data types
//!
//! Value types shared across the analysis pipeline: fixed-size chunks for
//! the producer/consumer queue and decoded source audio from the WAV seam.
//!
//! All audio inside the engine is mono f32 in the range [-1.0, 1.0];
//! multi-channel input is averaged down at the boundary.

use std::time::Instant;

/// Maximum samples per queued chunk.
///
/// Slots in the chunk queue are sized to this at construction so the hot
/// path never allocates; a 4096-sample slot covers ~93 ms at 44.1 kHz,
/// comfortably above typical capture callback sizes (256-2048).
pub const CHUNK_MAX: usize = 4096;

/// One fixed-capacity audio chunk flowing through the chunk queue.
///
/// The payload lives inline (`[f32; CHUNK_MAX]`), so moving a chunk is a
/// memcpy and the queue's slot storage is allocation-free after
/// construction. Metadata is stamped at enqueue time:
/// - `frame_index`: monotonic per-queue sequence number, lets the consumer
///   detect gaps
/// - `energy`: short-term RMS of the payload
/// - `contains_voice`: coarse gate (`energy` above a fixed threshold) used
///   for cheap pre-filtering before the real VAD runs
#[derive(Clone)]
pub struct AudioChunk {
    data: [f32; CHUNK_MAX],
    len: usize,

    /// Monotonic sequence number assigned by the queue.
    pub frame_index: u64,

    /// Enqueue timestamp, used for queue latency statistics.
    pub enqueued_at: Instant,

    /// Short-term RMS energy of the payload.
    pub energy: f32,

    /// Coarse voiced flag: energy above [`AudioChunk::VOICE_ENERGY_FLOOR`].
    pub contains_voice: bool,
}

impl AudioChunk {
    /// Energy floor for the coarse voiced flag.
    pub const VOICE_ENERGY_FLOOR: f32 = 0.01;

    /// Build a chunk from a sample slice, computing the energy metadata.
    ///
    /// Callers must ensure `samples.len() <= CHUNK_MAX`; the queue validates
    /// before constructing.
    pub(crate) fn from_samples(samples: &[f32], frame_index: u64) -> Self {
        debug_assert!(samples.len() <= CHUNK_MAX);

        let mut data = [0.0f32; CHUNK_MAX];
        data[..samples.len()].copy_from_slice(samples);

        let energy = if samples.is_empty() {
            0.0
        } else {
            let sum_sq: f32 = samples.iter().map(|&x| x * x).sum();
            (sum_sq / samples.len() as f32).sqrt()
        };

        Self {
            data,
            len: samples.len(),
            frame_index,
            enqueued_at: Instant::now(),
            energy,
            contains_voice: energy > Self::VOICE_ENERGY_FLOOR,
        }
    }

    /// Valid samples of this chunk.
    pub fn samples(&self) -> &[f32] {
        &self.data[..self.len]
    }

    /// Number of valid samples.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for AudioChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioChunk")
            .field("len", &self.len)
            .field("frame_index", &self.frame_index)
            .field("energy", &self.energy)
            .field("contains_voice", &self.contains_voice)
            .finish()
    }
}

/// Decoded source audio as returned by the WAV collaborator.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono samples, channel-averaged if the source was multi-channel.
    pub samples: Vec<f32>,

    /// Channel count of the source file before down-mixing.
    pub channels: u16,

    /// Source sample rate in Hz.
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Duration in seconds.
    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}
