//! Error types for the similarity engine
//!
//! Expected failures use `Result<T, E>` with meaningful error enums; no
//! panics cross the public API. Every variant maps to a stable error code
//! via [`EngineError::error_code`] so callers on any platform can switch on
//! a fixed string set.

use bugle_common::SessionId;
use thiserror::Error;

/// Main error type for the engine facade.
#[derive(Debug, Error)]
pub enum EngineError {
    /// IO errors from file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid parameters supplied to a public operation
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Session lookup failure
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    /// A similarity query was made before any audio was processed
    #[error("Insufficient data for session {0}")]
    InsufficientData(SessionId),

    /// A similarity query was made without a loaded master call
    #[error("No master call loaded for session {0}")]
    NoMasterCall(SessionId),

    /// Master call loader failures
    #[error("Master call error: {0}")]
    MasterCall(#[from] MasterCallError),

    /// MFCC extraction failures
    #[error("MFCC error: {0}")]
    Mfcc(#[from] MfccError),

    /// Voice activity detector failures
    #[error("VAD error: {0}")]
    Vad(#[from] VadError),

    /// Level meter failures
    #[error("Level meter error: {0}")]
    Level(#[from] LevelError),

    /// Spectrogram generation failures
    #[error("Spectrogram error: {0}")]
    Spectrogram(#[from] SpectrogramError),

    /// Chunk queue capacity errors
    #[error("Chunk queue error: {0}")]
    Queue(#[from] ChunkQueueError),

    /// Buffer pool errors
    #[error("Buffer pool error: {0}")]
    Pool(#[from] BufferPoolError),

    /// Recording surface errors
    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    /// Playback surface errors
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    /// Component construction failure
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// Non-recoverable processing failure inside the pipeline
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Errors from the master call loader.
#[derive(Debug, Error)]
pub enum MasterCallError {
    /// Neither a cached feature file nor a source recording exists
    #[error("Master call '{name}' not found under {searched}")]
    ResourceUnavailable { name: String, searched: String },

    /// The source recording decoded but produced no usable features
    #[error("Master call '{name}' yielded no extractable features")]
    NoFeatures { name: String },

    /// The cached feature file is malformed
    #[error("Feature cache rejected: {reason}")]
    BadCache { reason: String },

    /// WAV decode failure
    #[error("Decode failed: {0}")]
    Decode(String),

    /// Underlying IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the MFCC extractor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MfccError {
    /// Frame length mismatch, non-finite samples, or an empty buffer
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    /// Numerical failure downstream of the FFT
    #[error("Processing failed: {0}")]
    ProcessingFailed(&'static str),

    /// Bad construction parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// Errors from the voice activity detector.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VadError {
    /// Empty analysis window
    #[error("Invalid input: empty window")]
    InvalidInput,

    /// Bad construction parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// Errors from the level meter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LevelError {
    /// Empty chunk or invalid channel count
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    /// Bad construction parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// Errors from the spectrogram generator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpectrogramError {
    /// Empty input or audio shorter than one analysis window
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    /// Numerical failure downstream of the FFT
    #[error("Processing failed: {0}")]
    ProcessingFailed(&'static str),

    /// Bad construction parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// Capacity errors from the chunk queue.
///
/// These are expected states of a producer/consumer system, not faults:
/// the queue reports them and bumps a counter, the caller decides whether
/// to drop, wait, or apply backpressure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkQueueError {
    /// Enqueue attempted while every slot is occupied
    #[error("Chunk queue full (capacity {capacity})")]
    BufferFull { capacity: usize },

    /// Dequeue attempted on an empty queue
    #[error("Chunk queue empty")]
    BufferEmpty,

    /// Chunk larger than the fixed slot size
    #[error("Chunk of {got} samples exceeds slot capacity {max}")]
    InvalidSize { got: usize, max: usize },

    /// Bad construction parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// Errors from the audio buffer pool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferPoolError {
    /// All buffers in use and the acquire timeout expired
    #[error("Buffer pool exhausted ({pool_size} buffers in use)")]
    PoolExhausted { pool_size: usize },

    /// Backing allocation failed
    #[error("Buffer allocation failed")]
    AllocationFailed,

    /// Alignment not a power of two or smaller than one sample
    #[error("Invalid alignment: {0}")]
    InvalidAlignment(usize),

    /// Bad construction parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// Errors from the recording surface.
#[derive(Debug, Error)]
pub enum RecordingError {
    /// Start requested while already recording
    #[error("Recording already active")]
    AlreadyRecording,

    /// Stop/save requested with no recording in progress or buffered
    #[error("No recording available")]
    NotRecording,

    /// Sink write failure
    #[error("Recording sink failed: {0}")]
    Sink(String),
}

/// Errors from the playback surface.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Play requested while another playback is active
    #[error("Playback already active")]
    AlreadyPlaying,

    /// Requested source does not exist
    #[error("Playback source unavailable: {0}")]
    SourceUnavailable(String),

    /// Player backend failure
    #[error("Player failed: {0}")]
    Player(String),
}

/// Result type alias using the engine error type.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Stable error code for logging and cross-platform callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Io(_) => "IO_ERROR",
            EngineError::InvalidParams(_) => "INVALID_PARAMS",
            EngineError::SessionNotFound(_) => "NOT_FOUND",
            EngineError::InsufficientData(_) => "INSUFFICIENT_DATA",
            EngineError::NoMasterCall(_) => "NO_MASTER_CALL",
            EngineError::MasterCall(e) => match e {
                MasterCallError::ResourceUnavailable { .. } => "RESOURCE_UNAVAILABLE",
                MasterCallError::NoFeatures { .. } => "PROCESSING_FAILED",
                MasterCallError::BadCache { .. } => "PROCESSING_FAILED",
                MasterCallError::Decode(_) => "PROCESSING_FAILED",
                MasterCallError::Io(_) => "RESOURCE_UNAVAILABLE",
            },
            EngineError::Mfcc(e) => match e {
                MfccError::InvalidInput(_) => "INVALID_INPUT",
                MfccError::ProcessingFailed(_) => "PROCESSING_FAILED",
                MfccError::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            },
            EngineError::Vad(e) => match e {
                VadError::InvalidInput => "INVALID_INPUT",
                VadError::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            },
            EngineError::Level(e) => match e {
                LevelError::InvalidInput(_) => "INVALID_INPUT",
                LevelError::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            },
            EngineError::Spectrogram(e) => match e {
                SpectrogramError::InvalidInput(_) => "INVALID_INPUT",
                SpectrogramError::ProcessingFailed(_) => "PROCESSING_FAILED",
                SpectrogramError::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            },
            EngineError::Queue(e) => match e {
                ChunkQueueError::BufferFull { .. } => "BUFFER_FULL",
                ChunkQueueError::BufferEmpty => "BUFFER_EMPTY",
                ChunkQueueError::InvalidSize { .. } => "INVALID_SIZE",
                ChunkQueueError::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            },
            EngineError::Pool(e) => match e {
                BufferPoolError::PoolExhausted { .. } => "POOL_EXHAUSTED",
                BufferPoolError::AllocationFailed => "ALLOCATION_FAILED",
                BufferPoolError::InvalidAlignment(_) => "INVALID_ALIGNMENT",
                BufferPoolError::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            },
            EngineError::Recording(_) => "RECORDING_ERROR",
            EngineError::Playback(_) => "PLAYBACK_ERROR",
            EngineError::InitFailed(_) => "INIT_FAILED",
            EngineError::ProcessingFailed(_) => "PROCESSING_FAILED",
        }
    }

    /// True for capacity errors that a producer/consumer loop should treat
    /// as flow-control rather than failure.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            EngineError::Queue(ChunkQueueError::BufferFull { .. })
                | EngineError::Queue(ChunkQueueError::BufferEmpty)
                | EngineError::Pool(BufferPoolError::PoolExhausted { .. })
        )
    }
}
