//! Engine facade: session registry and dispatch
//!
//! The `Engine` owns the session map behind a readers-writer lock; each
//! session sits in its own slot behind a mutex, so queries on different
//! sessions run in parallel while mutation of one session is serialized.
//! Destroying a session removes its slot under the write lock and then
//! takes the session mutex once, which makes teardown wait for any
//! in-flight pipeline invocation.

use crate::audio::chunk_queue::{ChunkQueue, ChunkQueueConfig, ChunkQueueStats};
use crate::audio::dtw::DtwConfig;
use crate::audio::vad::VadConfig;
use crate::audio::wav;
use crate::config::EngineConfig;
use crate::engine::session::SessionState;
use crate::error::{ChunkQueueError, EngineError, PlaybackError, Result};
use crate::master_call::MasterCallLoader;
use crate::recording::{MemoryBufferInfo, RecordingMode, WavFileSink};
use crate::scoring::RealtimeScorerConfig;
use bugle_common::{SessionId, SessionIdAllocator};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

/// One registered session: serialized state plus the producer-facing chunk
/// queue for realtime sessions. The queue lives outside the state mutex so
/// enqueueing never contends with the pipeline.
pub(crate) struct SessionSlot {
    pub state: Mutex<SessionState>,
    pub queue: Option<Arc<ChunkQueue>>,
}

/// Process-wide engine facade.
pub struct Engine {
    config: EngineConfig,
    loader: MasterCallLoader,
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
    ids: SessionIdAllocator,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let loader = MasterCallLoader::new(
            config.master_calls_dir.clone(),
            config.features_dir.clone(),
            config.cache_features,
        );
        Self {
            config,
            loader,
            sessions: RwLock::new(HashMap::new()),
            ids: SessionIdAllocator::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---- lifecycle ------------------------------------------------------

    /// Create a session with default per-component configuration.
    pub fn create_session(&self, sample_rate_hz: u32) -> Result<SessionId> {
        self.create_session_inner(sample_rate_hz, None)
    }

    /// Create a session fed through a chunk queue (producer/consumer
    /// decoupling). `queue_capacity` must be a power of two >= 2.
    pub fn create_realtime_session(
        &self,
        sample_rate_hz: u32,
        queue_capacity: usize,
    ) -> Result<SessionId> {
        let queue = ChunkQueue::new(ChunkQueueConfig {
            capacity: queue_capacity,
            high_water: queue_capacity * 3 / 4,
            low_water: queue_capacity / 4,
            ..Default::default()
        })
        .map_err(EngineError::Queue)?;
        self.create_session_inner(sample_rate_hz, Some(Arc::new(queue)))
    }

    fn create_session_inner(
        &self,
        sample_rate_hz: u32,
        queue: Option<Arc<ChunkQueue>>,
    ) -> Result<SessionId> {
        if sample_rate_hz == 0 {
            return Err(EngineError::InvalidParams(
                "sample rate must be positive".to_string(),
            ));
        }

        let id = self.ids.allocate();
        let state = SessionState::new(id, sample_rate_hz)?;
        let slot = Arc::new(SessionSlot {
            state: Mutex::new(state),
            queue,
        });

        self.sessions.write().unwrap().insert(id, slot);
        info!(%id, sample_rate_hz, "session created");
        Ok(id)
    }

    /// Remove and dispose a session.
    ///
    /// Waits for an in-flight pipeline invocation to complete; chunks
    /// still queued for a realtime session are discarded.
    pub fn destroy_session(&self, id: SessionId) -> Result<()> {
        let slot = self
            .sessions
            .write()
            .unwrap()
            .remove(&id)
            .ok_or(EngineError::SessionNotFound(id))?;

        if let Some(queue) = &slot.queue {
            let discarded = queue.drain();
            if discarded > 0 {
                debug!(%id, discarded, "pending chunks discarded at teardown");
            }
        }

        // In-flight processing holds this mutex; acquiring it once makes
        // destruction observe its completion.
        drop(slot.state.lock().unwrap());
        info!(%id, "session destroyed");
        Ok(())
    }

    /// Snapshot of live session ids.
    pub fn active_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().unwrap().keys().copied().collect();
        ids.sort();
        ids
    }

    pub(crate) fn slot(&self, id: SessionId) -> Result<Arc<SessionSlot>> {
        self.sessions
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(EngineError::SessionNotFound(id))
    }

    /// Run `f` with exclusive access to one session's state.
    pub(crate) fn with_session<T>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut SessionState) -> Result<T>,
    ) -> Result<T> {
        let slot = self.slot(id)?;
        let mut state = slot.state.lock().unwrap();
        f(&mut state)
    }

    // ---- master call management ----------------------------------------

    /// Resolve `name` through the loader and install it as the session's
    /// master call.
    pub fn load_master_call(&self, id: SessionId, name: &str) -> Result<()> {
        self.with_session(id, |session| {
            let master = self.loader.load(name, &mut session.mfcc)?;
            info!(%id, name, frames = master.features.len(), "master call installed");
            session.master = Some(master);
            session.finalized_score = None;
            session.finalize_fallback_used = false;
            Ok(())
        })
    }

    pub fn unload_master_call(&self, id: SessionId) -> Result<()> {
        self.with_session(id, |session| {
            session.master = None;
            session.finalized_score = None;
            Ok(())
        })
    }

    /// Name of the currently loaded master call, if any.
    pub fn current_master_call(&self, id: SessionId) -> Result<Option<String>> {
        self.with_session(id, |session| {
            Ok(session.master.as_ref().map(|m| m.name.clone()))
        })
    }

    // ---- audio processing ----------------------------------------------

    /// Main pipeline entry: process one chunk of mono samples.
    pub fn process_audio_chunk(&self, id: SessionId, samples: &[f32]) -> Result<()> {
        self.with_session(id, |session| session.process_chunk(samples))
    }

    /// Last reported similarity score.
    pub fn similarity_score(&self, id: SessionId) -> Result<f32> {
        self.with_session(id, |session| session.similarity_score())
    }

    /// Feature vectors accumulated for the session.
    pub fn feature_count(&self, id: SessionId) -> Result<usize> {
        self.with_session(id, |session| Ok(session.session_features.len()))
    }

    /// Feature vectors in the loaded master call (0 when unloaded).
    pub fn master_feature_count(&self, id: SessionId) -> Result<usize> {
        self.with_session(id, |session| {
            Ok(session.master.as_ref().map_or(0, |m| m.features.len()))
        })
    }

    /// Duration of audio processed by the session, in seconds.
    pub fn session_duration(&self, id: SessionId) -> Result<f64> {
        self.with_session(id, |session| Ok(session.audio_seconds()))
    }

    /// Clear per-run state, keeping the master call and configuration.
    pub fn reset_session_state(&self, id: SessionId) -> Result<()> {
        self.with_session(id, |session| {
            session.reset_run_state();
            Ok(())
        })
    }

    /// Compute the final whole-session score (with fallback substitution).
    pub fn finalize_session_analysis(&self, id: SessionId) -> Result<f32> {
        self.with_session(id, |session| session.finalize_analysis())
    }

    /// Whether the finalize fallback replaced the computed score.
    pub fn finalize_fallback_used(&self, id: SessionId) -> Result<bool> {
        self.with_session(id, |session| Ok(session.finalize_fallback_used))
    }

    /// Adjust the finalize fallback threshold for one session.
    pub fn set_finalize_fallback_threshold(&self, id: SessionId, threshold: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EngineError::InvalidParams(
                "fallback threshold must lie in [0, 1]".to_string(),
            ));
        }
        self.with_session(id, |session| {
            session.finalize_fallback_threshold = threshold;
            Ok(())
        })
    }

    // ---- realtime queue surface ----------------------------------------

    /// Producer-side enqueue for a realtime session. Does not take the
    /// session lock; never blocks.
    pub fn enqueue_audio(&self, id: SessionId, samples: &[f32]) -> Result<()> {
        let slot = self.slot(id)?;
        let queue = slot.queue.as_ref().ok_or_else(|| {
            EngineError::InvalidParams("not a realtime session".to_string())
        })?;
        queue.try_enqueue(samples).map_err(EngineError::Queue)
    }

    /// Consumer-side drain: run every queued chunk through the pipeline.
    /// Returns the number of chunks processed.
    pub fn process_queued_audio(&self, id: SessionId) -> Result<usize> {
        let slot = self.slot(id)?;
        let queue = slot.queue.as_ref().ok_or_else(|| {
            EngineError::InvalidParams("not a realtime session".to_string())
        })?;

        let mut state = slot.state.lock().unwrap();
        let mut processed = 0;
        loop {
            match queue.try_dequeue() {
                Ok(chunk) => {
                    state.process_chunk(chunk.samples())?;
                    processed += 1;
                }
                Err(ChunkQueueError::BufferEmpty) => break,
                Err(e) => return Err(EngineError::Queue(e)),
            }
        }
        Ok(processed)
    }

    pub fn is_realtime_session(&self, id: SessionId) -> Result<bool> {
        Ok(self.slot(id)?.queue.is_some())
    }

    /// Chunk-queue statistics for a realtime session.
    pub fn chunk_queue_stats(&self, id: SessionId) -> Result<ChunkQueueStats> {
        let slot = self.slot(id)?;
        slot.queue
            .as_ref()
            .map(|q| q.stats())
            .ok_or_else(|| EngineError::InvalidParams("not a realtime session".to_string()))
    }

    // ---- configuration knobs -------------------------------------------

    pub fn set_realtime_scorer_config(
        &self,
        id: SessionId,
        config: RealtimeScorerConfig,
    ) -> Result<()> {
        self.with_session(id, |session| {
            session
                .scorer
                .set_config(config)
                .map_err(|e| EngineError::InvalidParams(e.to_string()))
        })
    }

    /// Install a VAD configuration; its `enabled` flag also gates the
    /// pipeline.
    pub fn configure_vad(&self, id: SessionId, config: VadConfig) -> Result<()> {
        self.with_session(id, |session| {
            session.vad_enabled = config.enabled;
            session.vad.set_config(config).map_err(EngineError::Vad)
        })
    }

    pub fn enable_vad(&self, id: SessionId) -> Result<()> {
        self.with_session(id, |session| {
            session.vad_enabled = true;
            Ok(())
        })
    }

    pub fn disable_vad(&self, id: SessionId) -> Result<()> {
        self.with_session(id, |session| {
            session.vad_enabled = false;
            Ok(())
        })
    }

    pub fn is_vad_enabled(&self, id: SessionId) -> Result<bool> {
        self.with_session(id, |session| Ok(session.vad_enabled))
    }

    pub fn configure_dtw(&self, id: SessionId, config: DtwConfig) -> Result<()> {
        self.with_session(id, |session| {
            session.dtw.set_config(config);
            Ok(())
        })
    }

    pub fn set_dtw_window_ratio(&self, id: SessionId, ratio: f32) -> Result<()> {
        self.with_session(id, |session| {
            session.dtw.set_window_ratio(ratio);
            Ok(())
        })
    }

    pub fn dtw_window_ratio(&self, id: SessionId) -> Result<f32> {
        self.with_session(id, |session| Ok(session.dtw.window_ratio()))
    }

    pub fn set_enhanced_analyzers_enabled(&self, id: SessionId, enabled: bool) -> Result<()> {
        self.with_session(id, |session| {
            session.enhanced_analyzers_enabled = enabled;
            Ok(())
        })
    }

    pub fn enhanced_analyzers_enabled(&self, id: SessionId) -> Result<bool> {
        self.with_session(id, |session| Ok(session.enhanced_analyzers_enabled))
    }

    // ---- recording surface ---------------------------------------------

    /// Start recording in the session's current mode. File and hybrid
    /// modes stream into a WAV sink under the configured recordings
    /// directory.
    pub fn start_recording(&self, id: SessionId) -> Result<()> {
        self.with_session(id, |session| {
            if matches!(
                session.recorder.mode(),
                RecordingMode::File | RecordingMode::Hybrid
            ) {
                std::fs::create_dir_all(&self.config.recordings_dir)?;
                let path = self
                    .config
                    .recordings_dir
                    .join(format!("{}-live.wav", session.id));
                let sink = WavFileSink::create(&path, session.sample_rate_hz)
                    .map_err(EngineError::Recording)?;
                session
                    .recorder
                    .set_sink(Box::new(sink))
                    .map_err(EngineError::Recording)?;
            }
            session.recorder.start().map_err(EngineError::Recording)
        })
    }

    /// Start memory-buffered recording with an explicit duration cap.
    pub fn start_memory_recording(&self, id: SessionId, max_seconds: f64) -> Result<()> {
        self.with_session(id, |session| {
            session
                .recorder
                .start_memory(max_seconds)
                .map_err(EngineError::Recording)
        })
    }

    pub fn stop_recording(&self, id: SessionId) -> Result<()> {
        self.with_session(id, |session| {
            session.recorder.stop().map_err(EngineError::Recording)
        })
    }

    pub fn is_recording(&self, id: SessionId) -> Result<bool> {
        self.with_session(id, |session| Ok(session.recorder.is_active()))
    }

    /// Save the memory buffer under the recordings directory; returns the
    /// path written.
    pub fn save_recording(&self, id: SessionId, filename: &str) -> Result<PathBuf> {
        if filename.is_empty() || filename.contains(['/', '\\']) {
            return Err(EngineError::InvalidParams(
                "filename must be a bare file name".to_string(),
            ));
        }
        self.with_session(id, |session| {
            session
                .recorder
                .save_to(&self.config.recordings_dir, filename)
                .map_err(EngineError::Recording)
        })
    }

    pub fn recording_duration(&self, id: SessionId) -> Result<f64> {
        self.with_session(id, |session| Ok(session.recorder.duration_seconds()))
    }

    pub fn recorded_samples(&self, id: SessionId) -> Result<Vec<f32>> {
        self.with_session(id, |session| Ok(session.recorder.recorded_samples().to_vec()))
    }

    pub fn copy_recorded_samples(&self, id: SessionId, out: &mut [f32]) -> Result<usize> {
        self.with_session(id, |session| Ok(session.recorder.copy_recorded_samples(out)))
    }

    pub fn clear_recording_buffer(&self, id: SessionId) -> Result<()> {
        self.with_session(id, |session| {
            session.recorder.clear_buffer();
            Ok(())
        })
    }

    pub fn recording_mode(&self, id: SessionId) -> Result<RecordingMode> {
        self.with_session(id, |session| Ok(session.recorder.mode()))
    }

    pub fn set_recording_mode(&self, id: SessionId, mode: RecordingMode) -> Result<()> {
        self.with_session(id, |session| {
            session.recorder.set_mode(mode).map_err(EngineError::Recording)
        })
    }

    pub fn memory_buffer_info(&self, id: SessionId) -> Result<MemoryBufferInfo> {
        self.with_session(id, |session| Ok(session.recorder.buffer_info()))
    }

    // ---- playback surface ----------------------------------------------

    /// Play a master call recording by name through the session's player.
    pub fn play_master_call(&self, id: SessionId, name: &str) -> Result<()> {
        let path = self.config.master_calls_dir.join(format!("{name}.wav"));
        self.play_file(id, &path)
    }

    /// Play a saved recording through the session's player.
    pub fn play_recording(&self, id: SessionId, filename: &str) -> Result<()> {
        let path = self.config.recordings_dir.join(filename);
        self.play_file(id, &path)
    }

    fn play_file(&self, id: SessionId, path: &std::path::Path) -> Result<()> {
        let decoded = wav::read_mono(path).map_err(|e| {
            EngineError::Playback(PlaybackError::SourceUnavailable(format!(
                "{}: {e}",
                path.display()
            )))
        })?;
        let sample_rate = decoded.sample_rate;
        let samples = decoded.samples;
        self.with_session(id, move |session| {
            session
                .player
                .play(samples, sample_rate)
                .map_err(EngineError::Playback)
        })
    }

    pub fn stop_playback(&self, id: SessionId) -> Result<()> {
        self.with_session(id, |session| {
            session.player.stop();
            Ok(())
        })
    }

    pub fn is_playing(&self, id: SessionId) -> Result<bool> {
        self.with_session(id, |session| Ok(session.player.is_playing()))
    }

    pub fn playback_position(&self, id: SessionId) -> Result<f64> {
        self.with_session(id, |session| Ok(session.player.position_seconds()))
    }

    pub fn set_playback_volume(&self, id: SessionId, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(EngineError::InvalidParams(
                "volume must lie in [0, 1]".to_string(),
            ));
        }
        self.with_session(id, |session| {
            session.player.set_volume(volume);
            Ok(())
        })
    }

    /// Swap the playback backend for one session.
    pub fn set_player(
        &self,
        id: SessionId,
        player: Box<dyn crate::playback::Player>,
    ) -> Result<()> {
        self.with_session(id, |session| {
            session.player = player;
            Ok(())
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("active_sessions", &self.active_sessions().len())
            .finish()
    }
}
