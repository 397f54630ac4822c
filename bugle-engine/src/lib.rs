//! # Bugle Engine
//!
//! Real-time wildlife-call similarity engine.
//!
//! **Purpose:** score how closely a live or file-sourced recording matches
//! a reference ("master") call, continuously, with structured feedback for
//! a practice dashboard.
//!
//! **Architecture:** per-session pipelines (chunk ingest -> VAD gating ->
//! MFCC extraction -> windowed DTW against the master -> composite
//! scoring) behind a process-wide [`Engine`](engine::Engine) facade; a
//! lock-free chunk queue decouples capture threads from processing.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod master_call;
pub mod playback;
pub mod recording;
pub mod scoring;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use bugle_common::SessionId;
