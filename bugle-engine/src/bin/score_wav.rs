//! Score a recording against a master call from the command line.
//!
//! Diagnostic tool for tuning and regression hunting: streams a WAV file
//! through a session in fixed-size chunks exactly like a live caller
//! would, then prints the final score snapshot as JSON.
//!
//! ```text
//! bugle-score --data-dir ./data --master buck_grunt --input take3.wav
//! ```

use anyhow::{Context, Result};
use bugle_engine::audio::wav;
use bugle_engine::{Engine, EngineConfig};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bugle-score", about = "Score a recording against a master call")]
struct Args {
    /// Data directory containing master_calls/ and features/
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Optional TOML config file (overrides --data-dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Master call name (resolved under master_calls/)
    #[arg(long)]
    master: String,

    /// Input WAV file to score
    #[arg(long)]
    input: PathBuf,

    /// Samples per processing chunk
    #[arg(long, default_value_t = 1024)]
    chunk_size: usize,

    /// Disable the voice activity gate
    #[arg(long)]
    disable_vad: bool,

    /// Print the full score history instead of just the final snapshot
    #[arg(long)]
    history: bool,
}

fn main() -> Result<()> {
    bugle_common::logging::init("bugle_engine=info");
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path, None, None, None)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::rooted_at(&args.data_dir),
    };
    let engine = Engine::new(config);

    let input = wav::read_mono(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;

    let session = engine.create_session(input.sample_rate)?;
    if args.disable_vad {
        engine.disable_vad(session)?;
    }
    engine
        .load_master_call(session, &args.master)
        .with_context(|| format!("loading master call '{}'", args.master))?;

    for chunk in input.samples.chunks(args.chunk_size.max(1)) {
        engine.process_audio_chunk(session, chunk)?;
    }
    let final_score = engine.finalize_session_analysis(session)?;

    if args.history {
        println!("{}", engine.export_history_json(session, 0)?);
    } else {
        let snapshot = engine.similarity_scores_snapshot(session)?;
        let feedback = engine.coaching_feedback(session)?;
        let report = serde_json::json!({
            "master": args.master,
            "input": args.input.display().to_string(),
            "finalScore": final_score,
            "fallbackUsed": engine.finalize_fallback_used(session)?,
            "snapshot": snapshot,
            "feedback": feedback,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    engine.destroy_session(session)?;
    Ok(())
}
