use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

/// Headless host that streams a world and plays the built-in demo tape.
#[derive(Parser, Debug)]
#[command(
    about = "Headless tile-grid world host that runs the scripted demo walk",
    version
)]
pub struct Args {
    /// Path to the asset data root (worlds/, maps/, scripts/)
    #[arg(long, default_value = "demos/data")]
    pub data_root: PathBuf,

    /// World id to enter
    #[arg(long, default_value = "demo")]
    pub world: String,

    /// Number of frames to simulate at 60 Hz
    #[arg(long, default_value_t = 900)]
    pub frames: u64,

    /// Optional JSON engine config overriding the built-in defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Frames a message or fade stays up before it auto-completes
    #[arg(long, default_value_t = 30)]
    pub presentation_latency: u32,

    /// Path to write the engine event log as JSON
    #[arg(long)]
    pub event_log_json: Option<PathBuf>,

    /// Path to write per-frame player movement samples as JSON
    #[arg(long)]
    pub movement_log_json: Option<PathBuf>,

    /// Path to write the presentation call log as JSON
    #[arg(long)]
    pub presentation_log_json: Option<PathBuf>,

    /// Print every engine event to stderr as it is recorded
    #[arg(long)]
    pub verbose: bool,
}

pub fn parse() -> Result<Args> {
    let args = Args::parse();
    if args.frames == 0 {
        bail!("--frames must be at least 1");
    }
    Ok(args)
}
