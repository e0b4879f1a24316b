use std::fs;
use std::rc::Rc;

use anyhow::{Context, Result};
use log::warn;
use serde::Serialize;
use wander_formats::AssetLibrary;

mod character;
mod cli;
mod context;
mod coroutine;
mod events;
mod grid;
mod input;
mod presenter;
mod script;
mod sim;
mod world;

use context::EngineConfig;
use presenter::RecordingPresenter;
use sim::{InputTape, Simulation};

#[derive(Serialize)]
struct EventLog<'a> {
    events: &'a [String],
}

fn main() -> Result<()> {
    env_logger::init();
    let args = cli::parse()?;

    let config = match args.config.as_ref() {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading engine config from {}", path.display()))?;
            serde_json::from_str::<EngineConfig>(&text)
                .with_context(|| format!("parsing engine config from {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    let library = AssetLibrary::load_from_dir(&args.data_root)
        .with_context(|| format!("loading assets from {}", args.data_root.display()))?;
    for issue in library.issues() {
        warn!("asset definition skipped: {}", issue.error);
    }

    let presenter = Rc::new(RecordingPresenter::new(args.presentation_latency));
    let simulation = Simulation::new(Rc::new(library), presenter.clone(), config)?;
    simulation
        .enter_world(&args.world)
        .with_context(|| format!("entering world {:?}", args.world))?;

    let tape = InputTape::demo();
    if args.frames < tape.len_frames() {
        warn!(
            "frame budget {} ends before the demo tape ({} frames)",
            args.frames,
            tape.len_frames()
        );
    }
    let samples = simulation.run(&tape, args.frames, 1.0 / 60.0);
    let events = simulation.events();

    if args.verbose {
        for event in &events {
            eprintln!("[wander_engine] {event}");
        }
    }

    if let Some(path) = args.event_log_json.as_ref() {
        let json = serde_json::to_string_pretty(&EventLog { events: &events })
            .context("serializing event log to JSON")?;
        fs::write(path, &json)
            .with_context(|| format!("writing event log to {}", path.display()))?;
        println!("Saved event log to {}", path.display());
    }

    if let Some(path) = args.movement_log_json.as_ref() {
        let json =
            serde_json::to_string_pretty(&samples).context("serializing movement log to JSON")?;
        fs::write(path, &json)
            .with_context(|| format!("writing movement log to {}", path.display()))?;
        println!("Saved movement log to {}", path.display());
    }

    if let Some(path) = args.presentation_log_json.as_ref() {
        let calls = presenter.events();
        let json = serde_json::to_string_pretty(&calls)
            .context("serializing presentation log to JSON")?;
        fs::write(path, &json)
            .with_context(|| format!("writing presentation log to {}", path.display()))?;
        println!("Saved presentation log to {}", path.display());
    }

    if simulation.has_active_runs() {
        warn!("script runs still suspended at exit");
    }
    let ctx = simulation.context().borrow();
    if ctx.queue.state() == events::QueueState::Active {
        warn!("{} scripted actions still pending at exit", ctx.queue.len());
    }
    if !ctx.routines.is_empty() {
        warn!("{} routines still suspended at exit", ctx.routines.len());
    }
    println!(
        "Simulated {} frames in {}: player at {},{} | {} maps loaded | {} events recorded",
        args.frames,
        ctx.world.current_world().unwrap_or("<none>"),
        ctx.player.position.x,
        ctx.player.position.y,
        ctx.world.loaded_map_ids().len(),
        events.len()
    );

    Ok(())
}
