//! Headless automix simulation: plays a short queue on virtual time and
//! prints every engine event as a JSON line.
//!
//! Usage: `automix-sim [config.json] [tracks]`

use std::{env, f32::consts::TAU, path::Path, process::ExitCode};

use desizone_automix::{
    audio::graph::{AudioGraph, GraphSettings},
    config::{MixConfig, MixMode},
    cues::{CueKind, NewHotCue},
    engine::{EngineEvent, MixEngine},
    error::EngineResult,
    media::simulated::{SimClock, SimulatedSource},
    queue::{PlayQueue, Track},
};

const TICK_SECS: f64 = 0.05;
const TRACK_SECS: f64 = 45.0;
const BLOCK_FRAMES: usize = 256;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = env::args().skip(1);
    let config = match args.next() {
        Some(path) => match MixConfig::load(Path::new(&path)) {
            Ok(c) => c,
            Err(e) => {
                log::error!("Could not load {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => demo_config(),
    };
    let count = args.next().and_then(|n| n.parse().ok()).unwrap_or(4usize);

    match simulate(config, count) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Simulation failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn demo_config() -> MixConfig {
    MixConfig {
        mix_mode: MixMode::HotCue,
        transition_lead_secs: 6.0,
        ..MixConfig::default()
    }
}

fn simulate(config: MixConfig, count: usize) -> EngineResult<()> {
    let clock = SimClock::new();
    let (deck_a, handle_a) = SimulatedSource::new(clock.clone());
    let (deck_b, handle_b) = SimulatedSource::new(clock.clone());
    for handle in [&handle_a, &handle_b] {
        handle.set_default_duration(TRACK_SECS);
    }

    let graph = AudioGraph::new(GraphSettings::default(), Box::new(clock.clone()));
    let sample_rate = GraphSettings::default().sample_rate as f32;
    let wall = Box::new(clock.clone());
    let mut engine = MixEngine::new(config, Box::new(deck_a), Box::new(deck_b), graph, wall)?
        .with_queue(PlayQueue::with_seed(42));

    let tracks: Vec<Track> = (0..count)
        .map(|i| {
            Track::new(format!("track-{i}"), format!("sim://track-{i}.mp3"))
                .with_bpm(120.0 + 4.0 * i as f64)
                .with_duration(TRACK_SECS)
                .with_title(format!("Track {i}"), "Simulator")
        })
        .collect();
    engine.set_queue(tracks.clone())?;
    for track in &tracks {
        engine.add_hot_cue(&track.id, NewHotCue::new("intro", 4.0, CueKind::Cue))?;
        engine.add_hot_cue(&track.id, NewHotCue::new("outro", TRACK_SECS - 12.0, CueKind::Cue))?;
    }
    engine.play()?;

    let total = TRACK_SECS * count as f64 + 10.0;
    let mut phase = 0.0_f32;
    let mut left = vec![0.0_f32; BLOCK_FRAMES * 2];
    let mut right = vec![0.0_f32; BLOCK_FRAMES * 2];
    let mut out = vec![0.0_f32; BLOCK_FRAMES * 2];
    let mut peak = 0.0_f32;

    while clock.now() < total {
        clock.advance(TICK_SECS);
        engine.tick();

        // One block per tick is enough to keep the graph busy.
        for f in 0..BLOCK_FRAMES {
            let a = (phase * TAU).sin() * 0.5;
            let b = (phase * 1.5 * TAU).sin() * 0.5;
            left[f * 2] = a;
            left[f * 2 + 1] = a;
            right[f * 2] = b;
            right[f * 2 + 1] = b;
            phase = (phase + 220.0 / sample_rate).fract();
        }
        engine.render_output(&left, &right, &mut out);
        peak = out.iter().fold(peak, |p, s| p.max(s.abs()));

        let mut stopped = false;
        for event in engine.drain_events() {
            if matches!(event, EngineEvent::Position { .. }) {
                continue;
            }
            stopped |= matches!(event, EngineEvent::PlaybackStopped);
            match serde_json::to_string(&event) {
                Ok(line) => println!("{:>8.2} {line}", clock.now()),
                Err(e) => log::warn!("Could not serialise event: {e}"),
            }
        }
        if stopped {
            break;
        }
    }

    let completed = engine.history().records().filter(|r| r.outcome.is_some()).count();
    log::info!(
        "Simulated {:.1}s: {completed} transitions, output peak {peak:.3}",
        clock.now()
    );
    Ok(())
}
