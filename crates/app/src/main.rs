use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use daw_core::{
    Catalog, EffectKind, EngineConfig, ExportStatus, FileFetcher, JsonDirProvider, LoopRegion,
    OfflineDriver, Session, SyntheticInputDriver, TrackId, TrackState, demo, keyboard,
};

/// How often the control loop ticks the session, roughly one display frame.
const FRAME: Duration = Duration::from_millis(16);

#[derive(Parser)]
#[command(name = "daw")]
#[command(about = "Headless driver for the DAW audio engine")]
struct Cli {
    /// Engine config file; defaults to the user config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a drum pattern with the metronome on the default output
    Demo {
        #[arg(long, default_value = "120")]
        bpm: f64,

        #[arg(long, default_value = "2")]
        bars: u32,

        /// Loop the pattern instead of playing it once
        #[arg(long = "loop")]
        looping: bool,

        #[arg(long)]
        no_metronome: bool,
    },

    /// Play a single note on an instrument
    Note {
        #[arg(default_value = "grand_piano")]
        instrument: String,

        #[arg(default_value = "60")]
        note: u8,

        #[arg(long, default_value = "1.0")]
        seconds: f64,
    },

    /// Render a drum pattern offline and write the mixdown as WAV
    Export {
        output: PathBuf,

        #[arg(long, default_value = "120")]
        bpm: f64,

        #[arg(long, default_value = "4")]
        bars: u32,

        #[arg(long, default_value = "44100")]
        sample_rate: u32,

        /// Catalog sample to lay over the pattern
        #[arg(long)]
        sample: Option<String>,

        /// Add an effect to the drum track
        #[arg(long, value_parser = parse_effect)]
        effect: Vec<EffectKind>,
    },

    /// Synthesize a catalog sample and write it as WAV
    Sample {
        id: String,

        output: PathBuf,

        #[arg(long, default_value = "44100")]
        sample_rate: u32,
    },

    /// List instruments, effects and sample packs
    Catalog,

    /// Print the computer keyboard note mapping
    Keys {
        #[arg(long, default_value = "0")]
        octave: i8,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load(),
    };
    // running the command is the gesture
    config.require_user_gesture = false;

    match cli.command {
        Commands::Demo {
            bpm,
            bars,
            looping,
            no_metronome,
        } => run_demo(config, bpm, bars, looping, !no_metronome),
        Commands::Note {
            instrument,
            note,
            seconds,
        } => play_note(config, &instrument, note, seconds),
        Commands::Export {
            output,
            bpm,
            bars,
            sample_rate,
            sample,
            effect,
        } => export(config, output, bpm, bars, sample_rate, sample.as_deref(), &effect),
        Commands::Sample {
            id,
            output,
            sample_rate,
        } => {
            let catalog = load_catalog(&config);
            let (_, sample) = catalog
                .sample(&id)
                .with_context(|| format!("unknown sample '{id}'"))?;
            let audio = demo::generate_sample(sample, sample_rate, &mut rand::thread_rng());
            daw_render::write_wav(&audio, &output)?;
            println!("{}", output.display());
            Ok(())
        }
        Commands::Catalog => {
            list_catalog(&load_catalog(&config));
            Ok(())
        }
        Commands::Keys { octave } => {
            for (code, _) in keyboard::mapped_keys() {
                if let Some(note) = keyboard::note_for_key(code, octave) {
                    println!("{code:<10} {note}");
                }
            }
            Ok(())
        }
    }
}

fn load_catalog(config: &EngineConfig) -> Catalog {
    match &config.catalog_dir {
        Some(dir) => Catalog::load(&JsonDirProvider::new(dir)),
        None => Catalog::builtin(),
    }
}

fn run_demo(
    config: EngineConfig,
    bpm: f64,
    bars: u32,
    looping: bool,
    metronome: bool,
) -> anyhow::Result<()> {
    let mut session = Session::with_default_devices(config);
    let drums = TrackId(1);
    session.add_track(TrackState::new(drums, "Drums"));
    session.set_bpm(bpm);
    session.add_drum_pattern(drums, 0.0, bars)?;
    session.set_metronome(metronome, None)?;

    let time = session.transport().time();
    let length = time.seconds_per_bar() * bars as f64;
    if looping {
        session.set_loop(LoopRegion::new(0.0, length))?;
    }

    session.play(0.0)?;
    log::info!("playing {bars} bars at {bpm} bpm");

    let started = Instant::now();
    let limit = Duration::from_secs_f64(length + 1.5);
    while looping || started.elapsed() < limit {
        session.tick();
        thread::sleep(FRAME);
    }
    session.stop()?;
    session.shutdown();
    Ok(())
}

fn play_note(config: EngineConfig, instrument: &str, note: u8, seconds: f64) -> anyhow::Result<()> {
    let mut session = Session::with_default_devices(config);
    if session.catalog().instrument(instrument).is_none() {
        bail!("unknown instrument '{instrument}'");
    }
    let key = session
        .play_note(instrument, note, 0.8, None)
        .context("audio output is unavailable")?;

    let held = Instant::now();
    while held.elapsed() < Duration::from_secs_f64(seconds) {
        session.tick();
        thread::sleep(FRAME);
    }
    session.stop_note(&key);
    // let the release tail ring out
    while session.active_voices() > 0 && held.elapsed() < Duration::from_secs_f64(seconds + 5.0) {
        session.tick();
        thread::sleep(FRAME);
    }
    session.shutdown();
    Ok(())
}

fn export(
    config: EngineConfig,
    output: PathBuf,
    bpm: f64,
    bars: u32,
    sample_rate: u32,
    sample: Option<&str>,
    effects: &[EffectKind],
) -> anyhow::Result<()> {
    let (driver, render) = OfflineDriver::new(sample_rate);
    let catalog = load_catalog(&config);
    let fetcher = Arc::new(FileFetcher::new(config.samples_dir.clone()));
    let mut session = Session::new(
        config,
        Arc::new(driver),
        Arc::new(SyntheticInputDriver::denied()),
        fetcher,
        catalog,
    );

    let drums = TrackId(1);
    session.add_track(TrackState::new(drums, "Drums"));
    session.set_bpm(bpm);
    session.set_metronome(false, None)?;
    session.add_drum_pattern(drums, 0.0, bars)?;
    for kind in effects {
        session.add_effect(drums, *kind)?;
    }
    if let Some(sample) = sample {
        let layer = TrackId(2);
        session.add_track(TrackState::new(layer, "Samples"));
        session.add_sample_clip(layer, 0.0, sample)?;
    }

    let duration = session.start_export(&output)?;
    log::info!("exporting {duration:.2}s at {sample_rate} Hz to {}", output.display());

    let step = FRAME.as_secs_f64();
    let max_steps = ((duration / step).ceil() as usize) * 2 + 100;
    for _ in 0..max_steps {
        render.render_seconds(step);
        session.tick();
        match session.export_status() {
            Some(ExportStatus::Finished(path)) => {
                println!("{}", path.display());
                return Ok(());
            }
            Some(ExportStatus::Failed(reason)) => bail!("export failed: {reason}"),
            Some(ExportStatus::Cancelled) => bail!("export was cancelled"),
            Some(ExportStatus::Running(percent)) => log::debug!("export {percent}%"),
            None => bail!("export did not start"),
        }
    }
    session.cancel_export();
    bail!("export did not finish after {max_steps} render steps")
}

fn list_catalog(catalog: &Catalog) {
    if catalog.offline {
        println!("(offline: built-in catalog)");
    }
    println!("Instruments");
    for instrument in &catalog.instruments {
        let presets: Vec<&str> = instrument.presets.iter().map(|p| p.id.as_str()).collect();
        println!("  {:<16} {:<10} {}", instrument.id, instrument.category, presets.join(", "));
    }
    println!("Effects");
    for effect in &catalog.effects {
        let params: Vec<&str> = effect.parameters.iter().map(|p| p.name.as_str()).collect();
        println!("  {:<16} {}", effect.name, params.join(", "));
    }
    println!("Sample packs");
    for pack in &catalog.sample_packs {
        println!(
            "  {:<16} {} ({} bpm, {} samples)",
            pack.id,
            pack.genre,
            pack.bpm,
            pack.samples.len()
        );
    }
}

fn parse_effect(name: &str) -> Result<EffectKind, String> {
    EffectKind::ALL
        .into_iter()
        .find(|kind| format!("{kind:?}").eq_ignore_ascii_case(name))
        .ok_or_else(|| format!("unknown effect '{name}'"))
}
