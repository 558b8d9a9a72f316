// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sampler::audio::mock::{MockChannel, MockContext};
use sampler::config::{self, EngineConfig, DEFAULT_VELOCITY};
use sampler::midi;
use sampler::note::NoteEvent;
use sampler::samples::{
    resolve, CachedLoader, FileStorage, ManualTimer, NoteOverrides, RegionMatcher, SampleLoader,
    SamplerEngine, SilentLoader, SymphoniaDecoder,
};
use sampler::util::{duration_minutes_seconds, filename_display};

/// Sample rate of the dry-run graph.
const TRACE_SAMPLE_RATE: u32 = 44100;

/// Length of every synthesized sample in a dry run without sample files.
const TRACE_SAMPLE_SECS: f64 = 2.0;

/// How long a dry run keeps going past the last note for decoded samples to end.
const TRACE_TAIL_SECS: f64 = 30.0;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A sample-based instrument engine."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parses and summarizes an instrument descriptor.
    Validate {
        /// The path to the instrument descriptor (JSON or YAML).
        instrument: PathBuf,
    },
    /// Prints the regions a note matches and their resolved parameters.
    Match {
        /// The path to the instrument descriptor (JSON or YAML).
        instrument: PathBuf,
        /// The note to play: a MIDI number, a note name like C4 or an alias.
        note: String,
        /// The note velocity.
        #[arg(short, long, default_value_t = DEFAULT_VELOCITY)]
        velocity: u8,
        /// Controller values in the form <NUMBER>=<VALUE>. May be repeated.
        #[arg(short, long, value_parser = parse_controller)]
        cc: Vec<(u8, u8)>,
    },
    /// Replays a MIDI file through the engine without an audio device.
    Trace {
        /// The path to the instrument descriptor (JSON or YAML).
        instrument: PathBuf,
        /// The MIDI file to replay.
        midi_file: PathBuf,
        /// The path to the engine config.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Decode sample files from this directory instead of using silence.
        /// Sample URLs are resolved relative to it.
        #[arg(short, long)]
        samples: Option<PathBuf>,
    },
}

fn parse_controller(value: &str) -> Result<(u8, u8), String> {
    let (number, value) = value
        .split_once('=')
        .ok_or_else(|| format!("malformed controller {}, expected <NUMBER>=<VALUE>", value))?;
    let number = number
        .trim()
        .parse::<u8>()
        .map_err(|e| format!("invalid controller number: {}", e))?;
    let value = value
        .trim()
        .parse::<u8>()
        .map_err(|e| format!("invalid controller value: {}", e))?;
    if number > 127 || value > 127 {
        return Err("controller numbers and values must be 0-127".to_string());
    }
    Ok((number, value))
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { instrument } => {
            let descriptor = config::load_instrument(&instrument)?;
            let name = descriptor
                .meta()
                .and_then(|meta| meta.name.clone())
                .unwrap_or_else(|| filename_display(&instrument).to_string());

            println!("Instrument: {}", name);
            println!("- Groups: {}", descriptor.groups().len());
            println!("- Regions: {}", descriptor.region_count());
            println!("- Samples: {}", descriptor.sample_keys().len());
            println!("- Aliases: {}", descriptor.aliases().len());
            println!("- Base URL: {}", descriptor.samples().base_url());
        }
        Commands::Match {
            instrument,
            note,
            velocity,
            cc,
        } => {
            let descriptor = Arc::new(config::load_instrument(&instrument)?);
            let note = NoteEvent::from(note)
                .velocity(velocity)
                .normalize(descriptor.aliases(), velocity);
            let controllers: HashMap<u8, u8> = cc.into_iter().collect();

            let matcher = RegionMatcher::new(descriptor.clone());
            let matches = matcher.find(note.midi, note.velocity, &controllers);
            if matches.is_empty() {
                println!("No regions match {} (midi {}).", note.note, note.midi);
                return Ok(());
            }

            println!(
                "Regions matching {} (midi {}, count: {}):",
                note.note,
                note.midi,
                matches.len()
            );
            for matched in matches {
                let params = resolve(
                    descriptor.defaults(),
                    matched.source_group,
                    matched.region,
                    note.midi,
                    note.velocity,
                    &NoteOverrides::default(),
                );
                println!(
                    "- {} (pitch {}): {}",
                    matched.sample,
                    matched.pitch,
                    serde_json::to_string(&params)?
                );
            }
        }
        Commands::Trace {
            instrument,
            midi_file,
            config: config_path,
            samples,
        } => {
            let descriptor = config::load_instrument(&instrument)?;
            let notes = midi::load(&midi_file)?;
            let engine_config = match config_path {
                Some(path) => EngineConfig::deserialize(&path)?,
                None => EngineConfig::default(),
            };

            let context = MockContext::new(TRACE_SAMPLE_RATE);
            let timer = Arc::new(ManualTimer::new());
            let loader: Arc<dyn SampleLoader> = match samples {
                Some(root) => Arc::new(CachedLoader::new(
                    FileStorage::new(root),
                    SymphoniaDecoder::new().with_target_sample_rate(TRACE_SAMPLE_RATE),
                )),
                None => Arc::new(SilentLoader::new(TRACE_SAMPLE_SECS, TRACE_SAMPLE_RATE)),
            };
            let engine = SamplerEngine::new(
                Arc::new(context.clone()),
                Arc::new(MockChannel::new()),
                loader,
                timer.clone(),
                &engine_config,
            )?;
            engine.load_instrument(descriptor, None);

            info!(
                file = filename_display(&midi_file),
                notes = notes.notes.len(),
                "Replaying MIDI file"
            );
            let note_count = notes.notes.len();
            for note in notes.notes {
                engine.start(note);
            }

            let step = engine_config.interval()?.as_secs_f64();
            // Long enough for the last sample and its release to finish.
            let end = notes.length + TRACE_SAMPLE_SECS + 1.0;
            // Decoded samples may ring longer; stop once they are silent.
            let limit = end + TRACE_TAIL_SECS;
            let mut now = 0.0;
            let mut peak_voices = engine.active_voice_count();
            while now < end || (now < limit && engine.active_voice_count() > 0) {
                now += step;
                context.advance_to(now);
                timer.advance(step);
                timer.tick();
                peak_voices = peak_voices.max(engine.active_voice_count());
            }

            println!("Trace of {}:", filename_display(&midi_file));
            println!(
                "- Length: {}",
                duration_minutes_seconds(Duration::from_secs_f64(notes.length.max(0.0)))
            );
            println!("- Notes: {}", note_count);
            println!("- Voices started: {}", context.sources().len());
            println!("- Peak polyphony: {}", peak_voices);
            println!("- Memory: {} KiB", engine.memory_usage() / 1024);
        }
    }

    Ok(())
}
