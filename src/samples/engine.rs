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
//! Main sampler engine that coordinates note scheduling, region matching and playback.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::SchedulerError;
use super::loader::{LoadedSample, SampleLoader};
use super::matcher::RegionMatcher;
use super::params::{resolve, NoteOverrides};
use super::scheduler::{Scheduler, SchedulerConfig};
use super::timer::Timer;
use super::voice::{Voice, VoiceManager};
use crate::audio::{AudioContext, ContextClock, OutputChannel};
use crate::config::{EngineConfig, InstrumentDescriptor};
use crate::note::{Note, NoteEvent, StopTarget};
use crate::playsync::CancelHandle;

/// A loaded instrument: its matcher and decoded buffers.
struct ActiveInstrument {
    matcher: RegionMatcher,
    buffers: HashMap<String, LoadedSample>,
}

impl ActiveInstrument {
    fn memory_usage(&self) -> usize {
        self.buffers.values().map(|b| b.memory_size()).sum()
    }
}

struct EngineInner {
    context: Arc<dyn AudioContext>,
    channel: Arc<dyn OutputChannel>,
    loader: Arc<dyn SampleLoader>,
    timer: Arc<dyn Timer>,
    scheduler: Scheduler<Note>,
    voices: VoiceManager,
    instrument: RwLock<Option<Arc<ActiveInstrument>>>,
    /// Current controller values. Unset controllers read as zero.
    controllers: RwLock<HashMap<u8, u8>>,
    default_velocity: u8,
}

/// The sampler engine turns note events into voices on an audio graph.
#[derive(Clone)]
pub struct SamplerEngine {
    inner: Arc<EngineInner>,
}

impl SamplerEngine {
    /// Creates a new sampler engine routed into `channel`.
    ///
    /// Fails if the configured lookahead and interval are unusable.
    pub fn new(
        context: Arc<dyn AudioContext>,
        channel: Arc<dyn OutputChannel>,
        loader: Arc<dyn SampleLoader>,
        timer: Arc<dyn Timer>,
        config: &EngineConfig,
    ) -> Result<SamplerEngine, SchedulerError> {
        let scheduler_config = SchedulerConfig {
            lookahead: config.lookahead()?,
            interval: config.interval()?,
        };
        let scheduler = Scheduler::new(
            scheduler_config,
            Arc::new(ContextClock(context.clone())),
            timer.clone(),
        )?;
        channel.set_volume(config.volume());

        info!(
            lookahead_ms = scheduler_config.lookahead.as_millis() as u64,
            interval_ms = scheduler_config.interval.as_millis() as u64,
            volume = config.volume(),
            sample_rate = context.sample_rate(),
            "Sampler engine created"
        );

        Ok(SamplerEngine {
            inner: Arc::new(EngineInner {
                context,
                channel,
                loader,
                timer,
                scheduler,
                voices: VoiceManager::new(),
                instrument: RwLock::new(None),
                controllers: RwLock::new(HashMap::new()),
                default_velocity: config.velocity(),
            }),
        })
    }

    /// Loads an instrument, replacing the current one.
    /// Returns the number of samples available for playback.
    pub fn load_instrument(
        &self,
        descriptor: InstrumentDescriptor,
        preloaded: Option<HashMap<String, LoadedSample>>,
    ) -> usize {
        self.load_instrument_with_progress(descriptor, preloaded, &|_, _| {})
    }

    /// Loads an instrument, reporting `(processed, total)` as samples load.
    ///
    /// Preloaded buffers are used as-is and the loader is skipped.
    pub fn load_instrument_with_progress(
        &self,
        descriptor: InstrumentDescriptor,
        preloaded: Option<HashMap<String, LoadedSample>>,
        progress: &dyn Fn(usize, usize),
    ) -> usize {
        let buffers = match preloaded {
            Some(buffers) => {
                debug!(samples = buffers.len(), "Using preloaded samples");
                buffers
            }
            None => self.inner.loader.load(&descriptor, progress),
        };

        let missing = descriptor
            .sample_keys()
            .into_iter()
            .filter(|key| !buffers.contains_key(*key))
            .count();
        if missing > 0 {
            warn!(missing, "Instrument loaded with missing samples");
        }

        let instrument = ActiveInstrument {
            matcher: RegionMatcher::new(Arc::new(descriptor)),
            buffers,
        };
        let descriptor = instrument.matcher.descriptor();
        info!(
            name = descriptor.meta().and_then(|m| m.name.as_deref()),
            groups = descriptor.groups().len(),
            regions = descriptor.region_count(),
            samples = instrument.buffers.len(),
            memory_kb = instrument.memory_usage() / 1024,
            "Instrument loaded"
        );

        let loaded = instrument.buffers.len();
        *self.inner.instrument.write() = Some(Arc::new(instrument));
        loaded
    }

    /// Starts a note. The returned handle drops the note if it is still queued and
    /// stops every voice sharing its stop identity.
    pub fn start(&self, event: impl Into<NoteEvent>) -> CancelHandle {
        let note = {
            let instrument = self.inner.instrument.read();
            let no_aliases = HashMap::new();
            let aliases = instrument
                .as_ref()
                .map_or(&no_aliases, |i| i.matcher.descriptor().aliases());
            event
                .into()
                .normalize(aliases, self.inner.default_velocity)
        };
        let stop_id = note.stop_id.clone();

        let dispatcher: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let queued = self.inner.scheduler.schedule(note, move |note| {
            if let Some(inner) = dispatcher.upgrade() {
                inner.dispatch(note);
            }
        });

        let inner = Arc::downgrade(&self.inner);
        CancelHandle::new(move |time| {
            queued.cancel();
            if let Some(inner) = inner.upgrade() {
                inner.voices.stop_by_id(&stop_id, time);
            }
        })
    }

    /// Stops voices. No stop identity stops everything.
    pub fn stop(&self, target: impl Into<StopTarget>) {
        let target = target.into();
        match &target.stop_id {
            Some(stop_id) => self.inner.voices.stop_by_id(stop_id, target.time),
            None => self.inner.voices.stop_all(target.time),
        }
    }

    /// Stops every voice now.
    pub fn stop_all(&self) {
        self.stop(StopTarget::all());
    }

    /// Sets a controller value used by region matching.
    pub fn set_cc(&self, number: u8, value: u8) {
        debug!(number, value, "Controller changed");
        self.inner
            .controllers
            .write()
            .insert(number, value.min(127));
    }

    /// Gets a controller value. Unset controllers read as zero.
    pub fn cc(&self, number: u8) -> u8 {
        self.inner
            .controllers
            .read()
            .get(&number)
            .copied()
            .unwrap_or_default()
    }

    /// The channel voices are routed into.
    pub fn output(&self) -> Arc<dyn OutputChannel> {
        self.inner.channel.clone()
    }

    /// Gets the loaded instrument descriptor.
    pub fn instrument(&self) -> Option<Arc<InstrumentDescriptor>> {
        self.inner
            .instrument
            .read()
            .as_ref()
            .map(|i| i.matcher.descriptor().clone())
    }

    /// Stops everything and detaches from the output. The engine must not be used afterwards.
    pub fn disconnect(&self) {
        self.stop_all();
        self.inner.channel.disconnect();
        self.inner.scheduler.stop();
        info!("Sampler engine disconnected");
    }

    /// Returns the current number of active voices.
    pub fn active_voice_count(&self) -> usize {
        self.inner.voices.active_count()
    }

    /// Number of notes waiting in the scheduler.
    pub fn pending_notes(&self) -> usize {
        self.inner.scheduler.pending()
    }

    /// Returns the memory used by the loaded samples.
    pub fn memory_usage(&self) -> usize {
        self.inner
            .instrument
            .read()
            .as_ref()
            .map_or(0, |i| i.memory_usage())
    }
}

impl EngineInner {
    fn dispatch(&self, note: Note) {
        let Some(instrument) = self.instrument.read().clone() else {
            debug!(note = %note.note, "No instrument loaded, ignoring note");
            return;
        };

        let start_time = note.time.unwrap_or_else(|| self.context.current_time());
        let matches = {
            let controllers = self.controllers.read();
            instrument
                .matcher
                .find(note.midi, note.velocity, &controllers)
        };
        if matches.is_empty() {
            debug!(note = %note.note, midi = note.midi, velocity = note.velocity, "No region matched");
            return;
        }

        // Silence exclusive groups before any new voice exists, so a voice is never
        // cut by its own trigger.
        for off_by in matches.iter().filter_map(|m| m.off_by) {
            self.voices.stop_group(off_by, Some(start_time));
        }

        let overrides = NoteOverrides::from(&note);
        let defaults = instrument.matcher.descriptor().defaults();
        for matched in &matches {
            let Some(buffer) = instrument.buffers.get(matched.sample) else {
                warn!(sample = matched.sample, midi = note.midi, "Sample not loaded, skipping voice");
                continue;
            };

            let params = resolve(
                defaults,
                matched.source_group,
                matched.region,
                note.midi,
                note.velocity,
                &overrides,
            );
            let voice = Voice::start(
                self.context.clone(),
                buffer,
                &params,
                self.channel.input(),
                note.stop_id.clone(),
                matched.group,
                Some(start_time),
            );
            debug!(
                sample = matched.sample,
                midi = note.midi,
                velocity = note.velocity,
                voice = voice.id(),
                "Sample triggered"
            );
            self.voices.add(voice.clone());

            if let Some(duration) = note.duration {
                self.release_at(voice, start_time + duration);
            }
        }
    }

    /// Releases the voice at `time`, handing the stop to the audio graph one
    /// lookahead window early.
    fn release_at(&self, voice: Arc<Voice>, time: f64) {
        let lookahead = self.scheduler.config().lookahead.as_secs_f64();
        let delay = (time - self.context.current_time() - lookahead).max(0.0);
        if delay <= 0.0 {
            voice.stop(Some(time));
            return;
        }

        let delay = Duration::try_from_secs_f64(delay).unwrap_or(Duration::MAX);
        self.timer
            .defer(delay, Box::new(move || voice.stop(Some(time))));
    }
}

impl std::fmt::Debug for SamplerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplerEngine")
            .field("scheduler", &self.inner.scheduler)
            .field("voices", &self.inner.voices)
            .field("instrument", &self.instrument().is_some())
            .field("memory_kb", &(self.memory_usage() / 1024))
            .finish()
    }
}
