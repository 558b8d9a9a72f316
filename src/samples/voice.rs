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

//! Voices and their bookkeeping.
//!
//! A voice is one sounding instance of a sample. It owns a small node chain:
//! source, optional low-pass, amplitude gain, release envelope. The voice manager
//! indexes live voices so they can be stopped by identity or exclusive group.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::loader::LoadedSample;
use super::params::VoiceParams;
use crate::audio::{AudioContext, AudioNode, GainNode, NodeId, SourceNode};
use crate::config::params::DEFAULT_LPF_CUTOFF_HZ;
use crate::note::StopId;
use crate::util::{cents_to_rate, db_to_gain, velocity_to_gain};

/// Global voice ID counter.
static NEXT_VOICE_ID: AtomicU64 = AtomicU64::new(1);

/// Callback run once a voice has ended.
pub type VoiceEndedCallback = Box<dyn FnOnce() + Send>;

/// Lifecycle of a voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceState {
    Playing,
    /// Releasing after a stop.
    Stopping,
    Stopped,
}

/// The node chain of one voice.
#[derive(Clone)]
struct VoiceChain {
    source: Arc<dyn SourceNode>,
    filter: Option<Arc<dyn AudioNode>>,
    amp: Arc<dyn GainNode>,
    envelope: Arc<dyn GainNode>,
}

impl VoiceChain {
    fn disconnect(&self) {
        self.source.disconnect();
        if let Some(filter) = &self.filter {
            filter.disconnect();
        }
        self.amp.disconnect();
        self.envelope.disconnect();
    }
}

struct Lifecycle {
    state: VoiceState,
    callbacks: Vec<VoiceEndedCallback>,
}

/// One sounding instance of a sample.
pub struct Voice {
    /// Unique ID for this voice.
    id: u64,
    stop_id: StopId,
    exclusive_group: Option<u32>,
    /// Context time at which the voice starts sounding.
    start_time: f64,
    amp_release: f32,
    context: Arc<dyn AudioContext>,
    lifecycle: Mutex<Lifecycle>,
    /// Cleared once the voice has ended.
    chain: Mutex<Option<VoiceChain>>,
}

impl Voice {
    /// Builds the node chain for `buffer`, connects it to `destination` and starts it.
    ///
    /// With no start time the voice starts now.
    pub fn start(
        context: Arc<dyn AudioContext>,
        buffer: &LoadedSample,
        params: &VoiceParams,
        destination: NodeId,
        stop_id: StopId,
        exclusive_group: Option<u32>,
        start_time: Option<f64>,
    ) -> Arc<Voice> {
        let start_time = start_time.unwrap_or_else(|| context.current_time());

        let source = context.create_buffer_source(buffer);
        if context.supports_detune() {
            source.set_detune(params.detune);
        } else {
            source.set_playback_rate(cents_to_rate(params.detune));
        }

        if let Some(auto) = params.loop_auto {
            let duration = buffer.duration();
            source.set_loop(duration * auto.start_ratio, Some(duration * auto.end_ratio));
        } else if params.looping {
            let end = (params.loop_end > 0.0).then_some(params.loop_end);
            source.set_loop(params.loop_start, end);
        }

        // The filter only goes in when it would cut something audible.
        let bandwidth = DEFAULT_LPF_CUTOFF_HZ.min(context.sample_rate() as f32 / 2.0);
        let filter = (params.lpf_cutoff_hz < bandwidth)
            .then(|| context.create_lowpass(params.lpf_cutoff_hz));

        let level = velocity_to_gain(params.velocity, params.velocity_curve) * db_to_gain(params.volume);
        let amp = if params.amp_attack > 0.0 {
            let amp = context.create_gain(0.0);
            amp.set_value_at(0.0, start_time);
            amp.linear_ramp_to(level, start_time + f64::from(params.amp_attack));
            amp
        } else {
            context.create_gain(level)
        };
        let envelope = context.create_gain(1.0);

        match &filter {
            Some(filter) => {
                source.connect(filter.id());
                filter.connect(amp.id());
            }
            None => source.connect(amp.id()),
        }
        amp.connect(envelope.id());
        envelope.connect(destination);

        let voice = Arc::new(Voice {
            id: NEXT_VOICE_ID.fetch_add(1, Ordering::SeqCst),
            stop_id,
            exclusive_group,
            start_time,
            amp_release: params.amp_release.max(0.0),
            context,
            lifecycle: Mutex::new(Lifecycle {
                state: VoiceState::Playing,
                callbacks: Vec::new(),
            }),
            chain: Mutex::new(Some(VoiceChain {
                source: source.clone(),
                filter,
                amp,
                envelope,
            })),
        });

        let weak: Weak<Voice> = Arc::downgrade(&voice);
        source.on_ended(Box::new(move || {
            if let Some(voice) = weak.upgrade() {
                voice.finish();
            }
        }));

        let frame_rate = f64::from(buffer.sample_rate());
        source.start(start_time, f64::from(params.offset) / frame_rate);
        debug!(
            voice = voice.id,
            stop_id = %voice.stop_id,
            start_time,
            detune = params.detune,
            "Voice started"
        );

        voice
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stop_id(&self) -> &StopId {
        &self.stop_id
    }

    pub fn exclusive_group(&self) -> Option<u32> {
        self.exclusive_group
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn state(&self) -> VoiceState {
        self.lifecycle.lock().state
    }

    /// Releases the voice at `time`, or now.
    ///
    /// Only the first call has any effect. A stop at or before the start time cuts
    /// the source with no release, so a note that was never heard stays silent.
    pub fn stop(&self, time: Option<f64>) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != VoiceState::Playing {
                return;
            }
            lifecycle.state = VoiceState::Stopping;
        }

        let time = time.unwrap_or_else(|| self.context.current_time());
        // The source may end synchronously, so call it without holding the chain lock.
        let Some(chain) = self.chain.lock().clone() else {
            return;
        };

        if time <= self.start_time {
            debug!(voice = self.id, time, "Voice cut before start");
            chain.source.stop(time);
            return;
        }

        let release = f64::from(self.amp_release);
        chain.envelope.cancel_scheduled(time);
        chain.envelope.set_value_at(1.0, time);
        chain.envelope.linear_ramp_to(0.0, time + release);
        debug!(voice = self.id, time, release, "Voice releasing");
        chain.source.stop(time + release);
    }

    /// Runs `callback` once the voice has ended. Runs immediately if it already has.
    pub fn on_ended(&self, callback: VoiceEndedCallback) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == VoiceState::Stopped {
            drop(lifecycle);
            callback();
        } else {
            lifecycle.callbacks.push(callback);
        }
    }

    fn finish(&self) {
        let callbacks = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == VoiceState::Stopped {
                return;
            }
            lifecycle.state = VoiceState::Stopped;
            std::mem::take(&mut lifecycle.callbacks)
        };

        if let Some(chain) = self.chain.lock().take() {
            chain.disconnect();
        }
        debug!(voice = self.id, "Voice ended");

        for callback in callbacks {
            callback();
        }
    }
}

impl fmt::Debug for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Voice")
            .field("id", &self.id)
            .field("stop_id", &self.stop_id)
            .field("exclusive_group", &self.exclusive_group)
            .field("start_time", &self.start_time)
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Default)]
struct Indices {
    voices: HashMap<u64, Arc<Voice>>,
    by_stop_id: HashMap<StopId, HashSet<u64>>,
    by_group: HashMap<u32, HashSet<u64>>,
}

impl Indices {
    fn remove(&mut self, voice: &Voice) {
        self.voices.remove(&voice.id);
        if let Some(ids) = self.by_stop_id.get_mut(&voice.stop_id) {
            ids.remove(&voice.id);
            if ids.is_empty() {
                self.by_stop_id.remove(&voice.stop_id);
            }
        }
        if let Some(group) = voice.exclusive_group {
            if let Some(ids) = self.by_group.get_mut(&group) {
                ids.remove(&voice.id);
                if ids.is_empty() {
                    self.by_group.remove(&group);
                }
            }
        }
    }

    fn collect<'a>(&self, ids: impl IntoIterator<Item = &'a u64>) -> Vec<Arc<Voice>> {
        ids.into_iter()
            .filter_map(|id| self.voices.get(id).cloned())
            .collect()
    }
}

/// Tracks active voices for stopping by identity or exclusive group.
///
/// Voices remove themselves once they end. Every stop works on a snapshot, since
/// stopping can end a voice synchronously and mutate the indices.
#[derive(Clone, Default)]
pub struct VoiceManager {
    indices: Arc<Mutex<Indices>>,
}

impl VoiceManager {
    pub fn new() -> VoiceManager {
        VoiceManager::default()
    }

    /// Registers a voice until it ends.
    pub fn add(&self, voice: Arc<Voice>) {
        {
            let mut indices = self.indices.lock();
            indices.voices.insert(voice.id, voice.clone());
            indices
                .by_stop_id
                .entry(voice.stop_id.clone())
                .or_default()
                .insert(voice.id);
            if let Some(group) = voice.exclusive_group {
                indices.by_group.entry(group).or_default().insert(voice.id);
            }
        }

        let indices = Arc::downgrade(&self.indices);
        let ended = Arc::downgrade(&voice);
        voice.on_ended(Box::new(move || {
            if let (Some(indices), Some(voice)) = (indices.upgrade(), ended.upgrade()) {
                indices.lock().remove(&voice);
            }
        }));
    }

    /// Stops every voice.
    pub fn stop_all(&self, time: Option<f64>) {
        let voices: Vec<Arc<Voice>> = self.indices.lock().voices.values().cloned().collect();
        debug!(count = voices.len(), ?time, "Stopping all voices");
        for voice in voices {
            voice.stop(time);
        }
    }

    /// Stops every voice with the given stop identity.
    pub fn stop_by_id(&self, stop_id: &StopId, time: Option<f64>) {
        let voices = {
            let indices = self.indices.lock();
            match indices.by_stop_id.get(stop_id) {
                Some(ids) => indices.collect(ids),
                None => return,
            }
        };
        debug!(%stop_id, count = voices.len(), ?time, "Stopping voices");
        for voice in voices {
            voice.stop(time);
        }
    }

    /// Stops every voice in the given exclusive group.
    pub fn stop_group(&self, group: u32, time: Option<f64>) {
        let voices = {
            let indices = self.indices.lock();
            match indices.by_group.get(&group) {
                Some(ids) => indices.collect(ids),
                None => return,
            }
        };
        debug!(group, count = voices.len(), ?time, "Stopping exclusive group");
        for voice in voices {
            voice.stop(time);
        }
    }

    /// Number of live voices, including those still releasing.
    pub fn active_count(&self) -> usize {
        self.indices.lock().voices.len()
    }

    /// Number of live voices with the given stop identity.
    pub fn count_by_id(&self, stop_id: &StopId) -> usize {
        self.indices
            .lock()
            .by_stop_id
            .get(stop_id)
            .map_or(0, HashSet::len)
    }

    /// Number of live voices in the given exclusive group.
    pub fn count_in_group(&self, group: u32) -> usize {
        self.indices.lock().by_group.get(&group).map_or(0, HashSet::len)
    }
}

impl fmt::Debug for VoiceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indices = self.indices.lock();
        f.debug_struct("VoiceManager")
            .field("active_voices", &indices.voices.len())
            .field("stop_ids", &indices.by_stop_id.len())
            .field("groups", &indices.by_group.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::audio::mock::{GainEvent, MockContext};
    use crate::config::{Group, PlaybackParams, Region};
    use crate::samples::params::{resolve, NoteOverrides};

    const DESTINATION: NodeId = NodeId(0);

    fn params() -> VoiceParams {
        resolve(
            &PlaybackParams::default(),
            &Group::default(),
            &Region::default(),
            60,
            127,
            &NoteOverrides::default(),
        )
    }

    fn one_second() -> LoadedSample {
        LoadedSample::new(vec![0.0; 44100], 1, 44100)
    }

    fn start(
        context: &MockContext,
        params: &VoiceParams,
        stop_id: impl Into<StopId>,
        group: Option<u32>,
        start_time: Option<f64>,
    ) -> Arc<Voice> {
        Voice::start(
            Arc::new(context.clone()),
            &one_second(),
            params,
            DESTINATION,
            stop_id.into(),
            group,
            start_time,
        )
    }

    #[test]
    fn test_chain_without_filter() {
        let context = MockContext::new(44100);
        let voice = start(&context, &params(), 60u8, None, None);

        let source = &context.sources()[0];
        let gains = context.gains();
        assert!(context.filters().is_empty());
        assert_eq!(gains.len(), 2);
        assert_eq!(source.connections(), vec![gains[0].id()]);
        assert_eq!(gains[0].connections(), vec![gains[1].id()]);
        assert_eq!(gains[1].connections(), vec![DESTINATION]);
        assert_eq!(gains[0].initial(), 1.0);
        assert_eq!(gains[1].initial(), 1.0);
        assert_eq!(source.started(), Some((0.0, 0.0)));
        assert_eq!(voice.state(), VoiceState::Playing);
    }

    #[test]
    fn test_chain_with_filter_and_level() {
        let context = MockContext::new(44100);
        let mut params = params();
        params.lpf_cutoff_hz = 800.0;
        params.volume = -6.0;
        params.velocity = 64;
        start(&context, &params, 60u8, None, None);

        let source = &context.sources()[0];
        let filter = &context.filters()[0];
        let amp = &context.gains()[0];
        assert_eq!(filter.cutoff_hz(), 800.0);
        assert_eq!(source.connections(), vec![filter.id()]);
        assert_eq!(filter.connections(), vec![amp.id()]);

        let expected = 64.0 / 127.0 * db_to_gain(-6.0);
        assert!((amp.initial() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_filter_skipped_above_nyquist() {
        let context = MockContext::new(22050);
        let mut params = params();
        params.lpf_cutoff_hz = 15_000.0;
        start(&context, &params, 60u8, None, None);
        assert!(context.filters().is_empty());
    }

    #[test]
    fn test_attack_ramp() {
        let context = MockContext::new(44100);
        let mut params = params();
        params.amp_attack = 0.5;
        start(&context, &params, 60u8, None, Some(1.0));

        let amp = &context.gains()[0];
        assert_eq!(amp.initial(), 0.0);
        assert_eq!(
            amp.events(),
            vec![GainEvent::SetAt(0.0, 1.0), GainEvent::RampTo(1.0, 1.5)]
        );
    }

    #[test]
    fn test_detune_falls_back_to_playback_rate() {
        let mut params = params();
        params.detune = 1200.0;

        let context = MockContext::new(44100);
        start(&context, &params, 60u8, None, None);
        assert_eq!(context.sources()[0].detune(), 1200.0);
        assert_eq!(context.sources()[0].playback_rate(), 1.0);

        let context = MockContext::without_detune(44100);
        start(&context, &params, 60u8, None, None);
        assert_eq!(context.sources()[0].detune(), 0.0);
        assert!((context.sources()[0].playback_rate() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_loop_points() {
        let context = MockContext::new(44100);
        let mut params = params();
        params.looping = true;
        params.loop_start = 0.25;
        start(&context, &params, 1u8, None, None);
        assert_eq!(context.sources()[0].loop_points(), Some((0.25, None)));

        params.loop_end = 0.75;
        start(&context, &params, 2u8, None, None);
        assert_eq!(context.sources()[1].loop_points(), Some((0.25, Some(0.75))));

        params.looping = false;
        params.loop_auto = Some(crate::config::LoopAuto {
            start_ratio: 0.5,
            end_ratio: 1.0,
        });
        start(&context, &params, 3u8, None, None);
        assert_eq!(context.sources()[2].loop_points(), Some((0.5, Some(1.0))));

        params.loop_auto = None;
        start(&context, &params, 4u8, None, None);
        assert_eq!(context.sources()[3].loop_points(), None);
    }

    #[test]
    fn test_offset_in_frames() {
        let context = MockContext::new(44100);
        let mut params = params();
        params.offset = 22050;
        start(&context, &params, 60u8, None, Some(2.0));
        assert_eq!(context.sources()[0].started(), Some((2.0, 0.5)));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let context = MockContext::new(44100);
        let mut params = params();
        params.amp_release = 0.25;
        let voice = start(&context, &params, 60u8, None, None);

        context.advance_to(0.5);
        voice.stop(Some(0.5));
        voice.stop(Some(0.6));

        let source = &context.sources()[0];
        assert_eq!(source.stop_count(), 1);
        assert_eq!(source.stop_time(), Some(0.75));
        assert_eq!(voice.state(), VoiceState::Stopping);

        let envelope = &context.gains()[1];
        assert_eq!(
            envelope.events(),
            vec![
                GainEvent::Cancel(0.5),
                GainEvent::SetAt(1.0, 0.5),
                GainEvent::RampTo(0.0, 0.75),
            ]
        );

        context.advance_to(0.75);
        assert_eq!(voice.state(), VoiceState::Stopped);
        voice.stop(None);
        assert_eq!(source.stop_count(), 1);
    }

    #[test]
    fn test_stop_before_start_cuts_without_release() {
        let context = MockContext::new(44100);
        let voice = start(&context, &params(), 60u8, None, Some(1.0));

        voice.stop(None);

        let source = &context.sources()[0];
        assert_eq!(source.stop_time(), Some(0.0));
        assert!(context.gains()[1].events().is_empty());
        assert_eq!(voice.state(), VoiceState::Stopped);
        assert!(source.is_disconnected());
    }

    #[test]
    fn test_end_disconnects_and_runs_callbacks_once() {
        let context = MockContext::new(44100);
        let voice = start(&context, &params(), 60u8, None, None);
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = calls.clone();
            voice.on_ended(Box::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }

        // Natural end of the one second buffer.
        context.advance_to(1.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(context.sources()[0].is_disconnected());
        assert!(context.gains().iter().all(|gain| gain.is_disconnected()));

        // Registering after the end runs right away.
        let late = calls.clone();
        voice.on_ended(Box::new(move || {
            late.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_manager_indices() {
        let context = MockContext::new(44100);
        let manager = VoiceManager::new();
        let params = params();

        manager.add(start(&context, &params, "chord", Some(1), None));
        manager.add(start(&context, &params, "chord", None, None));
        manager.add(start(&context, &params, 64u8, Some(1), None));

        assert_eq!(manager.active_count(), 3);
        assert_eq!(manager.count_by_id(&StopId::from("chord")), 2);
        assert_eq!(manager.count_in_group(1), 2);

        // Stopping now ends voices synchronously while the snapshot is iterated.
        manager.stop_by_id(&StopId::from("chord"), None);
        assert_eq!(manager.active_count(), 1);
        assert_eq!(manager.count_by_id(&StopId::from("chord")), 0);
        assert_eq!(manager.count_in_group(1), 1);

        manager.stop_group(1, None);
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.count_in_group(1), 0);
    }

    #[test]
    fn test_manager_counts_releasing_voices() {
        let context = MockContext::new(44100);
        let manager = VoiceManager::new();
        let params = params();
        manager.add(start(&context, &params, 60u8, None, None));
        manager.add(start(&context, &params, 62u8, None, None));

        context.advance_to(0.1);
        manager.stop_all(Some(0.1));
        assert_eq!(manager.active_count(), 2);

        context.advance_to(0.5);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_manager_unknown_targets_are_noops() {
        let manager = VoiceManager::new();
        manager.stop_by_id(&StopId::from("nothing"), None);
        manager.stop_group(9, Some(1.0));
        manager.stop_all(None);
        assert_eq!(manager.active_count(), 0);
    }
}
