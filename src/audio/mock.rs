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

//! A mock audio graph. Doesn't actually render anything.
//!
//! Time only moves when [`MockContext::advance_to`] is called. Every node created
//! through the context is recorded so tests and the `trace` command can inspect
//! what the engine built.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::{AudioContext, AudioNode, EndedCallback, GainNode, NodeId, OutputChannel, SourceNode};
use crate::samples::LoadedSample;

/// Global node ID counter.
static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

fn next_node_id() -> NodeId {
    NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::SeqCst))
}

/// Shared virtual clock.
type SharedTime = Arc<Mutex<f64>>;

/// Connection bookkeeping shared by every mock node.
#[derive(Default)]
struct Wiring {
    connections: Mutex<Vec<NodeId>>,
    disconnected: AtomicBool,
}

impl Wiring {
    fn connect(&self, destination: NodeId) {
        self.connections.lock().push(destination);
        self.disconnected.store(false, Ordering::Relaxed);
    }

    fn disconnect(&self) {
        self.connections.lock().clear();
        self.disconnected.store(true, Ordering::Relaxed);
    }
}

/// A mock audio context with a manually advanced clock.
#[derive(Clone)]
pub struct MockContext {
    time: SharedTime,
    sample_rate: u32,
    supports_detune: bool,
    sources: Arc<Mutex<Vec<Arc<MockSource>>>>,
    gains: Arc<Mutex<Vec<Arc<MockGain>>>>,
    filters: Arc<Mutex<Vec<Arc<MockFilter>>>>,
}

impl MockContext {
    /// Creates a context at time zero whose sources accept detune.
    pub fn new(sample_rate: u32) -> MockContext {
        MockContext {
            time: Arc::new(Mutex::new(0.0)),
            sample_rate,
            supports_detune: true,
            sources: Arc::new(Mutex::new(Vec::new())),
            gains: Arc::new(Mutex::new(Vec::new())),
            filters: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Creates a context whose sources only accept a playback rate.
    pub fn without_detune(sample_rate: u32) -> MockContext {
        MockContext {
            supports_detune: false,
            ..MockContext::new(sample_rate)
        }
    }

    /// Moves the clock forward and ends every source whose stop time or natural
    /// end has been reached. The clock never moves backwards.
    pub fn advance_to(&self, time: f64) {
        {
            let mut now = self.time.lock();
            if time > *now {
                *now = time;
            }
        }
        let now = self.current_time();
        trace!(now, "Mock context advanced");

        let sources = self.sources.lock().clone();
        for source in sources {
            if source.end_time().is_some_and(|end| end <= now) {
                source.end();
            }
        }
    }

    /// Every source created so far, in creation order.
    pub fn sources(&self) -> Vec<Arc<MockSource>> {
        self.sources.lock().clone()
    }

    /// Every gain created so far, in creation order.
    pub fn gains(&self) -> Vec<Arc<MockGain>> {
        self.gains.lock().clone()
    }

    /// Every filter created so far, in creation order.
    pub fn filters(&self) -> Vec<Arc<MockFilter>> {
        self.filters.lock().clone()
    }

    /// Sources that have not ended yet.
    pub fn playing_sources(&self) -> Vec<Arc<MockSource>> {
        self.sources
            .lock()
            .iter()
            .filter(|source| !source.has_ended())
            .cloned()
            .collect()
    }
}

impl AudioContext for MockContext {
    fn current_time(&self) -> f64 {
        *self.time.lock()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn supports_detune(&self) -> bool {
        self.supports_detune
    }

    fn create_buffer_source(&self, buffer: &LoadedSample) -> Arc<dyn SourceNode> {
        let source = Arc::new(MockSource::new(buffer.duration(), self.time.clone()));
        self.sources.lock().push(source.clone());
        source
    }

    fn create_gain(&self, value: f32) -> Arc<dyn GainNode> {
        let gain = Arc::new(MockGain::new(value));
        self.gains.lock().push(gain.clone());
        gain
    }

    fn create_lowpass(&self, cutoff_hz: f32) -> Arc<dyn AudioNode> {
        let filter = Arc::new(MockFilter::new(cutoff_hz));
        self.filters.lock().push(filter.clone());
        filter
    }
}

impl fmt::Debug for MockContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockContext")
            .field("time", &self.current_time())
            .field("sample_rate", &self.sample_rate)
            .field("sources", &self.sources.lock().len())
            .finish()
    }
}

#[derive(Default)]
struct SourceState {
    detune: f32,
    playback_rate: f32,
    loop_points: Option<(f64, Option<f64>)>,
    started: Option<(f64, f64)>,
    stop_time: Option<f64>,
    stop_calls: usize,
    ended: bool,
    callbacks: Vec<EndedCallback>,
}

/// A mock buffer source.
pub struct MockSource {
    id: NodeId,
    buffer_duration: f64,
    time: SharedTime,
    wiring: Wiring,
    state: Mutex<SourceState>,
}

impl MockSource {
    fn new(buffer_duration: f64, time: SharedTime) -> MockSource {
        MockSource {
            id: next_node_id(),
            buffer_duration,
            time,
            wiring: Wiring::default(),
            state: Mutex::new(SourceState {
                playback_rate: 1.0,
                ..Default::default()
            }),
        }
    }

    pub fn detune(&self) -> f32 {
        self.state.lock().detune
    }

    pub fn playback_rate(&self) -> f32 {
        self.state.lock().playback_rate
    }

    /// The loop start and end, if looping was enabled.
    pub fn loop_points(&self) -> Option<(f64, Option<f64>)> {
        self.state.lock().loop_points
    }

    /// The start time and buffer offset, if started.
    pub fn started(&self) -> Option<(f64, f64)> {
        self.state.lock().started
    }

    /// The most recently requested stop time.
    pub fn stop_time(&self) -> Option<f64> {
        self.state.lock().stop_time
    }

    /// How many times stop was called.
    pub fn stop_count(&self) -> usize {
        self.state.lock().stop_calls
    }

    pub fn has_ended(&self) -> bool {
        self.state.lock().ended
    }

    pub fn connections(&self) -> Vec<NodeId> {
        self.wiring.connections.lock().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.wiring.disconnected.load(Ordering::Relaxed)
    }

    /// The time at which this source stops producing sound, if known.
    fn end_time(&self) -> Option<f64> {
        let state = self.state.lock();
        if state.ended {
            return None;
        }
        let (when, offset) = state.started?;
        let natural = if state.loop_points.is_some() {
            None
        } else {
            let rate = f64::from(state.playback_rate.max(f32::EPSILON));
            Some(when + (self.buffer_duration - offset).max(0.0) / rate)
        };

        match (state.stop_time, natural) {
            (Some(stop), Some(natural)) => Some(stop.min(natural)),
            (stop, natural) => stop.or(natural),
        }
    }

    /// Marks the source ended and runs its callbacks outside the lock.
    fn end(&self) {
        let callbacks = {
            let mut state = self.state.lock();
            if state.ended {
                return;
            }
            state.ended = true;
            std::mem::take(&mut state.callbacks)
        };
        trace!(node = %self.id, "Mock source ended");
        for callback in callbacks {
            callback();
        }
    }
}

impl AudioNode for MockSource {
    fn id(&self) -> NodeId {
        self.id
    }

    fn connect(&self, destination: NodeId) {
        self.wiring.connect(destination);
    }

    fn disconnect(&self) {
        self.wiring.disconnect();
    }
}

impl SourceNode for MockSource {
    fn set_detune(&self, cents: f32) {
        self.state.lock().detune = cents;
    }

    fn set_playback_rate(&self, rate: f32) {
        self.state.lock().playback_rate = rate;
    }

    fn set_loop(&self, start: f64, end: Option<f64>) {
        self.state.lock().loop_points = Some((start, end));
    }

    fn start(&self, when: f64, offset: f64) {
        self.state.lock().started = Some((when, offset));
    }

    fn stop(&self, when: f64) {
        {
            let mut state = self.state.lock();
            state.stop_time = Some(when);
            state.stop_calls += 1;
        }
        if when <= *self.time.lock() {
            self.end();
        }
    }

    fn on_ended(&self, callback: EndedCallback) {
        let mut state = self.state.lock();
        if state.ended {
            drop(state);
            callback();
        } else {
            state.callbacks.push(callback);
        }
    }
}

/// A recorded change to a mock gain's value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GainEvent {
    Set(f32),
    SetAt(f32, f64),
    RampTo(f32, f64),
    Cancel(f64),
}

/// A mock gain node recording every scheduled change.
pub struct MockGain {
    id: NodeId,
    initial: f32,
    wiring: Wiring,
    events: Mutex<Vec<GainEvent>>,
}

impl MockGain {
    fn new(initial: f32) -> MockGain {
        MockGain {
            id: next_node_id(),
            initial,
            wiring: Wiring::default(),
            events: Mutex::new(Vec::new()),
        }
    }

    /// The value the gain was created with.
    pub fn initial(&self) -> f32 {
        self.initial
    }

    pub fn events(&self) -> Vec<GainEvent> {
        self.events.lock().clone()
    }

    pub fn connections(&self) -> Vec<NodeId> {
        self.wiring.connections.lock().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.wiring.disconnected.load(Ordering::Relaxed)
    }
}

impl AudioNode for MockGain {
    fn id(&self) -> NodeId {
        self.id
    }

    fn connect(&self, destination: NodeId) {
        self.wiring.connect(destination);
    }

    fn disconnect(&self) {
        self.wiring.disconnect();
    }
}

impl GainNode for MockGain {
    fn set_value(&self, value: f32) {
        self.events.lock().push(GainEvent::Set(value));
    }

    fn set_value_at(&self, value: f32, time: f64) {
        self.events.lock().push(GainEvent::SetAt(value, time));
    }

    fn linear_ramp_to(&self, value: f32, end_time: f64) {
        self.events.lock().push(GainEvent::RampTo(value, end_time));
    }

    fn cancel_scheduled(&self, time: f64) {
        self.events.lock().push(GainEvent::Cancel(time));
    }
}

/// A mock low-pass filter.
pub struct MockFilter {
    id: NodeId,
    cutoff_hz: f32,
    wiring: Wiring,
}

impl MockFilter {
    fn new(cutoff_hz: f32) -> MockFilter {
        MockFilter {
            id: next_node_id(),
            cutoff_hz,
            wiring: Wiring::default(),
        }
    }

    pub fn cutoff_hz(&self) -> f32 {
        self.cutoff_hz
    }

    pub fn connections(&self) -> Vec<NodeId> {
        self.wiring.connections.lock().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.wiring.disconnected.load(Ordering::Relaxed)
    }
}

impl AudioNode for MockFilter {
    fn id(&self) -> NodeId {
        self.id
    }

    fn connect(&self, destination: NodeId) {
        self.wiring.connect(destination);
    }

    fn disconnect(&self) {
        self.wiring.disconnect();
    }
}

/// A mock output channel.
pub struct MockChannel {
    id: NodeId,
    volume: Mutex<f32>,
    inserts: Mutex<Vec<NodeId>>,
    effects: Mutex<Vec<(String, NodeId, f32)>>,
    disconnected: AtomicBool,
}

impl MockChannel {
    pub fn new() -> MockChannel {
        MockChannel {
            id: next_node_id(),
            volume: Mutex::new(100.0),
            inserts: Mutex::new(Vec::new()),
            effects: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }

    pub fn inserts(&self) -> Vec<NodeId> {
        self.inserts.lock().clone()
    }

    /// The send level of the named effect, if it exists.
    pub fn effect_mix(&self, name: &str) -> Option<f32> {
        self.effects
            .lock()
            .iter()
            .find(|(effect, _, _)| effect == name)
            .map(|(_, _, mix)| *mix)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Relaxed)
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        MockChannel::new()
    }
}

impl OutputChannel for MockChannel {
    fn input(&self) -> NodeId {
        self.id
    }

    fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume;
    }

    fn add_insert(&self, node: Arc<dyn AudioNode>) {
        self.inserts.lock().push(node.id());
    }

    fn add_effect(&self, name: &str, node: Arc<dyn AudioNode>, mix: f32) {
        self.effects.lock().push((name.to_string(), node.id(), mix));
    }

    fn send_effect(&self, name: &str, mix: f32) {
        if let Some(effect) = self
            .effects
            .lock()
            .iter_mut()
            .find(|(effect, _, _)| effect == name)
        {
            effect.2 = mix;
        }
    }

    fn disconnect(&self) {
        self.disconnected.store(true, Ordering::Relaxed);
    }
}

impl fmt::Display for MockChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.id)
    }
}
