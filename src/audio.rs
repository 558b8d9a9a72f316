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

//! The audio graph the engine renders into.
//!
//! The engine never produces samples itself. It builds a small chain of nodes per
//! voice on whatever graph implements [`AudioContext`] and routes the chain into an
//! [`OutputChannel`].

use std::fmt;
use std::sync::Arc;

use crate::samples::LoadedSample;

pub mod mock;

/// Identifies a node in the audio graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Callback invoked when a source finishes playing.
pub type EndedCallback = Box<dyn FnOnce() + Send>;

/// A source of the current playback time, in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// The audio graph and its clock.
pub trait AudioContext: Send + Sync {
    /// Current context time in seconds.
    fn current_time(&self) -> f64;

    /// Sample rate of the graph.
    fn sample_rate(&self) -> u32;

    /// Whether buffer sources accept a detune in cents. When false, pitch is set
    /// through the playback rate instead.
    fn supports_detune(&self) -> bool;

    /// Creates a source bound to the given buffer.
    fn create_buffer_source(&self, buffer: &LoadedSample) -> Arc<dyn SourceNode>;

    /// Creates a gain node with the given initial value.
    fn create_gain(&self, value: f32) -> Arc<dyn GainNode>;

    /// Creates a low-pass filter with the given cutoff.
    fn create_lowpass(&self, cutoff_hz: f32) -> Arc<dyn AudioNode>;
}

/// Adapts an [`AudioContext`] to a [`Clock`].
pub struct ContextClock(pub Arc<dyn AudioContext>);

impl Clock for ContextClock {
    fn now(&self) -> f64 {
        self.0.current_time()
    }
}

/// A node that can be wired into the graph.
pub trait AudioNode: Send + Sync {
    fn id(&self) -> NodeId;

    /// Connects this node's output to the given node.
    fn connect(&self, destination: NodeId);

    /// Disconnects every output of this node.
    fn disconnect(&self);
}

/// A one-shot source playing a decoded buffer.
pub trait SourceNode: AudioNode {
    /// Pitch offset in cents. Only meaningful when the context supports detune.
    fn set_detune(&self, cents: f32);

    fn set_playback_rate(&self, rate: f32);

    /// Loops between `start` and `end` seconds. `None` as the end means the end of the buffer.
    fn set_loop(&self, start: f64, end: Option<f64>);

    /// Starts playback at context time `when`, `offset` seconds into the buffer.
    fn start(&self, when: f64, offset: f64);

    /// Stops playback at context time `when`.
    fn stop(&self, when: f64);

    /// Registers a callback for when the source finishes, whether stopped or exhausted.
    fn on_ended(&self, callback: EndedCallback);
}

/// A gain stage with a schedulable value.
pub trait GainNode: AudioNode {
    fn set_value(&self, value: f32);

    fn set_value_at(&self, value: f32, time: f64);

    /// Ramps linearly from the previous scheduled value to `value`, arriving at `end_time`.
    fn linear_ramp_to(&self, value: f32, end_time: f64);

    /// Drops every scheduled change at or after `time`.
    fn cancel_scheduled(&self, time: f64);
}

/// The output bus voices are routed into.
pub trait OutputChannel: Send + Sync {
    /// The node voices connect to.
    fn input(&self) -> NodeId;

    fn set_volume(&self, volume: f32);

    /// Inserts a node in series on the channel.
    fn add_insert(&self, node: Arc<dyn AudioNode>);

    /// Adds a named parallel effect with the given send level.
    fn add_effect(&self, name: &str, node: Arc<dyn AudioNode>, mix: f32);

    /// Changes the send level of a named effect.
    fn send_effect(&self, name: &str, mix: f32);

    fn disconnect(&self);
}
