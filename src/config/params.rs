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
use serde::{Deserialize, Serialize};

/// Default amplitude release time in seconds.
pub const DEFAULT_AMP_RELEASE: f32 = 0.3;

/// Default low-pass cutoff in Hz. At this value the filter is left out of the chain.
pub const DEFAULT_LPF_CUTOFF_HZ: f32 = 20_000.0;

/// Playback parameters that cascade from the instrument down to a single region.
///
/// Every field is optional at every level; a missing field inherits the value
/// from the level above it.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackParams {
    /// Volume adjustment in dB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,

    /// Transposition in semitones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tune: Option<f32>,

    /// Fine tuning in cents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detune: Option<f32>,

    /// Amplitude release time in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amp_release: Option<f32>,

    /// Amplitude attack time in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amp_attack: Option<f32>,

    /// Low-pass filter cutoff in Hz.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lpf_cutoff_hz: Option<f32>,

    /// Playback start offset in sample frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,

    /// Whether the sample loops.
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub looping: Option<bool>,

    /// Loop start in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_start: Option<f64>,

    /// Loop end in seconds. Zero means the end of the buffer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_end: Option<f64>,
}

impl PlaybackParams {
    /// The hardcoded base of the cascade. Every field is set.
    pub const DEFAULTS: PlaybackParams = PlaybackParams {
        volume: Some(0.0),
        tune: Some(0.0),
        detune: Some(0.0),
        amp_release: Some(DEFAULT_AMP_RELEASE),
        amp_attack: Some(0.0),
        lpf_cutoff_hz: Some(DEFAULT_LPF_CUTOFF_HZ),
        offset: Some(0),
        looping: Some(false),
        loop_start: Some(0.0),
        loop_end: Some(0.0),
    };

    /// Returns a new set of parameters where every field present in `over`
    /// replaces the corresponding field of `self`.
    pub fn merge(&self, over: &PlaybackParams) -> PlaybackParams {
        PlaybackParams {
            volume: over.volume.or(self.volume),
            tune: over.tune.or(self.tune),
            detune: over.detune.or(self.detune),
            amp_release: over.amp_release.or(self.amp_release),
            amp_attack: over.amp_attack.or(self.amp_attack),
            lpf_cutoff_hz: over.lpf_cutoff_hz.or(self.lpf_cutoff_hz),
            offset: over.offset.or(self.offset),
            looping: over.looping.or(self.looping),
            loop_start: over.loop_start.or(self.loop_start),
            loop_end: over.loop_end.or(self.loop_end),
        }
    }
}
