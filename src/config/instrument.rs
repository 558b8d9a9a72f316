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
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::params::PlaybackParams;

/// An inclusive `[low, high]` range of MIDI values.
pub type Range = [u8; 2];

/// Controller number to inclusive value range.
pub type CcRanges = BTreeMap<u8, Range>;

/// The loaded definition of an instrument.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct InstrumentDescriptor {
    /// Free-form information about the instrument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<InstrumentMeta>,

    /// Where the samples live. Resolved by the sample loader.
    samples: SamplesLocation,

    /// Instrument-wide playback parameters.
    #[serde(default)]
    defaults: PlaybackParams,

    /// The region groups, in matching order.
    #[serde(default)]
    groups: Vec<Group>,

    /// Note name aliases, resolved to a MIDI note number.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    aliases: HashMap<String, u8>,
}

impl InstrumentDescriptor {
    /// Parses a descriptor from a JSON document.
    pub fn from_json(json: &str) -> Result<InstrumentDescriptor, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parses a descriptor from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<InstrumentDescriptor, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Gets the instrument metadata.
    pub fn meta(&self) -> Option<&InstrumentMeta> {
        self.meta.as_ref()
    }

    /// Gets the sample location.
    pub fn samples(&self) -> &SamplesLocation {
        &self.samples
    }

    /// Gets the instrument-wide playback parameters.
    pub fn defaults(&self) -> &PlaybackParams {
        &self.defaults
    }

    /// Gets the groups.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Gets the note aliases.
    pub fn aliases(&self) -> &HashMap<String, u8> {
        &self.aliases
    }

    /// Returns every sample key referenced by a region, in descriptor order, without duplicates.
    pub fn sample_keys(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.groups
            .iter()
            .flat_map(|group| group.regions.iter())
            .map(|region| region.sample.as_str())
            .filter(|sample| seen.insert(*sample))
            .collect()
    }

    /// Returns the total number of regions across all groups.
    pub fn region_count(&self) -> usize {
        self.groups.iter().map(|group| group.regions.len()).sum()
    }
}

/// Descriptive information about an instrument.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct InstrumentMeta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// The base location of an instrument's samples.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct SamplesLocation {
    /// Prefix prepended to every sample path.
    #[serde(default)]
    base_url: String,

    /// Audio encodings in order of preference, e.g. `["ogg", "m4a"]`.
    #[serde(default)]
    formats: Vec<String>,

    /// Optional sample key to path remapping.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    map: HashMap<String, String>,
}

impl SamplesLocation {
    /// Gets the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Gets the preferred formats.
    pub fn formats(&self) -> &[String] {
        &self.formats
    }

    /// Returns the path for the given sample key, honoring the remapping.
    pub fn path_for(&self, sample: &str) -> String {
        match self.map.get(sample) {
            Some(path) => path.clone(),
            None => sample.to_string(),
        }
    }
}

/// A named bucket of regions sharing filters and defaults.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Inclusive key range. Absent matches every key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_range: Option<Range>,

    /// Inclusive velocity range. Absent matches every velocity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vel_range: Option<Range>,

    /// Controller value ranges that must all hold.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    cc_range: CcRanges,

    /// Round robin cycle length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seq_length: Option<u32>,

    /// Exclusive group number applied to this group's voices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<u32>,

    /// Exclusive group number silenced when this group triggers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    off_by: Option<u32>,

    /// Playback parameters inherited by this group's regions.
    #[serde(flatten)]
    params: PlaybackParams,

    /// The regions in this group.
    #[serde(default)]
    regions: Vec<Region>,
}

impl Group {
    /// Gets the key range.
    pub fn key_range(&self) -> Option<Range> {
        self.key_range
    }

    /// Gets the velocity range.
    pub fn vel_range(&self) -> Option<Range> {
        self.vel_range
    }

    /// Gets the controller ranges.
    pub fn cc_range(&self) -> &CcRanges {
        &self.cc_range
    }

    /// Gets the round robin cycle length. A length of zero is treated as absent.
    pub fn seq_length(&self) -> Option<u32> {
        self.seq_length.filter(|length| *length > 0)
    }

    /// Gets the exclusive group number.
    pub fn group(&self) -> Option<u32> {
        self.group
    }

    /// Gets the exclusive group silenced by this group.
    pub fn off_by(&self) -> Option<u32> {
        self.off_by
    }

    /// Gets the inheritable playback parameters.
    pub fn params(&self) -> &PlaybackParams {
        &self.params
    }

    /// Gets the regions.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}

/// Maps one sample to a set of matching conditions.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    /// The buffer key of the sample to play.
    sample: String,

    /// Single key shorthand: the key range is `[key, key]` and the pitch is `key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<u8>,

    /// Inclusive key range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_range: Option<Range>,

    /// The note the sample was recorded at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pitch: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    vel_range: Option<Range>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    cc_range: CcRanges,

    /// 1-based position in the owning group's round robin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seq_position: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    off_by: Option<u32>,

    /// Single point of the velocity to gain curve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    velocity_curve: Option<VelocityCurve>,

    /// Loop points as ratios of the buffer duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    loop_auto: Option<LoopAuto>,

    #[serde(flatten)]
    params: PlaybackParams,
}

impl Region {
    /// Gets the sample key.
    pub fn sample(&self) -> &str {
        &self.sample
    }

    /// Gets the single key shorthand.
    pub fn key(&self) -> Option<u8> {
        self.key
    }

    /// Gets the effective key range: the explicit range, else `[key, key]`, else unconstrained.
    pub fn key_range(&self) -> Option<Range> {
        self.key_range.or(self.key.map(|key| [key, key]))
    }

    /// Gets the pitch the sample is tuned to, if one was ever given.
    pub fn pitch(&self) -> Option<u8> {
        self.pitch.or(self.key)
    }

    /// Gets the velocity range.
    pub fn vel_range(&self) -> Option<Range> {
        self.vel_range
    }

    /// Gets the controller ranges.
    pub fn cc_range(&self) -> &CcRanges {
        &self.cc_range
    }

    /// Gets the round robin position.
    pub fn seq_position(&self) -> Option<u32> {
        self.seq_position
    }

    /// Gets the exclusive group number.
    pub fn group(&self) -> Option<u32> {
        self.group
    }

    /// Gets the exclusive group silenced by this region.
    pub fn off_by(&self) -> Option<u32> {
        self.off_by
    }

    /// Gets the velocity curve point.
    pub fn velocity_curve(&self) -> Option<VelocityCurve> {
        self.velocity_curve
    }

    /// Gets the automatic loop ratios.
    pub fn loop_auto(&self) -> Option<LoopAuto> {
        self.loop_auto
    }

    /// Gets the inheritable playback parameters.
    pub fn params(&self) -> &PlaybackParams {
        &self.params
    }
}

/// A single `(velocity, gain)` point the velocity curve passes through.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct VelocityCurve(pub u8, pub f32);

/// Loop points expressed as ratios of the buffer duration.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoopAuto {
    pub start_ratio: f64,
    pub end_ratio: f64,
}
