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

//! Resolution of the playback parameter cascade for one matched region.

use serde::Serialize;

use crate::config::params::{DEFAULT_AMP_RELEASE, DEFAULT_LPF_CUTOFF_HZ};
use crate::config::{Group, LoopAuto, PlaybackParams, Region, VelocityCurve};
use crate::note::Note;

/// Per-note values that sit on top of the cascade.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NoteOverrides {
    /// Added to the resolved detune.
    pub detune: Option<f32>,
    /// Replaces the resolved release.
    pub amp_release: Option<f32>,
    /// Replaces the resolved cutoff.
    pub lpf_cutoff_hz: Option<f32>,
    /// Replaces the resolved loop flag.
    pub looping: Option<bool>,
}

impl From<&Note> for NoteOverrides {
    fn from(note: &Note) -> Self {
        NoteOverrides {
            detune: note.detune,
            amp_release: note.amp_release,
            lpf_cutoff_hz: note.lpf_cutoff_hz,
            looping: note.looping,
        }
    }
}

/// Fully resolved parameters for one voice.
#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceParams {
    /// Pitch offset in cents.
    pub detune: f32,
    pub velocity: u8,
    /// Volume adjustment in dB.
    pub volume: f32,
    pub amp_release: f32,
    pub amp_attack: f32,
    pub lpf_cutoff_hz: f32,
    /// Start offset in sample frames.
    pub offset: u32,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub loop_start: f64,
    pub loop_end: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity_curve: Option<VelocityCurve>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_auto: Option<LoopAuto>,
}

/// Resolves the parameters for `region` played at `midi` and `velocity`.
///
/// Levels merge field by field, later winning: hardcoded defaults, instrument
/// defaults, group, region. Only [`PlaybackParams`] fields take part.
pub fn resolve(
    defaults: &PlaybackParams,
    group: &Group,
    region: &Region,
    midi: u8,
    velocity: u8,
    overrides: &NoteOverrides,
) -> VoiceParams {
    let merged = PlaybackParams::DEFAULTS
        .merge(defaults)
        .merge(group.params())
        .merge(region.params());

    let pitch = region.pitch().unwrap_or(midi);
    let semitones = f32::from(midi) - f32::from(pitch);
    let tune = merged.tune.unwrap_or_default();
    let detune = (semitones + tune) * 100.0
        + merged.detune.unwrap_or_default()
        + overrides.detune.unwrap_or_default();

    VoiceParams {
        detune,
        velocity,
        volume: merged.volume.unwrap_or_default(),
        amp_release: overrides
            .amp_release
            .or(merged.amp_release)
            .unwrap_or(DEFAULT_AMP_RELEASE),
        amp_attack: merged.amp_attack.unwrap_or_default(),
        lpf_cutoff_hz: overrides
            .lpf_cutoff_hz
            .or(merged.lpf_cutoff_hz)
            .unwrap_or(DEFAULT_LPF_CUTOFF_HZ),
        offset: merged.offset.unwrap_or_default(),
        looping: overrides.looping.or(merged.looping).unwrap_or_default(),
        loop_start: merged.loop_start.unwrap_or_default(),
        loop_end: merged.loop_end.unwrap_or_default(),
        velocity_curve: region.velocity_curve(),
        loop_auto: region.loop_auto(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstrumentDescriptor;

    fn descriptor(json: &str) -> InstrumentDescriptor {
        InstrumentDescriptor::from_json(json).unwrap()
    }

    fn resolve_first(
        descriptor: &InstrumentDescriptor,
        midi: u8,
        overrides: &NoteOverrides,
    ) -> VoiceParams {
        let group = &descriptor.groups()[0];
        resolve(
            descriptor.defaults(),
            group,
            &group.regions()[0],
            midi,
            100,
            overrides,
        )
    }

    #[test]
    fn test_detune_arithmetic() {
        let plain = descriptor(
            r#"{ "samples": {}, "groups": [{ "regions": [{ "sample": "c4", "key": 60 }] }] }"#,
        );
        assert_eq!(
            resolve_first(&plain, 65, &NoteOverrides::default()).detune,
            500.0
        );

        let tuned = descriptor(
            r#"{ "samples": {}, "groups": [{ "regions": [{ "sample": "c4", "key": 60, "tune": 1 }] }] }"#,
        );
        assert_eq!(
            resolve_first(&tuned, 65, &NoteOverrides::default()).detune,
            600.0
        );

        let detuned = descriptor(
            r#"{ "samples": {}, "groups": [{ "regions": [{ "sample": "c4", "key": 60, "detune": 25 }] }] }"#,
        );
        assert_eq!(
            resolve_first(&detuned, 65, &NoteOverrides::default()).detune,
            525.0
        );

        let overrides = NoteOverrides {
            detune: Some(-50.0),
            ..Default::default()
        };
        assert_eq!(resolve_first(&plain, 65, &overrides).detune, 450.0);
    }

    #[test]
    fn test_key_range_without_pitch_is_untransposed() {
        let descriptor = descriptor(
            r#"{ "samples": {}, "groups": [{ "regions": [{ "sample": "pad", "keyRange": [48, 72] }] }] }"#,
        );
        assert_eq!(
            resolve_first(&descriptor, 48, &NoteOverrides::default()).detune,
            0.0
        );
        assert_eq!(
            resolve_first(&descriptor, 60, &NoteOverrides::default()).detune,
            0.0
        );
    }

    #[test]
    fn test_cascade_order() {
        let descriptor = descriptor(
            r#"{
                "samples": {},
                "defaults": { "volume": -6, "ampRelease": 1.0, "ampAttack": 0.01, "offset": 10 },
                "groups": [{
                    "volume": -3,
                    "lpfCutoffHz": 4000,
                    "keyRange": [0, 10],
                    "regions": [{ "sample": "a", "key": 5, "ampRelease": 2.0 }]
                }]
            }"#,
        );
        let params = resolve_first(&descriptor, 5, &NoteOverrides::default());

        assert_eq!(params.volume, -3.0);
        assert_eq!(params.amp_release, 2.0);
        assert_eq!(params.amp_attack, 0.01);
        assert_eq!(params.lpf_cutoff_hz, 4000.0);
        assert_eq!(params.offset, 10);
        assert_eq!(params.velocity, 100);
        assert!(!params.looping);
    }

    #[test]
    fn test_hardcoded_defaults() {
        let descriptor = descriptor(
            r#"{ "samples": {}, "groups": [{ "regions": [{ "sample": "a" }] }] }"#,
        );
        let params = resolve_first(&descriptor, 60, &NoteOverrides::default());

        assert_eq!(params.detune, 0.0);
        assert_eq!(params.volume, 0.0);
        assert_eq!(params.amp_release, 0.3);
        assert_eq!(params.amp_attack, 0.0);
        assert_eq!(params.lpf_cutoff_hz, 20_000.0);
        assert_eq!(params.offset, 0);
        assert!(!params.looping);
        assert_eq!((params.loop_start, params.loop_end), (0.0, 0.0));
        assert_eq!(params.velocity_curve, None);
    }

    #[test]
    fn test_note_overrides_replace() {
        let descriptor = descriptor(
            r#"{ "samples": {}, "groups": [{ "ampRelease": 1.0, "lpfCutoffHz": 1000, "loop": true,
                 "regions": [{ "sample": "a" }] }] }"#,
        );
        let overrides = NoteOverrides {
            amp_release: Some(0.05),
            lpf_cutoff_hz: Some(300.0),
            looping: Some(false),
            detune: None,
        };
        let params = resolve_first(&descriptor, 60, &overrides);

        assert_eq!(params.amp_release, 0.05);
        assert_eq!(params.lpf_cutoff_hz, 300.0);
        assert!(!params.looping);
    }

    #[test]
    fn test_region_only_fields_pass_through() {
        let descriptor = descriptor(
            r#"{ "samples": {}, "groups": [{ "regions": [{ "sample": "a",
                 "velocityCurve": [64, 0.8], "loopAuto": { "startRatio": 0.1, "endRatio": 0.9 } }] }] }"#,
        );
        let params = resolve_first(&descriptor, 60, &NoteOverrides::default());

        assert_eq!(params.velocity_curve, Some(VelocityCurve(64, 0.8)));
        assert_eq!(
            params.loop_auto,
            Some(LoopAuto {
                start_ratio: 0.1,
                end_ratio: 0.9
            })
        );
    }
}
