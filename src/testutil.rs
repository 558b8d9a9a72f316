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

//! Shared test fixtures.

mod audio;
mod polling;

pub use audio::wav_bytes;
pub use polling::eventually;

use crate::config::InstrumentDescriptor;

/// A drum kit with a hi-hat choke pair and a two-layer piano.
pub const DRUM_KIT: &str = r#"{
    "meta": { "name": "Test Kit" },
    "samples": { "baseUrl": "kit/", "formats": ["ogg"] },
    "aliases": { "kick": 36 },
    "groups": [
        {
            "regions": [
                { "sample": "kick", "key": 36 },
                { "sample": "snare", "key": 38 }
            ]
        },
        {
            "group": 1,
            "offBy": 1,
            "regions": [
                { "sample": "hat-closed", "key": 42 },
                { "sample": "hat-open", "key": 46 }
            ]
        },
        {
            "keyRange": [48, 72],
            "regions": [
                { "sample": "piano-c4", "keyRange": [48, 72], "pitch": 60 },
                { "sample": "piano-c4-hard", "keyRange": [48, 72], "pitch": 60, "velRange": [110, 127] }
            ]
        }
    ]
}"#;

/// Parses [`DRUM_KIT`].
pub fn drum_kit() -> InstrumentDescriptor {
    InstrumentDescriptor::from_json(DRUM_KIT).expect("test kit parses")
}
