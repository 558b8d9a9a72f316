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

//! Note events and stop targets as accepted at the engine boundary.
//!
//! Both accept a bare identifier (`60`, `"C4"`) or a full record. They are
//! normalized exactly once, so everything past the boundary sees a [`Note`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::samples::Scheduled;

/// A note given either as a MIDI number or as a name (`"C4"`, `"F#2"`, or an instrument alias).
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum NoteId {
    Number(u8),
    Name(String),
}

impl From<u8> for NoteId {
    fn from(number: u8) -> Self {
        NoteId::Number(number)
    }
}

impl From<&str> for NoteId {
    fn from(name: &str) -> Self {
        NoteId::Name(name.to_string())
    }
}

impl From<String> for NoteId {
    fn from(name: String) -> Self {
        NoteId::Name(name)
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteId::Number(number) => write!(f, "{}", number),
            NoteId::Name(name) => write!(f, "{}", name),
        }
    }
}

/// The identity a stop call targets. Not unique: several voices may share one.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum StopId {
    Number(i64),
    Name(String),
}

impl From<NoteId> for StopId {
    fn from(note: NoteId) -> Self {
        match note {
            NoteId::Number(number) => StopId::Number(number.into()),
            NoteId::Name(name) => StopId::Name(name),
        }
    }
}

impl From<u8> for StopId {
    fn from(number: u8) -> Self {
        StopId::Number(number.into())
    }
}

impl From<i64> for StopId {
    fn from(number: i64) -> Self {
        StopId::Number(number)
    }
}

impl From<&str> for StopId {
    fn from(name: &str) -> Self {
        StopId::Name(name.to_string())
    }
}

impl From<String> for StopId {
    fn from(name: String) -> Self {
        StopId::Name(name)
    }
}

impl fmt::Display for StopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopId::Number(number) => write!(f, "{}", number),
            StopId::Name(name) => write!(f, "{}", name),
        }
    }
}

/// A request to start a note.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(from = "NoteEventRepr", rename_all = "camelCase")]
pub struct NoteEvent {
    pub note: NoteId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<u8>,
    /// Context time in seconds at which the note starts. Absent means now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    /// Seconds after the start at which the note is released.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Cents added on top of the resolved detune.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detune: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lpf_cutoff_hz: Option<f32>,
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub looping: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amp_release: Option<f32>,
    /// Identity used by later stop calls. Defaults to the note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_id: Option<StopId>,
}

impl NoteEvent {
    /// Creates a note event with nothing but the note set.
    pub fn new(note: impl Into<NoteId>) -> NoteEvent {
        NoteEvent {
            note: note.into(),
            velocity: None,
            time: None,
            duration: None,
            detune: None,
            lpf_cutoff_hz: None,
            looping: None,
            amp_release: None,
            stop_id: None,
        }
    }

    pub fn velocity(mut self, velocity: u8) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub fn at(mut self, time: f64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn detune(mut self, cents: f32) -> Self {
        self.detune = Some(cents);
        self
    }

    pub fn lpf_cutoff_hz(mut self, cutoff: f32) -> Self {
        self.lpf_cutoff_hz = Some(cutoff);
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = Some(looping);
        self
    }

    pub fn amp_release(mut self, release: f32) -> Self {
        self.amp_release = Some(release);
        self
    }

    pub fn stop_id(mut self, stop_id: impl Into<StopId>) -> Self {
        self.stop_id = Some(stop_id.into());
        self
    }

    /// Resolves the note to a MIDI number and fills in every default.
    pub fn normalize(self, aliases: &HashMap<String, u8>, default_velocity: u8) -> Note {
        let midi = match &self.note {
            NoteId::Number(number) => Some(*number).filter(|number| *number <= 127),
            NoteId::Name(name) => aliases.get(name).copied().or_else(|| note_to_midi(name)),
        };
        let midi = midi.unwrap_or_else(|| {
            debug!(note = %self.note, "Unresolvable note, using 0");
            0
        });

        Note {
            stop_id: self.stop_id.unwrap_or_else(|| self.note.clone().into()),
            note: self.note,
            midi,
            velocity: self.velocity.unwrap_or(default_velocity).min(127),
            time: self.time,
            duration: self.duration,
            detune: self.detune,
            lpf_cutoff_hz: self.lpf_cutoff_hz,
            looping: self.looping,
            amp_release: self.amp_release,
        }
    }
}

impl From<NoteId> for NoteEvent {
    fn from(note: NoteId) -> Self {
        NoteEvent::new(note)
    }
}

impl From<u8> for NoteEvent {
    fn from(number: u8) -> Self {
        NoteEvent::new(number)
    }
}

impl From<&str> for NoteEvent {
    fn from(name: &str) -> Self {
        NoteEvent::new(name)
    }
}

impl From<String> for NoteEvent {
    fn from(name: String) -> Self {
        NoteEvent::new(name)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NoteEventRepr {
    Bare(NoteId),
    Record(NoteRecord),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NoteRecord {
    note: NoteId,
    velocity: Option<u8>,
    time: Option<f64>,
    duration: Option<f64>,
    detune: Option<f32>,
    lpf_cutoff_hz: Option<f32>,
    #[serde(rename = "loop")]
    looping: Option<bool>,
    amp_release: Option<f32>,
    stop_id: Option<StopId>,
}

impl From<NoteEventRepr> for NoteEvent {
    fn from(repr: NoteEventRepr) -> Self {
        match repr {
            NoteEventRepr::Bare(note) => NoteEvent::new(note),
            NoteEventRepr::Record(record) => NoteEvent {
                note: record.note,
                velocity: record.velocity,
                time: record.time,
                duration: record.duration,
                detune: record.detune,
                lpf_cutoff_hz: record.lpf_cutoff_hz,
                looping: record.looping,
                amp_release: record.amp_release,
                stop_id: record.stop_id,
            },
        }
    }
}

/// A fully normalized note. This is the only form seen past the engine boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct Note {
    pub note: NoteId,
    pub midi: u8,
    pub velocity: u8,
    pub stop_id: StopId,
    pub time: Option<f64>,
    pub duration: Option<f64>,
    pub detune: Option<f32>,
    pub lpf_cutoff_hz: Option<f32>,
    pub looping: Option<bool>,
    pub amp_release: Option<f32>,
}

impl Scheduled for Note {
    fn due(&self) -> Option<f64> {
        self.time
    }
}

/// What a stop call targets. No stop identity means every voice.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(from = "StopTargetRepr", rename_all = "camelCase")]
pub struct StopTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_id: Option<StopId>,
    /// Context time at which to stop. Absent means now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

impl StopTarget {
    /// Targets every voice, now.
    pub fn all() -> StopTarget {
        StopTarget::default()
    }

    /// Targets every voice at the given time.
    pub fn all_at(time: f64) -> StopTarget {
        StopTarget {
            stop_id: None,
            time: Some(time),
        }
    }

    /// Sets the time at which to stop.
    pub fn at(mut self, time: f64) -> Self {
        self.time = Some(time);
        self
    }
}

impl From<StopId> for StopTarget {
    fn from(id: StopId) -> Self {
        StopTarget {
            stop_id: Some(id),
            time: None,
        }
    }
}

impl From<NoteId> for StopTarget {
    fn from(note: NoteId) -> Self {
        StopId::from(note).into()
    }
}

impl From<u8> for StopTarget {
    fn from(number: u8) -> Self {
        StopId::from(number).into()
    }
}

impl From<i64> for StopTarget {
    fn from(number: i64) -> Self {
        StopId::from(number).into()
    }
}

impl From<&str> for StopTarget {
    fn from(name: &str) -> Self {
        StopId::from(name).into()
    }
}

impl From<String> for StopTarget {
    fn from(name: String) -> Self {
        StopId::from(name).into()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StopTargetRepr {
    Bare(StopId),
    Record {
        #[serde(rename = "stopId")]
        stop_id: Option<StopId>,
        time: Option<f64>,
    },
}

impl From<StopTargetRepr> for StopTarget {
    fn from(repr: StopTargetRepr) -> Self {
        match repr {
            StopTargetRepr::Bare(id) => StopTarget {
                stop_id: Some(id),
                time: None,
            },
            StopTargetRepr::Record { stop_id, time } => StopTarget { stop_id, time },
        }
    }
}

/// Parses a scientific pitch name (`"C4"` is 60, `"A4"` is 69) into a MIDI number.
///
/// Accepts any number of `#` or `b` accidentals and negative octaves. A plain
/// number is accepted as-is. Names without an octave, or outside 0-127, return `None`.
pub fn note_to_midi(name: &str) -> Option<u8> {
    let name = name.trim();
    if let Ok(number) = name.parse::<u8>() {
        return (number <= 127).then_some(number);
    }

    let mut chars = name.chars();
    let step: i32 = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let rest = chars.as_str();
    let octave_start = rest.find(|c: char| c != '#' && c != 'b').unwrap_or(rest.len());
    let (accidentals, octave) = rest.split_at(octave_start);
    let alteration: i32 = accidentals
        .chars()
        .map(|c| if c == '#' { 1 } else { -1 })
        .sum();
    // Valid notes span octaves -1 to 9.
    let octave: i8 = octave.parse().ok()?;

    let midi = (i32::from(octave) + 1) * 12 + step + alteration;
    u8::try_from(midi).ok().filter(|midi| *midi <= 127)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_to_midi() {
        assert_eq!(note_to_midi("C4"), Some(60));
        assert_eq!(note_to_midi("c4"), Some(60));
        assert_eq!(note_to_midi("A4"), Some(69));
        assert_eq!(note_to_midi("C#4"), Some(61));
        assert_eq!(note_to_midi("Db4"), Some(61));
        assert_eq!(note_to_midi("Bb3"), Some(58));
        assert_eq!(note_to_midi("F##2"), Some(43));
        assert_eq!(note_to_midi("C-1"), Some(0));
        assert_eq!(note_to_midi("G9"), Some(127));
        assert_eq!(note_to_midi("64"), Some(64));
    }

    #[test]
    fn test_note_to_midi_invalid() {
        assert_eq!(note_to_midi("C"), None);
        assert_eq!(note_to_midi("H4"), None);
        assert_eq!(note_to_midi(""), None);
        assert_eq!(note_to_midi("G#9"), None);
        assert_eq!(note_to_midi("Cb-1"), None);
        assert_eq!(note_to_midi("200"), None);
        assert_eq!(note_to_midi("kick"), None);
    }

    #[test]
    fn test_note_to_midi_extreme_octaves() {
        assert_eq!(note_to_midi("C2147483647"), None);
        assert_eq!(note_to_midi("C-2147483648"), None);
        assert_eq!(note_to_midi("C127"), None);
        assert_eq!(note_to_midi("C-128"), None);
    }

    #[test]
    fn test_normalize_defaults() {
        let note = NoteEvent::from("C4").normalize(&HashMap::new(), 100);

        assert_eq!(note.midi, 60);
        assert_eq!(note.velocity, 100);
        assert_eq!(note.stop_id, StopId::Name("C4".to_string()));
        assert_eq!(note.time, None);

        let note = NoteEvent::from(62).normalize(&HashMap::new(), 100);
        assert_eq!(note.midi, 62);
        assert_eq!(note.stop_id, StopId::Number(62));
    }

    #[test]
    fn test_normalize_overrides() {
        let note = NoteEvent::new(60)
            .velocity(30)
            .at(1.5)
            .duration(0.5)
            .detune(-50.0)
            .stop_id("chord")
            .normalize(&HashMap::new(), 100);

        assert_eq!(note.velocity, 30);
        assert_eq!(note.time, Some(1.5));
        assert_eq!(note.duration, Some(0.5));
        assert_eq!(note.detune, Some(-50.0));
        assert_eq!(note.stop_id, StopId::Name("chord".to_string()));
        assert_eq!(note.due(), Some(1.5));
    }

    #[test]
    fn test_normalize_aliases_and_unresolved() {
        let aliases = HashMap::from([("kick".to_string(), 36), ("C4".to_string(), 48)]);

        let note = NoteEvent::from("kick").normalize(&aliases, 100);
        assert_eq!(note.midi, 36);
        assert_eq!(note.stop_id, StopId::Name("kick".to_string()));

        // Aliases are consulted before note names.
        assert_eq!(NoteEvent::from("C4").normalize(&aliases, 100).midi, 48);

        assert_eq!(NoteEvent::from("nothing").normalize(&aliases, 100).midi, 0);
        assert_eq!(NoteEvent::from("C2147483647").normalize(&aliases, 100).midi, 0);
        assert_eq!(NoteEvent::new(200).normalize(&aliases, 100).midi, 0);
        assert_eq!(NoteEvent::new(127).normalize(&aliases, 100).midi, 127);
    }

    #[test]
    fn test_note_event_wire_forms() {
        let bare: NoteEvent = serde_json::from_str("60").unwrap();
        assert_eq!(bare, NoteEvent::new(60));

        let bare: NoteEvent = serde_json::from_str(r#""D#3""#).unwrap();
        assert_eq!(bare, NoteEvent::new("D#3"));

        let record: NoteEvent = serde_json::from_str(
            r#"{ "note": "C4", "velocity": 80, "time": 2.0, "lpfCutoffHz": 500, "loop": true, "stopId": 7 }"#,
        )
        .unwrap();
        assert_eq!(
            record,
            NoteEvent::new("C4")
                .velocity(80)
                .at(2.0)
                .lpf_cutoff_hz(500.0)
                .looping(true)
                .stop_id(7i64)
        );
    }

    #[test]
    fn test_stop_target_wire_forms() {
        let all: StopTarget = serde_json::from_str("{}").unwrap();
        assert_eq!(all, StopTarget::all());

        let at: StopTarget = serde_json::from_str(r#"{ "time": 3.0 }"#).unwrap();
        assert_eq!(at, StopTarget::all_at(3.0));

        let bare: StopTarget = serde_json::from_str(r#""C4""#).unwrap();
        assert_eq!(bare, StopTarget::from("C4"));

        let record: StopTarget = serde_json::from_str(r#"{ "stopId": 60, "time": 1.0 }"#).unwrap();
        assert_eq!(record, StopTarget::from(60u8).at(1.0));
    }
}
