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

//! Conversion of Standard MIDI Files into note events.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::{fs, io};

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use tracing::debug;

use crate::note::{NoteEvent, StopId};

const DEFAULT_MICROS_PER_BEAT: u32 = 500_000;

#[derive(Debug, thiserror::Error)]
pub enum MidiFileError {
    #[error("unable to read MIDI file: {0}")]
    Io(#[from] io::Error),
    #[error("unable to parse MIDI file: {0}")]
    Parse(#[from] midly::Error),
}

/// The notes of a MIDI file, timed in seconds from the start of the file.
#[derive(Clone, Debug)]
pub struct MidiNotes {
    pub notes: Vec<NoteEvent>,
    /// Time of the last event in the file.
    pub length: f64,
}

/// Reads and converts the MIDI file at `path`.
pub fn load(path: &Path) -> Result<MidiNotes, MidiFileError> {
    let bytes = fs::read(path)?;
    parse(&bytes)
}

/// Converts a MIDI file into note events.
///
/// Each note-on becomes one event with a unique stop identity. The matching
/// note-off (or note-on with velocity zero) on the same channel and key sets its
/// duration; notes that are never released have none. Tempo changes on any
/// track apply to all tracks.
pub fn parse(bytes: &[u8]) -> Result<MidiNotes, MidiFileError> {
    let smf = Smf::parse(bytes)?;

    let mut tempo = TempoMap::new(smf.header.timing);
    for track in smf.tracks.iter() {
        let mut tick = 0u64;
        for event in track.iter() {
            tick += u64::from(event.delta.as_int());
            if let TrackEventKind::Meta(MetaMessage::Tempo(micros)) = event.kind {
                tempo.insert(tick, micros.as_int());
            }
        }
    }

    let mut notes: Vec<(u64, NoteEvent)> = Vec::new();
    let mut last_tick = 0u64;
    for track in smf.tracks.iter() {
        let mut tick = 0u64;
        let mut held: HashMap<(u8, u8), VecDeque<usize>> = HashMap::new();
        for event in track.iter() {
            tick += u64::from(event.delta.as_int());
            last_tick = last_tick.max(tick);

            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let (key, velocity) = match message {
                MidiMessage::NoteOn { key, vel } => (key.as_int(), vel.as_int()),
                MidiMessage::NoteOff { key, .. } => (key.as_int(), 0),
                _ => continue,
            };
            let slot = (channel.as_int(), key);

            if velocity > 0 {
                let start = tempo.seconds(tick);
                let stop_id = StopId::from(format!("midi-{}", notes.len()));
                let note = NoteEvent::new(key)
                    .velocity(velocity)
                    .at(start)
                    .stop_id(stop_id);
                held.entry(slot).or_default().push_back(notes.len());
                notes.push((tick, note));
            } else if let Some(index) = held.get_mut(&slot).and_then(VecDeque::pop_front) {
                let (start_tick, note) = &mut notes[index];
                let duration = tempo.seconds(tick) - tempo.seconds(*start_tick);
                if duration > 0.0 {
                    note.duration = Some(duration);
                }
            }
        }
    }

    notes.sort_by_key(|(tick, _)| *tick);
    let length = tempo.seconds(last_tick);
    debug!(notes = notes.len(), length, "Parsed MIDI file");

    Ok(MidiNotes {
        notes: notes.into_iter().map(|(_, note)| note).collect(),
        length,
    })
}

/// Maps ticks to seconds across tempo changes.
#[derive(Debug)]
struct TempoMap {
    timing: Timing,
    /// Sorted by tick.
    changes: Vec<(u64, u32)>,
}

impl TempoMap {
    fn new(timing: Timing) -> TempoMap {
        TempoMap {
            timing,
            changes: Vec::new(),
        }
    }

    fn insert(&mut self, tick: u64, micros_per_beat: u32) {
        let index = self.changes.partition_point(|(at, _)| *at <= tick);
        self.changes.insert(index, (tick, micros_per_beat));
    }

    fn seconds(&self, tick: u64) -> f64 {
        let ticks_per_beat = match self.timing {
            Timing::Metrical(ticks) => f64::from(ticks.as_int().max(1)),
            Timing::Timecode(fps, subframes) => {
                let ticks_per_second = f64::from(fps.as_f32()) * f64::from(subframes.max(1));
                return tick as f64 / ticks_per_second;
            }
        };

        let mut seconds = 0.0;
        let mut from = 0u64;
        let mut micros_per_beat = DEFAULT_MICROS_PER_BEAT;
        for (at, micros) in self.changes.iter().copied() {
            if at >= tick {
                break;
            }
            seconds += segment(at - from, micros_per_beat, ticks_per_beat);
            from = at;
            micros_per_beat = micros;
        }
        seconds + segment(tick - from, micros_per_beat, ticks_per_beat)
    }
}

fn segment(ticks: u64, micros_per_beat: u32, ticks_per_beat: f64) -> f64 {
    ticks as f64 / ticks_per_beat * f64::from(micros_per_beat) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{Format, Header, TrackEvent};

    use super::*;
    use crate::note::NoteId;

    fn event(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::from(delta),
            kind,
        }
    }

    fn note_on(delta: u32, key: u8, vel: u8) -> TrackEvent<'static> {
        event(
            delta,
            TrackEventKind::Midi {
                channel: u4::from(9),
                message: MidiMessage::NoteOn {
                    key: u7::from(key),
                    vel: u7::from(vel),
                },
            },
        )
    }

    fn note_off(delta: u32, key: u8) -> TrackEvent<'static> {
        event(
            delta,
            TrackEventKind::Midi {
                channel: u4::from(9),
                message: MidiMessage::NoteOff {
                    key: u7::from(key),
                    vel: u7::from(0),
                },
            },
        )
    }

    fn tempo(delta: u32, micros: u32) -> TrackEvent<'static> {
        event(delta, TrackEventKind::Meta(MetaMessage::Tempo(u24::from(micros))))
    }

    fn end(delta: u32) -> TrackEvent<'static> {
        event(delta, TrackEventKind::Meta(MetaMessage::EndOfTrack))
    }

    fn write(format: Format, tracks: Vec<Vec<TrackEvent<'static>>>) -> Vec<u8> {
        let smf = Smf {
            header: Header::new(format, Timing::Metrical(u15::from(480))),
            tracks,
        };
        let mut bytes = Vec::new();
        smf.write_std(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_notes_and_durations() {
        // 120 bpm: one beat per half second.
        let bytes = write(
            Format::SingleTrack,
            vec![vec![
                note_on(0, 36, 100),
                note_off(480, 36),
                note_on(0, 38, 90),
                // Velocity zero releases too.
                note_on(240, 38, 0),
                note_on(240, 42, 60),
                end(480),
            ]],
        );

        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.notes.len(), 3);

        let kick = &parsed.notes[0];
        assert_eq!(kick.note, NoteId::Number(36));
        assert_eq!(kick.velocity, Some(100));
        assert_eq!(kick.time, Some(0.0));
        assert_eq!(kick.duration, Some(0.5));

        let snare = &parsed.notes[1];
        assert_eq!(snare.time, Some(0.5));
        assert_eq!(snare.duration, Some(0.25));

        let hat = &parsed.notes[2];
        assert_eq!(hat.time, Some(1.0));
        assert_eq!(hat.duration, None);

        assert_eq!(parsed.length, 1.5);
    }

    #[test]
    fn test_stop_ids_are_unique() {
        let bytes = write(
            Format::SingleTrack,
            vec![vec![
                note_on(0, 60, 100),
                note_on(120, 60, 100),
                note_off(120, 60),
                note_off(120, 60),
                end(0),
            ]],
        );

        let parsed = parse(&bytes).unwrap();
        assert_ne!(parsed.notes[0].stop_id, parsed.notes[1].stop_id);
        // Overlapping notes on one key release first in, first out.
        assert_eq!(parsed.notes[0].duration, Some(0.25));
        assert_eq!(parsed.notes[1].duration, Some(0.25));
    }

    #[test]
    fn test_tempo_map_spans_tracks() {
        let bytes = write(
            Format::Parallel,
            vec![
                // Doubles the tempo after the first beat.
                vec![tempo(0, 500_000), tempo(480, 250_000), end(0)],
                vec![note_on(960, 40, 100), note_off(480, 40), end(0)],
            ],
        );

        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.notes.len(), 1);
        assert_eq!(parsed.notes[0].time, Some(0.75));
        assert_eq!(parsed.notes[0].duration, Some(0.25));
    }

    #[test]
    fn test_invalid_file() {
        assert!(matches!(
            parse(b"not a midi file"),
            Err(MidiFileError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groove.mid");
        fs::write(
            &path,
            write(Format::SingleTrack, vec![vec![note_on(0, 36, 127), end(0)]]),
        )
        .unwrap();

        let parsed = load(&path).unwrap();
        assert_eq!(parsed.notes.len(), 1);
        assert!(matches!(
            load(&dir.path().join("missing.mid")),
            Err(MidiFileError::Io(_))
        ));
    }
}
