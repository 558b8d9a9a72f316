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
use std::path::Path;
use std::time::Duration;

use crate::config::VelocityCurve;

/// Extracts a displayable file name from a path, returning a fallback if the name is unreadable.
pub fn filename_display(path: &Path) -> &str {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unreadable file name")
}

/// Outputs the given duration in a minutes:seconds format.
pub fn duration_minutes_seconds(duration: Duration) -> String {
    let minutes = duration.as_secs() / 60;
    let secs = duration.as_secs() - minutes * 60;
    format!("{}:{:02}", minutes, secs)
}

/// Converts a dB value to a linear gain.
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Converts a pitch offset in cents to a playback rate.
pub fn cents_to_rate(cents: f32) -> f32 {
    2.0_f32.powf(cents / 1200.0)
}

/// Converts a MIDI velocity to a linear gain.
///
/// Without a curve the mapping is linear (`velocity / 127`). With a curve point
/// `(v, g)` the mapping is piecewise linear through `(0, 0)`, `(v, g)` and `(127, 1)`.
pub fn velocity_to_gain(velocity: u8, curve: Option<VelocityCurve>) -> f32 {
    let velocity = velocity.min(127) as f32;
    match curve {
        None => velocity / 127.0,
        Some(VelocityCurve(point, gain)) => {
            let point = point.min(127) as f32;
            if velocity <= point {
                if point == 0.0 {
                    gain
                } else {
                    velocity / point * gain
                }
            } else {
                gain + (velocity - point) / (127.0 - point) * (1.0 - gain)
            }
        }
    }
}
