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

use config::{Config, File};
use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;

const DEFAULT_LOOKAHEAD: Duration = Duration::from_millis(200);
const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_VOLUME: f32 = 100.0;

/// Default velocity for notes that don't specify one.
pub const DEFAULT_VELOCITY: u8 = 100;

/// The configuration for the sampler engine.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct EngineConfig {
    /// How far ahead of the clock an event may be and still dispatch immediately.
    lookahead: Option<String>,

    /// How often the scheduler polls its queue.
    interval: Option<String>,

    /// Output channel volume (0-127).
    volume: Option<f32>,

    /// Velocity used when a note doesn't specify one.
    velocity: Option<u8>,
}

impl EngineConfig {
    /// Creates a new engine configuration.
    pub fn new(lookahead: Option<String>, interval: Option<String>) -> EngineConfig {
        EngineConfig {
            lookahead,
            interval,
            volume: None,
            velocity: None,
        }
    }

    /// Loads an engine configuration from a file in any format the config crate understands.
    pub fn deserialize(path: &Path) -> Result<EngineConfig, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<EngineConfig>()?)
    }

    /// Returns the scheduler lookahead window (default: 200ms).
    pub fn lookahead(&self) -> Result<Duration, ConfigError> {
        parse_duration(self.lookahead.as_deref(), DEFAULT_LOOKAHEAD)
    }

    /// Returns the scheduler poll interval (default: 50ms).
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(self.interval.as_deref(), DEFAULT_INTERVAL)
    }

    /// Returns the output volume (default: 100).
    pub fn volume(&self) -> f32 {
        self.volume.unwrap_or(DEFAULT_VOLUME)
    }

    /// Returns the default note velocity (default: 100).
    pub fn velocity(&self) -> u8 {
        self.velocity.unwrap_or(DEFAULT_VELOCITY).min(127)
    }
}

fn parse_duration(value: Option<&str>, default: Duration) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => DurationString::from_string(value.to_string())
            .map(Duration::from)
            .map_err(|e| ConfigError::Duration {
                value: value.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(default),
    }
}
