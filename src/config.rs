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
use std::fs;
use std::path::Path;

use tracing::info;

pub mod engine;
pub mod error;
pub mod instrument;
pub mod params;

pub use engine::{EngineConfig, DEFAULT_VELOCITY};
pub use error::ConfigError;
pub use instrument::{
    Group, InstrumentDescriptor, InstrumentMeta, LoopAuto, Region, SamplesLocation, VelocityCurve,
};
pub use params::PlaybackParams;

/// Loads an instrument descriptor from a JSON or YAML file, chosen by extension.
pub fn load_instrument(path: &Path) -> Result<InstrumentDescriptor, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let descriptor = match extension.as_str() {
        "json" => InstrumentDescriptor::from_json(&contents)?,
        "yaml" | "yml" => InstrumentDescriptor::from_yaml(&contents)?,
        other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
    };

    info!(
        path = ?path,
        groups = descriptor.groups().len(),
        regions = descriptor.region_count(),
        "Instrument descriptor loaded"
    );

    Ok(descriptor)
}
