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

//! Sample-based instrument playback.
//!
//! This module provides:
//! - Sample loading and caching (in-memory for zero-latency playback)
//! - Note to region matching with round robin and controller filters
//! - Parameter resolution across the instrument, group and region levels
//! - Voice management with exclusive group preemption
//! - A lookahead scheduler that dispatches notes shortly before they are due

pub mod decoder;
pub mod engine;
pub mod error;
pub mod loader;
pub mod matcher;
pub mod params;
pub mod scheduler;
pub mod timer;
pub mod voice;

pub use decoder::SymphoniaDecoder;
pub use engine::SamplerEngine;
pub use error::{LoaderError, SchedulerError};
pub use loader::{
    candidate_urls, load_descriptor, CachedLoader, Decoder, FileStorage, LoadedSample,
    MemoryStorage, Response, SampleLoader, SilentLoader, Storage,
};
pub use matcher::{MatchedRegion, RegionMatcher};
pub use params::{resolve, NoteOverrides, VoiceParams};
pub use scheduler::{Scheduled, Scheduler, SchedulerConfig};
pub use timer::{ManualTimer, Task, Tick, ThreadTimer, Timer};
pub use voice::{Voice, VoiceManager, VoiceState};
