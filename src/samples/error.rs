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

use crate::config::ConfigError;

/// Errors raised while constructing the scheduler or the engine around it.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(
        "Invalid scheduler timing: lookahead {lookahead_ms}ms must be at least interval {interval_ms}ms, and interval must be positive"
    )]
    InvalidTiming { lookahead_ms: u128, interval_ms: u128 },

    #[error("Engine config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by storage and decoding while loading samples.
///
/// These never reach the dispatch path: the loader omits any sample that fails.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("Fetching {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to read {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Invalid JSON response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid UTF-8 response: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
