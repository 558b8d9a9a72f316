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

//! Sample loading and caching.
//!
//! Samples are decoded entirely into memory before they can be played. Loading
//! tolerates partial failure: a sample that can't be fetched or decoded is left
//! out of the result and the engine treats it as absent.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::error::LoaderError;
use crate::config::{InstrumentDescriptor, SamplesLocation};

/// A decoded sample that can be played back.
/// The sample data is stored in an Arc for efficient sharing between voices.
#[derive(Clone, PartialEq)]
pub struct LoadedSample {
    /// The sample data as f32 samples (interleaved if multi-channel).
    data: Arc<Vec<f32>>,
    channel_count: u16,
    sample_rate: u32,
}

impl LoadedSample {
    pub fn new(data: Vec<f32>, channel_count: u16, sample_rate: u32) -> LoadedSample {
        LoadedSample {
            data: Arc::new(data),
            channel_count: channel_count.max(1),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Creates a buffer of silence lasting `duration` seconds.
    pub fn silent(duration: f64, channel_count: u16, sample_rate: u32) -> LoadedSample {
        let frames = (duration.max(0.0) * f64::from(sample_rate)).round() as usize;
        LoadedSample::new(
            vec![0.0; frames * usize::from(channel_count.max(1))],
            channel_count,
            sample_rate,
        )
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.data.len() / usize::from(self.channel_count)
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

impl fmt::Debug for LoadedSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedSample")
            .field("channels", &self.channel_count)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .finish()
    }
}

/// Produces decoded buffers for every sample an instrument references.
pub trait SampleLoader: Send + Sync {
    /// Loads every unique sample key of the descriptor. Keys that fail are omitted.
    /// `progress` receives `(processed, total)` once per unique key.
    fn load(
        &self,
        descriptor: &InstrumentDescriptor,
        progress: &dyn Fn(usize, usize),
    ) -> HashMap<String, LoadedSample>;
}

/// A fetched resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    status: u16,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: Vec<u8>) -> Response {
        Response { status, body }
    }

    pub fn not_found() -> Response {
        Response::new(404, Vec::new())
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether the status is in the 2xx range.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The raw body.
    pub fn array_buffer(&self) -> &[u8] {
        &self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, LoaderError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> Result<String, LoaderError> {
        Ok(String::from_utf8(self.body.clone())?)
    }
}

/// Where sample and descriptor bytes come from.
pub trait Storage: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Response, LoaderError>;
}

/// Storage backed by an in-memory map. Unknown URLs answer 404.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    fetches: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage::default()
    }

    pub fn insert(&self, url: &str, body: Vec<u8>) {
        self.entries.lock().insert(url.to_string(), body);
    }

    /// How many fetches have been made.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl Storage for MemoryStorage {
    fn fetch(&self, url: &str) -> Result<Response, LoaderError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(match self.entries.lock().get(url) {
            Some(body) => Response::new(200, body.clone()),
            None => Response::not_found(),
        })
    }
}

/// Storage that resolves URLs as paths under a root directory. Missing files answer 404.
#[derive(Clone, Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> FileStorage {
        FileStorage { root: root.into() }
    }
}

impl Storage for FileStorage {
    fn fetch(&self, url: &str) -> Result<Response, LoaderError> {
        let path = self.root.join(url.trim_start_matches('/'));
        match fs::read(&path) {
            Ok(body) => Ok(Response::new(200, body)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Response::not_found()),
            Err(source) => Err(LoaderError::Io {
                url: url.to_string(),
                source,
            }),
        }
    }
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn fetch(&self, url: &str) -> Result<Response, LoaderError> {
        (**self).fetch(url)
    }
}

/// Turns fetched bytes into a playable buffer.
pub trait Decoder: Send + Sync {
    fn decode(&self, url: &str, bytes: &[u8]) -> Result<LoadedSample, LoaderError>;
}

/// Every URL to try for a sample key, in preference order.
///
/// The key goes through the descriptor's remapping and is appended to the base
/// URL. Paths that already carry an extension are tried as-is; otherwise each
/// preferred format is appended in turn.
pub fn candidate_urls(location: &SamplesLocation, sample: &str) -> Vec<String> {
    let path = location.path_for(sample);
    let url = format!("{}{}", location.base_url(), path);
    let file_name = path.rsplit('/').next().unwrap_or_default();
    let has_extension = file_name.rfind('.').is_some_and(|index| index > 0);

    if has_extension || location.formats().is_empty() {
        vec![url]
    } else {
        location
            .formats()
            .iter()
            .map(|format| format!("{}.{}", url, format))
            .collect()
    }
}

/// Loads samples from storage, caching decoded buffers by resolved URL.
pub struct CachedLoader<S, D> {
    storage: S,
    decoder: D,
    cache: Mutex<HashMap<String, LoadedSample>>,
}

impl<S: Storage, D: Decoder> CachedLoader<S, D> {
    pub fn new(storage: S, decoder: D) -> CachedLoader<S, D> {
        CachedLoader {
            storage,
            decoder,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Loads one sample key, trying each candidate URL until one decodes.
    pub fn load_sample(&self, location: &SamplesLocation, sample: &str) -> Option<LoadedSample> {
        for url in candidate_urls(location, sample) {
            if let Some(cached) = self.cache.lock().get(&url) {
                debug!(url, "Using cached sample");
                return Some(cached.clone());
            }

            match self.fetch(&url) {
                Ok(loaded) => {
                    info!(
                        url,
                        channels = loaded.channel_count(),
                        sample_rate = loaded.sample_rate(),
                        duration_ms = (loaded.duration() * 1000.0) as u64,
                        memory_kb = loaded.memory_size() / 1024,
                        "Sample loaded"
                    );
                    self.cache.lock().insert(url, loaded.clone());
                    return Some(loaded);
                }
                Err(e) => debug!(url, err = %e, "Sample candidate failed"),
            }
        }

        warn!(sample, "Failed to load sample");
        None
    }

    fn fetch(&self, url: &str) -> Result<LoadedSample, LoaderError> {
        let response = self.storage.fetch(url)?;
        if !response.is_ok() {
            return Err(LoaderError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        self.decoder.decode(url, response.array_buffer())
    }

    /// Number of cached buffers.
    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    /// Returns the total memory used by cached samples.
    pub fn total_memory_usage(&self) -> usize {
        self.cache.lock().values().map(|s| s.memory_size()).sum()
    }
}

impl<S: Storage, D: Decoder> SampleLoader for CachedLoader<S, D> {
    fn load(
        &self,
        descriptor: &InstrumentDescriptor,
        progress: &dyn Fn(usize, usize),
    ) -> HashMap<String, LoadedSample> {
        let keys = descriptor.sample_keys();
        let total = keys.len();
        let mut loaded = HashMap::new();

        for (index, key) in keys.into_iter().enumerate() {
            if let Some(sample) = self.load_sample(descriptor.samples(), key) {
                loaded.insert(key.to_string(), sample);
            }
            progress(index + 1, total);
        }

        info!(loaded = loaded.len(), total, "Instrument samples loaded");
        loaded
    }
}

impl<S, D> fmt::Debug for CachedLoader<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cache = self.cache.lock();
        f.debug_struct("CachedLoader")
            .field("cached_samples", &cache.len())
            .field(
                "total_memory_kb",
                &(cache.values().map(|s| s.memory_size()).sum::<usize>() / 1024),
            )
            .finish()
    }
}

/// A loader that produces silence of a fixed length for every sample key.
#[derive(Clone, Copy, Debug)]
pub struct SilentLoader {
    duration: f64,
    sample_rate: u32,
}

impl SilentLoader {
    pub fn new(duration: f64, sample_rate: u32) -> SilentLoader {
        SilentLoader {
            duration,
            sample_rate,
        }
    }
}

impl SampleLoader for SilentLoader {
    fn load(
        &self,
        descriptor: &InstrumentDescriptor,
        progress: &dyn Fn(usize, usize),
    ) -> HashMap<String, LoadedSample> {
        let keys = descriptor.sample_keys();
        let total = keys.len();
        keys.into_iter()
            .enumerate()
            .map(|(index, key)| {
                progress(index + 1, total);
                (
                    key.to_string(),
                    LoadedSample::silent(self.duration, 1, self.sample_rate),
                )
            })
            .collect()
    }
}

/// Fetches and parses an instrument descriptor.
pub fn load_descriptor(storage: &dyn Storage, url: &str) -> Result<InstrumentDescriptor, LoaderError> {
    let response = storage.fetch(url)?;
    if !response.is_ok() {
        return Err(LoaderError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }
    response.json()
}
