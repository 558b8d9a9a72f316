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

//! Compressed and container audio decoding.

use std::io::{self, Cursor};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, warn};

use super::error::LoaderError;
use super::loader::{Decoder, LoadedSample};

/// Decodes any format symphonia supports (WAV, FLAC, Ogg Vorbis, MP3, AAC in
/// MP4) into interleaved f32, transcoding to a target rate if one is set.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaDecoder {
    target_sample_rate: Option<u32>,
}

impl SymphoniaDecoder {
    pub fn new() -> SymphoniaDecoder {
        SymphoniaDecoder::default()
    }

    /// Transcodes every decoded sample to the given rate.
    pub fn with_target_sample_rate(mut self, target_sample_rate: u32) -> SymphoniaDecoder {
        self.target_sample_rate = Some(target_sample_rate.max(1));
        self
    }
}

impl Decoder for SymphoniaDecoder {
    fn decode(&self, url: &str, bytes: &[u8]) -> Result<LoadedSample, LoaderError> {
        let failed = |reason: String| LoaderError::Decode {
            url: url.to_string(),
            reason,
        };

        let stream = MediaSourceStream::new(
            Box::new(Cursor::new(bytes.to_vec())),
            Default::default(),
        );
        let mut hint = Hint::new();
        if let Some(extension) = extension(url) {
            hint.with_extension(extension);
        }

        let opened = get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| failed(e.to_string()))?;
        let mut format = opened.format;

        let track = format
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| failed("no audio track".to_string()))?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate;
        let mut channel_count = track
            .codec_params
            .channels
            .map(|channels| channels.count() as u16);
        let mut decoder = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| failed(e.to_string()))?;

        let mut samples = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    break
                }
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => return Err(failed(e.to_string())),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(err)) => {
                    warn!(url, err, "Skipping corrupt packet");
                    continue;
                }
                Err(e) => return Err(failed(e.to_string())),
            };

            let spec = *decoded.spec();
            sample_rate.get_or_insert(spec.rate);
            channel_count.get_or_insert(spec.channels.count() as u16);

            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buffer.samples());
        }

        let (Some(sample_rate), Some(channel_count)) = (sample_rate, channel_count) else {
            return Err(failed("unknown sample rate or channel layout".to_string()));
        };

        match self.target_sample_rate {
            Some(target) if target != sample_rate => {
                debug!(
                    url,
                    source_rate = sample_rate,
                    target_rate = target,
                    "Transcoding sample"
                );
                Ok(LoadedSample::new(
                    transcode(&samples, channel_count, sample_rate, target),
                    channel_count,
                    target,
                ))
            }
            _ => Ok(LoadedSample::new(samples, channel_count, sample_rate)),
        }
    }
}

/// The file extension of the last path segment of a URL, ignoring any query.
fn extension(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.').map(|(_, extension)| extension)
}

/// Transcodes interleaved samples from one rate to another using linear interpolation.
pub(crate) fn transcode(
    samples: &[f32],
    channel_count: u16,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let channels = usize::from(channel_count.max(1));
    let ratio = f64::from(target_rate) / f64::from(source_rate.max(1));
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames * channels);
    for target_frame in 0..target_frames {
        let position = target_frame as f64 / ratio;
        let frame = position.floor() as usize;
        let frac = position.fract() as f32;

        for channel in 0..channels {
            let s0 = samples
                .get(frame * channels + channel)
                .copied()
                .unwrap_or(0.0);
            let s1 = samples
                .get((frame + 1) * channels + channel)
                .copied()
                .unwrap_or(s0);
            output.push(s0 + (s1 - s0) * frac);
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::InstrumentDescriptor;
    use crate::samples::loader::{CachedLoader, MemoryStorage, SampleLoader};
    use crate::testutil::wav_bytes;

    #[test]
    fn test_decodes_wav() {
        let bytes = wav_bytes(&[0.5, -0.5, 0.25, -0.25, 0.0, 1.0], 2, 22050).unwrap();
        let sample = SymphoniaDecoder::new().decode("kit/kick.wav", &bytes).unwrap();

        assert_eq!(sample.channel_count(), 2);
        assert_eq!(sample.sample_rate(), 22050);
        assert_eq!(sample.frames(), 3);
        assert_eq!(sample.data(), &[0.5, -0.5, 0.25, -0.25, 0.0, 1.0]);
    }

    #[test]
    fn test_decodes_without_extension_hint() {
        let bytes = wav_bytes(&[0.1, 0.2, 0.3], 1, 8000).unwrap();
        let sample = SymphoniaDecoder::new().decode("kit/kick?v=2", &bytes).unwrap();
        assert_eq!(sample.frames(), 3);
    }

    #[test]
    fn test_decode_transcodes_to_target_rate() {
        let stereo = [1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let bytes = wav_bytes(&stereo, 2, 44100).unwrap();
        let sample = SymphoniaDecoder::new()
            .with_target_sample_rate(48000)
            .decode("stereo.wav", &bytes)
            .unwrap();

        assert_eq!(sample.sample_rate(), 48000);
        assert_eq!(sample.channel_count(), 2);
        assert!(sample.frames() >= 4);
        assert!((sample.data()[0] - 1.0).abs() < 0.1);
        assert!((sample.data()[1] + 1.0).abs() < 0.1);
    }

    #[test]
    fn test_undecodable_bytes() {
        assert!(matches!(
            SymphoniaDecoder::new().decode("kit/snare.ogg", &[1, 2, 3, 4]),
            Err(LoaderError::Decode { .. })
        ));
    }

    #[test]
    fn test_cached_loader_decodes_fetched_wav() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("kit/kick.wav", wav_bytes(&[0.5; 100], 1, 44100).unwrap());
        storage.insert("kit/snare.ogg", vec![0; 16]);

        let descriptor = InstrumentDescriptor::from_json(
            r#"{ "samples": { "baseUrl": "kit/", "formats": ["ogg", "wav"] }, "groups": [{ "regions": [
                { "sample": "kick" }, { "sample": "snare" }
            ] }] }"#,
        )
        .unwrap();
        let loader = CachedLoader::new(storage, SymphoniaDecoder::new());
        let loaded = loader.load(&descriptor, &|_, _| {});

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["kick"].frames(), 100);
        assert_eq!(loaded["kick"].sample_rate(), 44100);
    }

    #[test]
    fn test_transcode() {
        assert_eq!(transcode(&[0.0, 1.0], 1, 100, 200), vec![0.0, 0.5, 1.0, 1.0]);
        assert_eq!(transcode(&[0.0, 1.0, 0.0, 1.0], 1, 200, 100), vec![0.0, 0.0]);
        assert!(transcode(&[], 2, 44100, 48000).is_empty());
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("https://cdn/piano/C4.ogg"), Some("ogg"));
        assert_eq!(extension("kit/kick.m4a?token=a.b"), Some("m4a"));
        assert_eq!(extension("v1.2/kick"), None);
    }
}
