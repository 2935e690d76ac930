//! Decoding of audio sources into [`AudioArc`] and the shared decoded-buffer
//! cache.

mod cache;
mod fetch;

use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use daw_transport::AudioArc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

pub use cache::{BufferCache, Lookup};
pub use fetch::{FileFetcher, SourceFetcher, extension_of};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("audio source not found: {0}")]
    NotFound(String),
    #[error("failed to read {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("could not decode audio: {0}")]
    Format(String),
    #[error("resampling failed: {0}")]
    Resample(String),
}

impl From<symphonia::core::errors::Error> for DecodeError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        DecodeError::Format(err.to_string())
    }
}

/// Decode an in-memory file. `extension` helps the format probe.
pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<AudioArc, DecodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| DecodeError::Format("no default track".into()))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::Format("unknown sample rate".into()))?;
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2) as u16;
    let track_id = track.id;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(symphonia::core::errors::Error::DecodeError(msg)) => {
                log::debug!("skipping corrupt packet: {msg}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;

        let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if channels == 0 || samples.len() % channels as usize != 0 {
        return Err(DecodeError::Format(format!(
            "{} samples do not fill {channels} channels",
            samples.len()
        )));
    }
    Ok(AudioArc::new(samples, sample_rate, channels))
}

/// Decode and bring to `sample_rate`.
pub fn decode_at_rate(
    bytes: Vec<u8>,
    extension: Option<&str>,
    sample_rate: u32,
) -> Result<AudioArc, DecodeError> {
    let audio = decode_bytes(bytes, extension)?;
    audio
        .resample(sample_rate)
        .map_err(|e| DecodeError::Resample(e.to_string()))
}

pub fn decode_file(path: &Path) -> anyhow::Result<AudioArc> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let extension = path.extension().and_then(|e| e.to_str());
    decode_bytes(bytes, extension).with_context(|| format!("decoding {}", path.display()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    /// Write a 16-bit WAV of a ramp, `frames` long.
    pub fn write_wav(path: &Path, frames: usize, channels: u16, sample_rate: u32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for _ in 0..channels {
                writer
                    .write_sample(((i % 100) as i16 - 50) * 200)
                    .unwrap();
            }
        }
        writer.finalize().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::write_wav;

    #[test]
    fn test_decode_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        write_wav(&path, 4410, 2, 44100);

        let audio = decode_file(&path).unwrap();
        assert_eq!(audio.channels(), 2);
        assert_eq!(audio.sample_rate(), 44100);
        assert_eq!(audio.frames(), 4410);
        assert!((audio.sample(0, 0) - (-50.0 * 200.0 / 32768.0)).abs() < 1e-4);
    }

    #[test]
    fn test_decode_at_rate_resamples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 22050, 1, 22050);

        let bytes = std::fs::read(&path).unwrap();
        let audio = decode_at_rate(bytes, Some("wav"), 44100).unwrap();
        assert_eq!(audio.sample_rate(), 44100);
        assert!((audio.duration_secs() - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_garbage_is_a_format_error() {
        let result = decode_bytes(b"definitely not audio".to_vec(), None);
        assert!(matches!(result, Err(DecodeError::Format(_))));
    }
}
