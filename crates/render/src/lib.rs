use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use daw_transport::{AudioArc, Clip};

/// Exports never run shorter than this.
pub const MIN_EXPORT_SECS: f64 = 5.0;

/// Length of the mixdown for `clips`: the latest clip end, at least
/// [`MIN_EXPORT_SECS`].
pub fn project_duration<'a>(clips: impl IntoIterator<Item = &'a Clip>) -> f64 {
    clips
        .into_iter()
        .map(Clip::end)
        .filter(|end| end.is_finite())
        .fold(MIN_EXPORT_SECS, f64::max)
}

/// Streaming 32-bit float WAV writer. Frames are appended as they are
/// captured; the header is patched on [`WavSink::finalize`].
pub struct WavSink {
    writer: hound::WavWriter<BufWriter<File>>,
    path: PathBuf,
    channels: u16,
    frames: u64,
}

impl WavSink {
    pub fn create(path: &Path, sample_rate: u32, channels: u16) -> anyhow::Result<Self> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let writer = hound::WavWriter::create(path, spec)?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            channels,
            frames: 0,
        })
    }

    /// Append interleaved samples. A trailing partial frame is dropped.
    pub fn write(&mut self, interleaved: &[f32]) -> anyhow::Result<()> {
        let channels = self.channels.max(1) as usize;
        let whole = interleaved.len() / channels * channels;
        for &sample in &interleaved[..whole] {
            self.writer.write_sample(sample)?;
        }
        self.frames += (whole / channels) as u64;
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn finalize(self) -> anyhow::Result<PathBuf> {
        self.writer.finalize()?;
        log::info!("wrote {} frames to {}", self.frames, self.path.display());
        Ok(self.path)
    }
}

pub fn write_wav(buffer: &AudioArc, path: &Path) -> anyhow::Result<()> {
    let mut sink = WavSink::create(path, buffer.sample_rate(), buffer.channels())?;
    sink.write(buffer.samples())?;
    sink.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use daw_transport::{ClipId, ClipSource, TrackId};

    fn clip(start: f64, duration: f64) -> Clip {
        Clip {
            id: ClipId(1),
            track: TrackId(1),
            start,
            duration,
            source: ClipSource::Generated(AudioArc::mono(vec![0.0; 4], 4)),
            name: "c".into(),
        }
    }

    #[test]
    fn test_project_duration_has_a_floor() {
        assert_eq!(project_duration(&[]), MIN_EXPORT_SECS);
        assert_eq!(project_duration(&[clip(0.0, 2.0)]), MIN_EXPORT_SECS);
        assert_eq!(project_duration(&[clip(1.0, 2.0), clip(6.0, 1.5)]), 7.5);
    }

    #[test]
    fn test_sink_writes_readable_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mix.wav");

        let mut sink = WavSink::create(&path, 8000, 2).unwrap();
        sink.write(&[0.1, -0.1, 0.2, -0.2]).unwrap();
        sink.write(&[0.3, -0.3, 0.9]).unwrap();
        assert_eq!(sink.frames(), 3);
        sink.finalize().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 8000);
        let samples: Vec<f32> = reader.samples::<f32>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![0.1, -0.1, 0.2, -0.2, 0.3, -0.3]);
    }

    #[test]
    fn test_write_wav_from_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        write_wav(&AudioArc::mono(vec![0.5; 100], 44100), &path).unwrap();
        assert_eq!(hound::WavReader::open(&path).unwrap().duration(), 100);
    }
}
