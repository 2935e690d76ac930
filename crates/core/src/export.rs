//! Live mixdown: the master output is tapped while the project plays and
//! streamed into a WAV file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use basedrop::{Owned, Shared};
use daw_engine::{AudioContext, Command, Tap};
use daw_render::WavSink;

use crate::EngineError;

/// The master bus is always stereo.
const CHANNELS: u16 = 2;
/// Seconds of audio the tap ring can hold between pumps.
const RING_SECS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum ExportStatus {
    /// Percent done, held at 99 until the file is finalized.
    Running(u8),
    Finished(PathBuf),
    Cancelled,
    Failed(String),
}

impl ExportStatus {
    pub fn is_done(&self) -> bool {
        !matches!(self, ExportStatus::Running(_))
    }
}

pub struct MixdownExport {
    tap: rtrb::Consumer<f32>,
    /// Samples the render thread could not fit into the tap ring.
    overflow: Shared<AtomicU64>,
    sink: Option<WavSink>,
    path: PathBuf,
    total_frames: u64,
    scratch: Vec<f32>,
    status: ExportStatus,
}

impl MixdownExport {
    /// Arm the master tap and open `path`. The caller starts playback from
    /// zero right after, so the capture lines up with the timeline.
    pub fn start(ctx: &AudioContext, path: &Path, duration: f64) -> Result<Self, EngineError> {
        let sample_rate = ctx.sample_rate();
        let sink = WavSink::create(path, sample_rate, CHANNELS)?;
        let capacity = sample_rate as usize * CHANNELS as usize * RING_SECS;
        let (producer, consumer) = rtrb::RingBuffer::new(capacity);
        let overflow = Shared::new(ctx.handle(), AtomicU64::new(0));
        let tap = Tap::new(producer, overflow.clone());
        ctx.send(Command::ArmTap(Owned::new(ctx.handle(), tap)))?;

        let total_frames = (duration.max(0.0) * sample_rate as f64).ceil() as u64;
        log::info!("exporting {duration:.2}s to {}", path.display());
        Ok(Self {
            tap: consumer,
            overflow,
            sink: Some(sink),
            path: path.to_path_buf(),
            total_frames,
            scratch: Vec::new(),
            status: ExportStatus::Running(0),
        })
    }

    pub fn status(&self) -> &ExportStatus {
        &self.status
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Move captured audio into the file and finish once the full duration
    /// is written.
    pub fn pump(&mut self, ctx: &AudioContext) -> &ExportStatus {
        if self.status.is_done() {
            return &self.status;
        }
        if let Err(err) = self.drain() {
            log::warn!("export failed: {err:#}");
            self.abort(ctx);
            self.status = ExportStatus::Failed(err.to_string());
            return &self.status;
        }
        let lost = self.overflow.load(Ordering::Relaxed);
        if lost > 0 {
            log::warn!("export fell behind the render thread, {lost} samples lost");
            self.abort(ctx);
            self.status = ExportStatus::Failed(format!("{lost} samples dropped from the mixdown"));
            return &self.status;
        }

        let written = self.sink.as_ref().map_or(0, WavSink::frames);
        if written < self.total_frames {
            let percent = written.saturating_mul(100) / self.total_frames.max(1);
            self.status = ExportStatus::Running(percent.min(99) as u8);
            return &self.status;
        }

        disarm(ctx);
        self.status = match self.sink.take().map(WavSink::finalize) {
            Some(Ok(path)) => ExportStatus::Finished(path),
            Some(Err(err)) => ExportStatus::Failed(err.to_string()),
            None => ExportStatus::Failed("export sink already closed".to_string()),
        };
        &self.status
    }

    fn drain(&mut self) -> anyhow::Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        self.scratch.clear();
        while let Ok(sample) = self.tap.pop() {
            self.scratch.push(sample);
        }
        let remaining =
            self.total_frames.saturating_sub(sink.frames()) as usize * CHANNELS as usize;
        let take = self.scratch.len().min(remaining);
        sink.write(&self.scratch[..take])
    }

    fn abort(&mut self, ctx: &AudioContext) {
        disarm(ctx);
        self.sink = None;
        if let Err(err) = std::fs::remove_file(&self.path) {
            log::debug!("removing partial export {}: {err}", self.path.display());
        }
    }

    /// Stop capturing and delete the partial file.
    pub fn cancel(&mut self, ctx: &AudioContext) {
        if self.status.is_done() {
            return;
        }
        self.abort(ctx);
        self.status = ExportStatus::Cancelled;
        log::info!("export cancelled");
    }
}

fn disarm(ctx: &AudioContext) {
    if let Err(err) = ctx.send(Command::DisarmTap) {
        log::debug!("disarming export tap: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daw_engine::{BufferSource, OfflineDriver, Route};
    use daw_transport::AudioArc;

    #[test]
    fn test_export_writes_full_duration() {
        let (driver, render) = OfflineDriver::new(1000);
        let ctx = AudioContext::open(&driver).unwrap();
        ctx.resume().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mix.wav");

        let mut export = MixdownExport::start(&ctx, &path, 1.5).unwrap();
        let audio = AudioArc::mono(vec![0.5; 1000], 1000);
        let source = BufferSource::new(audio, 0.0, 0.0, 1.0, 1000);
        ctx.play(Route::Master, Box::new(source)).unwrap();

        render.render(500);
        assert_eq!(export.pump(&ctx), &ExportStatus::Running(33));
        render.render(1200);
        let status = export.pump(&ctx).clone();
        assert_eq!(status, ExportStatus::Finished(path.clone()));

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.duration(), 1500);
    }

    #[test]
    fn test_progress_never_reports_done_early() {
        let (driver, render) = OfflineDriver::new(1000);
        let ctx = AudioContext::open(&driver).unwrap();
        ctx.resume().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut export = MixdownExport::start(&ctx, &dir.path().join("a.wav"), 1.0).unwrap();
        render.render(999);
        assert_eq!(export.pump(&ctx), &ExportStatus::Running(99));
    }

    #[test]
    fn test_cancel_removes_partial_file() {
        let (driver, render) = OfflineDriver::new(1000);
        let ctx = AudioContext::open(&driver).unwrap();
        ctx.resume().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.wav");
        let mut export = MixdownExport::start(&ctx, &path, 2.0).unwrap();
        render.render(300);
        export.pump(&ctx);
        export.cancel(&ctx);
        assert_eq!(export.status(), &ExportStatus::Cancelled);
        assert!(!path.exists());
        assert_eq!(export.pump(&ctx), &ExportStatus::Cancelled);
    }

    #[test]
    fn test_export_fails_when_tap_overflows() {
        let (driver, render) = OfflineDriver::new(1000);
        let ctx = AudioContext::open(&driver).unwrap();
        ctx.resume().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gap.wav");
        let mut export = MixdownExport::start(&ctx, &path, 5.0).unwrap();

        // longer than the ring holds, with no pump in between
        render.render(2500);
        assert!(matches!(export.pump(&ctx), ExportStatus::Failed(_)));
        assert!(!path.exists());
    }
}
