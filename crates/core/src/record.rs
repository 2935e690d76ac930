use std::sync::Arc;

use daw_engine::{InputConstraints, InputDriver, InputStream};
use daw_transport::AudioArc;

use crate::EngineError;

/// Capture from the input device. Audio accumulates while recording and is
/// handed back as one buffer when it stops.
pub struct Recorder {
    driver: Arc<dyn InputDriver>,
    constraints: InputConstraints,
    stream: Option<Box<dyn InputStream>>,
    captured: Vec<f32>,
}

impl Recorder {
    pub fn new(driver: Arc<dyn InputDriver>, sample_rate: u32, channels: u16) -> Self {
        Self {
            driver,
            constraints: InputConstraints {
                sample_rate,
                channels: channels.max(1),
                ..InputConstraints::default()
            },
            stream: None,
            captured: Vec::new(),
        }
    }

    pub fn constraints(&self) -> &InputConstraints {
        &self.constraints
    }

    pub fn is_recording(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the input. Fails with `PermissionDenied` when the device cannot
    /// be opened for any reason, since that is what the user can act on.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.driver.open(&self.constraints).map_err(|err| {
            log::warn!("input unavailable: {err}");
            EngineError::PermissionDenied
        })?;
        log::info!(
            "recording at {} Hz, {} channel(s)",
            stream.sample_rate(),
            stream.channels()
        );
        self.captured.clear();
        self.stream = Some(stream);
        Ok(())
    }

    /// Move captured samples out of the device ring. Call regularly while
    /// recording so the ring does not overflow.
    pub fn poll(&mut self) -> usize {
        match &mut self.stream {
            Some(stream) => stream.read(&mut self.captured),
            None => 0,
        }
    }

    /// Close the input and return what was captured. `None` when nothing was
    /// recorded.
    pub fn finish(&mut self) -> Option<AudioArc> {
        let mut stream = self.stream.take()?;
        stream.read(&mut self.captured);
        stream.close();

        let channels = stream.channels().max(1);
        let mut samples = std::mem::take(&mut self.captured);
        samples.truncate(samples.len() - samples.len() % channels as usize);
        if samples.is_empty() {
            log::warn!("recording captured no audio");
            return None;
        }
        Some(AudioArc::new(samples, stream.sample_rate(), channels))
    }

    /// Drop the capture without keeping it.
    pub fn cancel(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        self.captured.clear();
    }
}
