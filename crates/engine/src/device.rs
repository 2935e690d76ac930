//! Output devices the render graph can run on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use crossbeam_channel::{Sender, bounded, unbounded};

use crate::graph::{MAX_BLOCK, Renderer};
use crate::lock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("no audio device available")]
    NoDevice,
    #[error("unsupported sample format '{0}'")]
    UnsupportedFormat(String),
    #[error("audio backend error: {0}")]
    Backend(String),
    #[error("permission to use the input device was denied")]
    PermissionDenied,
    #[error("audio context is closed")]
    Closed,
    #[error("render queue is full")]
    QueueFull,
    #[error("device thread stopped")]
    Disconnected,
}

impl DeviceError {
    fn backend(err: impl std::fmt::Display) -> Self {
        DeviceError::Backend(err.to_string())
    }
}

/// Opens output devices. The driver decides the sample rate; the caller
/// builds a [`Renderer`] at that rate and hands it over.
pub trait Driver: Send + Sync {
    fn sample_rate(&self) -> Result<u32, DeviceError>;

    /// Start a device driving `renderer`. Devices start suspended.
    fn open(&self, renderer: Renderer) -> Result<Box<dyn OutputDevice>, DeviceError>;
}

pub trait OutputDevice: Send {
    fn resume(&mut self) -> Result<(), DeviceError>;
    fn suspend(&mut self) -> Result<(), DeviceError>;
    fn close(&mut self);
}

/// The system's default output through cpal.
#[derive(Debug, Default, Clone)]
pub struct CpalDriver;

enum StreamRequest {
    Play(Sender<Result<(), DeviceError>>),
    Pause(Sender<Result<(), DeviceError>>),
}

impl Driver for CpalDriver {
    fn sample_rate(&self) -> Result<u32, DeviceError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(DeviceError::NoDevice)?;
        let config = device
            .default_output_config()
            .map_err(DeviceError::backend)?;
        Ok(config.sample_rate().0)
    }

    fn open(&self, renderer: Renderer) -> Result<Box<dyn OutputDevice>, DeviceError> {
        let (requests, request_rx) = unbounded::<StreamRequest>();
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);

        // cpal streams are not Send on every host, so one thread owns the
        // stream for its whole life and takes play/pause requests.
        let thread = std::thread::Builder::new()
            .name("daw-output".into())
            .spawn(move || {
                let stream = match start(renderer) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                for request in request_rx {
                    match request {
                        StreamRequest::Play(reply) => {
                            let _ = reply.send(stream.play().map_err(DeviceError::backend));
                        }
                        StreamRequest::Pause(reply) => {
                            let _ = reply.send(stream.pause().map_err(DeviceError::backend));
                        }
                    }
                }
            })
            .map_err(DeviceError::backend)?;

        ready_rx.recv().map_err(|_| DeviceError::Disconnected)??;
        Ok(Box::new(CpalDevice {
            requests: Some(requests),
            thread: Some(thread),
        }))
    }
}

struct CpalDevice {
    requests: Option<Sender<StreamRequest>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalDevice {
    fn request(
        &self,
        make: impl FnOnce(Sender<Result<(), DeviceError>>) -> StreamRequest,
    ) -> Result<(), DeviceError> {
        let requests = self.requests.as_ref().ok_or(DeviceError::Closed)?;
        let (reply, reply_rx) = bounded(1);
        requests
            .send(make(reply))
            .map_err(|_| DeviceError::Disconnected)?;
        reply_rx.recv().map_err(|_| DeviceError::Disconnected)?
    }
}

impl OutputDevice for CpalDevice {
    fn resume(&mut self) -> Result<(), DeviceError> {
        self.request(StreamRequest::Play)
    }

    fn suspend(&mut self) -> Result<(), DeviceError> {
        self.request(StreamRequest::Pause)
    }

    fn close(&mut self) {
        self.requests = None;
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::warn!("output thread panicked");
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}

fn start(renderer: Renderer) -> Result<cpal::Stream, DeviceError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(DeviceError::NoDevice)?;
    let config = device
        .default_output_config()
        .map_err(DeviceError::backend)?;

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config.into(), renderer)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config.into(), renderer)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config.into(), renderer)?,
        sample_format => {
            return Err(DeviceError::UnsupportedFormat(sample_format.to_string()));
        }
    };
    stream.pause().map_err(DeviceError::backend)?;
    log::info!(
        "output stream opened on {}",
        device.name().unwrap_or_else(|_| "unknown device".into())
    );
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch = vec![0.0f32; MAX_BLOCK * channels];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for chunk in data.chunks_mut(scratch.len()) {
                    let rendered = &mut scratch[..chunk.len()];
                    renderer.process(rendered, channels);
                    for (dst, src) in chunk.iter_mut().zip(rendered.iter()) {
                        *dst = T::from_sample(*src);
                    }
                }
            },
            |err| log::error!("output stream error: {err}"),
            None,
        )
        .map_err(DeviceError::backend)
}

struct OfflineSlot {
    renderer: Option<Renderer>,
    running: bool,
}

/// A device with no hardware behind it: frames are rendered on demand via
/// [`OfflineRenderHandle`]. Time only advances while the device is resumed.
pub struct OfflineDriver {
    sample_rate: u32,
    available: bool,
    slot: Arc<Mutex<OfflineSlot>>,
}

impl OfflineDriver {
    pub fn new(sample_rate: u32) -> (Self, OfflineRenderHandle) {
        let slot = Arc::new(Mutex::new(OfflineSlot {
            renderer: None,
            running: false,
        }));
        (
            Self {
                sample_rate,
                available: true,
                slot: slot.clone(),
            },
            OfflineRenderHandle { slot },
        )
    }

    /// A driver that behaves like a machine without an output device.
    pub fn unavailable() -> Self {
        Self {
            sample_rate: 0,
            available: false,
            slot: Arc::new(Mutex::new(OfflineSlot {
                renderer: None,
                running: false,
            })),
        }
    }
}

impl Driver for OfflineDriver {
    fn sample_rate(&self) -> Result<u32, DeviceError> {
        if self.available {
            Ok(self.sample_rate)
        } else {
            Err(DeviceError::NoDevice)
        }
    }

    fn open(&self, renderer: Renderer) -> Result<Box<dyn OutputDevice>, DeviceError> {
        if !self.available {
            return Err(DeviceError::NoDevice);
        }
        let mut slot = lock(&self.slot);
        slot.renderer = Some(renderer);
        slot.running = false;
        Ok(Box::new(OfflineDevice {
            slot: self.slot.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct OfflineDevice {
    slot: Arc<Mutex<OfflineSlot>>,
    closed: Arc<AtomicBool>,
}

impl OutputDevice for OfflineDevice {
    fn resume(&mut self) -> Result<(), DeviceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DeviceError::Closed);
        }
        lock(&self.slot).running = true;
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), DeviceError> {
        lock(&self.slot).running = false;
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        let mut slot = lock(&self.slot);
        slot.running = false;
        slot.renderer = None;
    }
}

/// Pulls frames through an offline device.
#[derive(Clone)]
pub struct OfflineRenderHandle {
    slot: Arc<Mutex<OfflineSlot>>,
}

impl OfflineRenderHandle {
    /// Render `frames` stereo frames. While suspended or closed the result is
    /// silence and the clock does not move.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * 2];
        let mut slot = lock(&self.slot);
        if slot.running
            && let Some(renderer) = slot.renderer.as_mut()
        {
            renderer.process(&mut out, 2);
        }
        out
    }

    pub fn render_seconds(&self, seconds: f64) -> Vec<f32> {
        let sample_rate = lock(&self.slot)
            .renderer
            .as_ref()
            .map_or(0, |r| r.sample_rate());
        self.render((seconds * sample_rate as f64).round() as usize)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.slot).running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FrameClock;
    use crate::meter::PeakMeter;
    use basedrop::{Collector, Shared};

    fn renderer(collector: &Collector, sample_rate: u32) -> (Renderer, FrameClock) {
        let (_commands, command_rx) = rtrb::RingBuffer::new(4);
        let (status_tx, _status) = rtrb::RingBuffer::new(4);
        let clock = FrameClock::new(sample_rate);
        let meter = Shared::new(&collector.handle(), PeakMeter::new());
        (
            Renderer::new(command_rx, status_tx, clock.clone(), meter),
            clock,
        )
    }

    #[test]
    fn test_offline_time_only_moves_while_running() {
        let collector = Collector::new();
        let (driver, handle) = OfflineDriver::new(1000);
        let (renderer, clock) = renderer(&collector, driver.sample_rate().unwrap());
        let mut device = driver.open(renderer).unwrap();

        assert_eq!(handle.render(100).len(), 200);
        assert_eq!(clock.frames(), 0);

        device.resume().unwrap();
        handle.render_seconds(0.25);
        assert_eq!(clock.frames(), 250);

        device.suspend().unwrap();
        handle.render(100);
        assert_eq!(clock.frames(), 250);

        device.close();
        assert_eq!(device.resume(), Err(DeviceError::Closed));
    }

    #[test]
    fn test_unavailable_driver() {
        let driver = OfflineDriver::unavailable();
        assert_eq!(driver.sample_rate(), Err(DeviceError::NoDevice));
    }
}
