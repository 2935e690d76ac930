//! Capture devices for recording.

use std::thread::JoinHandle;

use cpal::{
    SampleRate, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use crossbeam_channel::{Sender, bounded};

use crate::device::DeviceError;

/// Requested capture settings. Capture is raw: no echo cancellation, noise
/// suppression or automatic gain.
#[derive(Debug, Clone, PartialEq)]
pub struct InputConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for InputConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
            sample_rate: 44100,
            channels: 1,
        }
    }
}

pub trait InputDriver: Send + Sync {
    fn open(&self, constraints: &InputConstraints) -> Result<Box<dyn InputStream>, DeviceError>;
}

pub trait InputStream: Send {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;

    /// Move every captured interleaved sample into `into`, returning how many.
    fn read(&mut self, into: &mut Vec<f32>) -> usize;

    fn close(&mut self);
}

/// Seconds of audio the capture ring holds between reads.
const CAPTURE_RING_SECS: usize = 4;

#[derive(Debug, Default, Clone)]
pub struct CpalInputDriver;

impl InputDriver for CpalInputDriver {
    fn open(&self, constraints: &InputConstraints) -> Result<Box<dyn InputStream>, DeviceError> {
        if constraints.echo_cancellation
            || constraints.noise_suppression
            || constraints.auto_gain_control
        {
            log::debug!("input processing flags requested but capture is always raw");
        }

        let constraints = constraints.clone();
        let (ready_tx, ready_rx) =
            bounded::<Result<(u32, u16, rtrb::Consumer<f32>), DeviceError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("daw-input".into())
            .spawn(move || match start_capture(&constraints) {
                Ok((stream, sample_rate, channels, consumer)) => {
                    let _ = ready_tx.send(Ok((sample_rate, channels, consumer)));
                    // Park until closed; dropping the stream ends capture.
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        let (sample_rate, channels, consumer) =
            ready_rx.recv().map_err(|_| DeviceError::Disconnected)??;
        log::info!("capturing {channels} channel(s) at {sample_rate} Hz");
        Ok(Box::new(CpalInputStream {
            consumer,
            sample_rate,
            channels,
            stop: Some(stop_tx),
            thread: Some(thread),
        }))
    }
}

fn start_capture(
    constraints: &InputConstraints,
) -> Result<(cpal::Stream, u32, u16, rtrb::Consumer<f32>), DeviceError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(DeviceError::PermissionDenied)?;

    let wanted = SampleRate(constraints.sample_rate);
    let supported = device
        .supported_input_configs()
        .map_err(|e| DeviceError::Backend(e.to_string()))?
        .filter(|range| range.min_sample_rate() <= wanted && wanted <= range.max_sample_rate())
        .min_by_key(|range| range.channels().abs_diff(constraints.channels))
        .map(|range| range.with_sample_rate(wanted));
    let config = match supported {
        Some(config) => config,
        None => device
            .default_input_config()
            .map_err(|e| DeviceError::Backend(e.to_string()))?,
    };

    let sample_rate = config.sample_rate().0;
    let channels = config.channels();
    let (producer, consumer) =
        rtrb::RingBuffer::new(sample_rate as usize * channels as usize * CAPTURE_RING_SECS);

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => build_capture::<f32>(&device, &config.into(), producer)?,
        cpal::SampleFormat::I16 => build_capture::<i16>(&device, &config.into(), producer)?,
        cpal::SampleFormat::U16 => build_capture::<u16>(&device, &config.into(), producer)?,
        sample_format => return Err(DeviceError::UnsupportedFormat(sample_format.to_string())),
    };
    stream.play().map_err(|e| DeviceError::Backend(e.to_string()))?;
    Ok((stream, sample_rate, channels, consumer))
}

fn build_capture<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: rtrb::Producer<f32>,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample,
    f32: cpal::FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for sample in data {
                    if producer.push(cpal::Sample::from_sample(*sample)).is_err() {
                        break;
                    }
                }
            },
            |err| log::error!("input stream error: {err}"),
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => DeviceError::PermissionDenied,
            other => DeviceError::Backend(other.to_string()),
        })
}

struct CpalInputStream {
    consumer: rtrb::Consumer<f32>,
    sample_rate: u32,
    channels: u16,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl InputStream for CpalInputStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn read(&mut self, into: &mut Vec<f32>) -> usize {
        let available = self.consumer.slots();
        match self.consumer.read_chunk(available) {
            Ok(chunk) => {
                let (first, second) = chunk.as_slices();
                into.extend_from_slice(first);
                into.extend_from_slice(second);
                chunk.commit_all();
                available
            }
            Err(_) => 0,
        }
    }

    fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::warn!("input thread panicked");
        }
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Input driver fed from memory; `denied()` refuses like a user declining
/// microphone access.
#[derive(Debug, Clone)]
pub struct SyntheticInputDriver {
    samples: Option<Vec<f32>>,
    sample_rate: u32,
}

impl SyntheticInputDriver {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: Some(samples),
            sample_rate,
        }
    }

    pub fn denied() -> Self {
        Self {
            samples: None,
            sample_rate: 0,
        }
    }
}

impl InputDriver for SyntheticInputDriver {
    fn open(&self, _constraints: &InputConstraints) -> Result<Box<dyn InputStream>, DeviceError> {
        let samples = self.samples.clone().ok_or(DeviceError::PermissionDenied)?;
        Ok(Box::new(SyntheticInputStream {
            samples,
            sample_rate: self.sample_rate,
        }))
    }
}

struct SyntheticInputStream {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl InputStream for SyntheticInputStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        1
    }

    fn read(&mut self, into: &mut Vec<f32>) -> usize {
        let n = self.samples.len();
        into.append(&mut self.samples);
        n
    }

    fn close(&mut self) {
        self.samples.clear();
    }
}
