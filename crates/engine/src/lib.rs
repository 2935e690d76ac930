//! The audio platform: a render graph on a real-time thread, driven through
//! a lock-free command ring from an [`AudioContext`] handle.

mod clock;
pub mod dsp;
mod device;
mod effects;
mod graph;
mod input;
mod meter;
pub mod param;
mod source;

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use basedrop::{Collector, Handle, Owned, Shared};

pub use clock::{AudioClock, FrameClock, ManualClock};
pub use device::{CpalDriver, DeviceError, Driver, OfflineDriver, OfflineRenderHandle, OutputDevice};
pub use effects::{ChainProcessor, EffectUpdate, Processor, build_processor, reverb_impulse};
pub use graph::{Bus, Command, MAX_BLOCK, Renderer, Route, SourceId, Status, Tap};
pub use input::{CpalInputDriver, InputConstraints, InputDriver, InputStream, SyntheticInputDriver};
pub use meter::PeakMeter;
pub use source::{BufferSource, RELEASE_FLOOR, RenderContext, Source, Voice, VoiceBuilder};

const COMMAND_CAPACITY: usize = 4096;
const STATUS_CAPACITY: usize = 4096;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

impl ContextState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ContextState::Suspended,
            1 => ContextState::Running,
            _ => ContextState::Closed,
        }
    }
}

/// Control-thread handle to a running render graph.
///
/// Thread-safe: every field is atomic or behind a short-lived lock, and none
/// of those locks is ever taken by the render thread.
pub struct AudioContext {
    device: Mutex<Box<dyn OutputDevice>>,
    state: AtomicU8,
    commands: Mutex<rtrb::Producer<Command>>,
    status: Mutex<rtrb::Consumer<Status>>,
    clock: FrameClock,
    master_meter: Shared<PeakMeter>,
    next_source: AtomicU64,
    handle: Handle,
    collector: Mutex<Collector>,
}

impl AudioContext {
    /// Open a context on `driver`. It starts suspended.
    pub fn open(driver: &dyn Driver) -> Result<Self, DeviceError> {
        let sample_rate = driver.sample_rate()?;
        let collector = Collector::new();
        let handle = collector.handle();

        let (command_tx, command_rx) = rtrb::RingBuffer::<Command>::new(COMMAND_CAPACITY);
        let (status_tx, status_rx) = rtrb::RingBuffer::<Status>::new(STATUS_CAPACITY);

        let clock = FrameClock::new(sample_rate);
        let master_meter = Shared::new(&handle, PeakMeter::new());
        let renderer = Renderer::new(command_rx, status_tx, clock.clone(), master_meter.clone());
        let device = driver.open(renderer)?;
        log::info!("audio context opened at {sample_rate} Hz");

        Ok(Self {
            device: Mutex::new(device),
            state: AtomicU8::new(ContextState::Suspended as u8),
            commands: Mutex::new(command_tx),
            status: Mutex::new(status_rx),
            clock,
            master_meter,
            next_source: AtomicU64::new(1),
            handle,
            collector: Mutex::new(collector),
        })
    }

    pub fn state(&self) -> ContextState {
        ContextState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ContextState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn resume(&self) -> Result<(), DeviceError> {
        match self.state() {
            ContextState::Running => Ok(()),
            ContextState::Closed => Err(DeviceError::Closed),
            ContextState::Suspended => {
                lock(&self.device).resume()?;
                self.set_state(ContextState::Running);
                Ok(())
            }
        }
    }

    pub fn suspend(&self) -> Result<(), DeviceError> {
        match self.state() {
            ContextState::Suspended => Ok(()),
            ContextState::Closed => Err(DeviceError::Closed),
            ContextState::Running => {
                lock(&self.device).suspend()?;
                self.set_state(ContextState::Suspended);
                Ok(())
            }
        }
    }

    pub fn close(&self) {
        if self.state() == ContextState::Closed {
            return;
        }
        lock(&self.device).close();
        self.set_state(ContextState::Closed);
        self.collect();
        log::info!("audio context closed");
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    /// Seconds of audio rendered so far.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn clock(&self) -> FrameClock {
        self.clock.clone()
    }

    /// Allocation handle for objects sent to the render thread.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn master_meter(&self) -> Shared<PeakMeter> {
        self.master_meter.clone()
    }

    pub fn send(&self, command: Command) -> Result<(), DeviceError> {
        if self.state() == ContextState::Closed {
            return Err(DeviceError::Closed);
        }
        lock(&self.commands)
            .push(command)
            .map_err(|_| DeviceError::QueueFull)
    }

    pub fn play(&self, route: Route, source: Box<dyn Source>) -> Result<SourceId, DeviceError> {
        let id = SourceId(self.next_source.fetch_add(1, Ordering::Relaxed));
        self.send(Command::Play {
            id,
            route,
            source: Owned::new(&self.handle, source),
        })?;
        Ok(id)
    }

    pub fn stop(&self, id: SourceId, when: f64) -> Result<(), DeviceError> {
        self.send(Command::Stop { id, when })
    }

    pub fn stop_all(&self, when: f64) -> Result<(), DeviceError> {
        self.send(Command::StopAll { when })
    }

    pub fn set_master_gain(&self, gain: f32) -> Result<(), DeviceError> {
        self.send(Command::SetMasterGain(param::GAIN.sanitize(gain)))
    }

    /// Sources the render thread has finished with since the last call.
    pub fn drain_finished(&self) -> Vec<SourceId> {
        let mut status = lock(&self.status);
        let mut finished = Vec::new();
        while let Ok(Status::Finished(id)) = status.pop() {
            finished.push(id);
        }
        finished
    }

    /// Free memory the render thread has let go of.
    pub fn collect(&self) {
        lock(&self.collector).collect();
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        lock(&self.device).close();
        lock(&self.collector).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daw_transport::AudioArc;

    fn offline(sample_rate: u32) -> (AudioContext, OfflineRenderHandle) {
        let (driver, render) = OfflineDriver::new(sample_rate);
        (AudioContext::open(&driver).unwrap(), render)
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (ctx, _render) = offline(1000);
        assert_eq!(ctx.state(), ContextState::Suspended);
        ctx.resume().unwrap();
        ctx.resume().unwrap();
        assert_eq!(ctx.state(), ContextState::Running);
        ctx.suspend().unwrap();
        assert_eq!(ctx.state(), ContextState::Suspended);
        ctx.close();
        assert_eq!(ctx.state(), ContextState::Closed);
        assert_eq!(ctx.resume(), Err(DeviceError::Closed));
        assert!(ctx.play(Route::Master, silent()).is_err());
    }

    fn silent() -> Box<dyn Source> {
        Box::new(BufferSource::new(AudioArc::mono(vec![0.0; 4], 1000), 0.0, 0.0, 1.0, 1000))
    }

    #[test]
    fn test_play_and_collect_finished() {
        let (ctx, render) = offline(1000);
        ctx.resume().unwrap();
        let id = ctx.play(Route::Master, silent()).unwrap();
        render.render(64);
        assert_eq!(ctx.drain_finished(), vec![id]);
        assert!(ctx.drain_finished().is_empty());
        ctx.collect();
        assert!((ctx.now() - 0.064).abs() < 1e-9);
    }

    #[test]
    fn test_unavailable_driver_fails_to_open() {
        let driver = OfflineDriver::unavailable();
        assert!(matches!(
            AudioContext::open(&driver),
            Err(DeviceError::NoDevice)
        ));
    }
}
