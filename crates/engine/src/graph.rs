//! The render graph: sources summed into per-track buses, buses through
//! their insert chains and level stages into the master bus.
//!
//! Everything here runs on the render thread. Nothing allocates or frees
//! after construction: objects arrive wrapped in `basedrop::Owned` and their
//! memory is reclaimed by the collector on the control thread.

use std::sync::atomic::{AtomicU64, Ordering};

use basedrop::{Owned, Shared};

use crate::clock::FrameClock;
use crate::dsp::{self, Smoothed};
use crate::effects::{ChainProcessor, EffectUpdate};
use crate::meter::PeakMeter;
use crate::source::{RenderContext, Source};

/// Largest block rendered in one pass; device buffers are split into these.
pub const MAX_BLOCK: usize = 512;
const MAX_SOURCES: usize = 512;
const MAX_BUSES: usize = 128;
const GAIN_SMOOTHING_SECS: f32 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

/// Where a source's output is summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Master,
    Track(u64),
}

pub enum Command {
    Play {
        id: SourceId,
        route: Route,
        source: Owned<Box<dyn Source>>,
    },
    Stop {
        id: SourceId,
        when: f64,
    },
    StopAll {
        when: f64,
    },
    AddBus(Owned<Bus>),
    SetBusLevel {
        track: u64,
        gain: f32,
        pan: f32,
    },
    InstallChain {
        track: u64,
        chain: Owned<ChainProcessor>,
    },
    ClearChain {
        track: u64,
    },
    UpdateEffect {
        track: u64,
        chain: u64,
        slot: usize,
        update: EffectUpdate,
    },
    SetMasterGain(f32),
    ArmTap(Owned<Tap>),
    DisarmTap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The source ended, was stopped, or could not be admitted.
    Finished(SourceId),
}

/// A track's mixing stage. Built on the control thread, owned by the graph.
pub struct Bus {
    track: u64,
    buffer: Vec<f32>,
    gain: Smoothed,
    pan: Smoothed,
    chain: Option<Owned<ChainProcessor>>,
    meter: Shared<PeakMeter>,
}

impl Bus {
    pub fn new(track: u64, meter: Shared<PeakMeter>, sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        Self {
            track,
            buffer: vec![0.0; MAX_BLOCK * 2],
            gain: Smoothed::new(1.0, sr, GAIN_SMOOTHING_SECS),
            pan: Smoothed::new(0.0, sr, GAIN_SMOOTHING_SECS),
            chain: None,
            meter,
        }
    }
}

/// Copies the master output into a ring for a consumer off the render
/// thread. Samples that do not fit are counted in `overflow`.
pub struct Tap {
    producer: rtrb::Producer<f32>,
    overflow: Shared<AtomicU64>,
}

impl Tap {
    pub fn new(producer: rtrb::Producer<f32>, overflow: Shared<AtomicU64>) -> Self {
        Self { producer, overflow }
    }

    fn capture(&mut self, block: &[f32]) {
        let mut written = 0;
        for sample in block {
            if self.producer.push(*sample).is_err() {
                break;
            }
            written += 1;
        }
        let lost = block.len() - written;
        if lost > 0 {
            self.overflow.fetch_add(lost as u64, Ordering::Relaxed);
        }
    }
}

struct Playing {
    id: SourceId,
    route: Route,
    source: Owned<Box<dyn Source>>,
}

pub struct Renderer {
    commands: rtrb::Consumer<Command>,
    status: rtrb::Producer<Status>,
    clock: FrameClock,
    sample_rate: f32,
    sources: Vec<Playing>,
    buses: Vec<Owned<Bus>>,
    master: Vec<f32>,
    master_gain: Smoothed,
    master_meter: Shared<PeakMeter>,
    tap: Option<Owned<Tap>>,
}

impl Renderer {
    pub fn new(
        commands: rtrb::Consumer<Command>,
        status: rtrb::Producer<Status>,
        clock: FrameClock,
        master_meter: Shared<PeakMeter>,
    ) -> Self {
        let sr = clock.sample_rate() as f32;
        Self {
            commands,
            status,
            clock,
            sample_rate: sr,
            sources: Vec::with_capacity(MAX_SOURCES),
            buses: Vec::with_capacity(MAX_BUSES),
            master: vec![0.0; MAX_BLOCK * 2],
            master_gain: Smoothed::new(1.0, sr, GAIN_SMOOTHING_SECS),
            master_meter,
            tap: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    /// Fill an interleaved device buffer with `channels` channels.
    pub fn process(&mut self, out: &mut [f32], channels: usize) {
        self.drain_commands();
        let channels = channels.max(1);
        for chunk in out.chunks_mut(MAX_BLOCK * channels) {
            let frames = chunk.len() / channels;
            self.render_block(frames);
            for (frame, stereo) in chunk
                .chunks_exact_mut(channels)
                .zip(self.master.chunks_exact(2))
            {
                if channels == 1 {
                    frame[0] = (stereo[0] + stereo[1]) * 0.5;
                } else {
                    frame[0] = stereo[0];
                    frame[1] = stereo[1];
                    frame[2..].fill(0.0);
                }
            }
            self.clock.advance(frames as u64);
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Play { id, route, source } => {
                if self.sources.len() < self.sources.capacity() {
                    self.sources.push(Playing { id, route, source });
                } else {
                    let _ = self.status.push(Status::Finished(id));
                }
            }
            Command::Stop { id, when } => {
                // unknown ids belong to sources that already finished
                if let Some(playing) = self.sources.iter_mut().find(|p| p.id == id) {
                    playing.source.stop(when);
                }
            }
            Command::StopAll { when } => {
                for playing in &mut self.sources {
                    playing.source.stop(when);
                }
            }
            Command::AddBus(bus) => {
                let exists = self.buses.iter().any(|b| b.track == bus.track);
                if !exists && self.buses.len() < self.buses.capacity() {
                    self.buses.push(bus);
                }
            }
            Command::SetBusLevel { track, gain, pan } => {
                if let Some(bus) = self.bus_mut(track) {
                    bus.gain.set(gain);
                    bus.pan.set(pan);
                }
            }
            Command::InstallChain { track, chain } => {
                if let Some(bus) = self.bus_mut(track) {
                    bus.chain = Some(chain);
                }
            }
            Command::ClearChain { track } => {
                if let Some(bus) = self.bus_mut(track) {
                    bus.chain = None;
                }
            }
            Command::UpdateEffect {
                track,
                chain,
                slot,
                update,
            } => {
                if let Some(installed) = self
                    .bus_mut(track)
                    .and_then(|bus| bus.chain.as_mut())
                    .filter(|c| c.id() == chain)
                {
                    installed.apply(slot, update);
                }
            }
            Command::SetMasterGain(gain) => self.master_gain.set(gain),
            Command::ArmTap(tap) => self.tap = Some(tap),
            Command::DisarmTap => self.tap = None,
        }
    }

    fn bus_mut(&mut self, track: u64) -> Option<&mut Bus> {
        self.buses
            .iter_mut()
            .find(|b| b.track == track)
            .map(|b| &mut **b)
    }

    fn render_block(&mut self, frames: usize) {
        let len = frames * 2;
        let ctx = RenderContext {
            frame: self.clock.frames(),
            sample_rate: self.sample_rate,
        };

        let Self {
            sources,
            buses,
            master,
            status,
            ..
        } = self;

        master[..len].fill(0.0);
        for bus in buses.iter_mut() {
            bus.buffer[..len].fill(0.0);
        }

        let mut i = 0;
        while i < sources.len() {
            let playing = &mut sources[i];
            let target = match playing.route {
                Route::Track(track) => buses
                    .iter_mut()
                    .find(|b| b.track == track)
                    .map(|b| &mut b.buffer[..len]),
                Route::Master => Some(&mut master[..len]),
            };
            // a source whose bus is gone is dropped rather than leaking
            // around the track's mute and solo
            let alive = match target {
                Some(buffer) => playing.source.render(buffer, &ctx),
                None => false,
            };
            if alive {
                i += 1;
            } else {
                let done = sources.swap_remove(i);
                let _ = status.push(Status::Finished(done.id));
            }
        }

        for bus in buses.iter_mut() {
            let bus = &mut **bus;
            let buffer = &mut bus.buffer[..len];
            if let Some(chain) = bus.chain.as_mut() {
                chain.process(buffer);
            }
            for frame in buffer.chunks_exact_mut(2) {
                let gain = bus.gain.next();
                let (l, r) = dsp::stereo_pan(frame[0], frame[1], bus.pan.next());
                frame[0] = l * gain;
                frame[1] = r * gain;
            }
            bus.meter.observe_block(buffer);
            for (dst, src) in master[..len].iter_mut().zip(buffer.iter()) {
                *dst += *src;
            }
        }

        for frame in self.master[..len].chunks_exact_mut(2) {
            let gain = self.master_gain.next();
            frame[0] *= gain;
            frame[1] *= gain;
        }
        self.master_meter.observe_block(&self.master[..len]);
        if let Some(tap) = self.tap.as_mut() {
            tap.capture(&self.master[..len]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::BufferSource;
    use basedrop::Collector;
    use daw_transport::AudioArc;

    const SR: u32 = 1000;

    struct Rig {
        collector: Collector,
        commands: rtrb::Producer<Command>,
        status: rtrb::Consumer<Status>,
        renderer: Renderer,
        master_meter: Shared<PeakMeter>,
    }

    impl Rig {
        fn send(&mut self, command: Command) {
            if self.commands.push(command).is_err() {
                panic!("command queue full");
            }
        }
    }

    fn rig() -> Rig {
        let collector = Collector::new();
        let (commands, command_rx) = rtrb::RingBuffer::new(64);
        let (status_tx, status) = rtrb::RingBuffer::new(64);
        let master_meter = Shared::new(&collector.handle(), PeakMeter::new());
        let renderer = Renderer::new(
            command_rx,
            status_tx,
            FrameClock::new(SR),
            master_meter.clone(),
        );
        Rig {
            collector,
            commands,
            status,
            renderer,
            master_meter,
        }
    }

    fn ones(frames: usize) -> Box<dyn Source> {
        Box::new(BufferSource::new(
            AudioArc::mono(vec![1.0; frames], SR),
            0.0,
            0.0,
            1.0,
            SR,
        ))
    }

    #[test]
    fn test_source_reaches_master_and_reports_finish() {
        let mut rig = rig();
        let handle = rig.collector.handle();
        rig.send(Command::Play {
            id: SourceId(1),
            route: Route::Master,
            source: Owned::new(&handle, ones(10)),
        });

        let mut out = vec![0.0; 40];
        rig.renderer.process(&mut out, 2);
        assert_eq!(out[0], 1.0);
        assert_eq!(out[19], 1.0);
        assert_eq!(out[20], 0.0);
        assert_eq!(rig.status.pop(), Ok(Status::Finished(SourceId(1))));
        assert_eq!(rig.renderer.active_sources(), 0);
        assert_eq!(rig.master_meter.take(), 1.0);

        rig.collector.collect();
    }

    #[test]
    fn test_bus_gain_and_meter() {
        let mut rig = rig();
        let handle = rig.collector.handle();
        let meter = Shared::new(&handle, PeakMeter::new());
        rig.send(Command::AddBus(Owned::new(&handle, Bus::new(7, meter.clone(), SR))));
        rig.send(Command::SetBusLevel {
            track: 7,
            gain: 0.0,
            pan: 0.0,
        });
        rig.send(Command::Play {
            id: SourceId(2),
            route: Route::Track(7),
            source: Owned::new(&handle, ones(2000)),
        });

        let mut out = vec![0.0; 2 * 500];
        rig.renderer.process(&mut out, 2);
        assert!(out[2 * 499].abs() < 1e-3, "smoothed to silence");
        assert!(meter.take() > 0.0);
    }

    #[test]
    fn test_stop_unknown_source_is_ignored() {
        let mut rig = rig();
        rig.send(Command::Stop {
            id: SourceId(99),
            when: 0.0,
        });
        let mut out = vec![0.0; 8];
        rig.renderer.process(&mut out, 2);
        assert!(rig.status.pop().is_err());
    }

    #[test]
    fn test_tap_receives_master() {
        let mut rig = rig();
        let handle = rig.collector.handle();
        let (producer, mut tap_rx) = rtrb::RingBuffer::new(64);
        let overflow = Shared::new(&handle, AtomicU64::new(0));
        rig.send(Command::ArmTap(Owned::new(&handle, Tap::new(producer, overflow.clone()))));
        rig.send(Command::Play {
            id: SourceId(3),
            route: Route::Master,
            source: Owned::new(&handle, ones(4)),
        });
        let mut out = vec![0.0; 8];
        rig.renderer.process(&mut out, 1);
        assert_eq!(out[..4], [1.0; 4]);
        let mut tapped = Vec::new();
        while let Ok(s) = tap_rx.pop() {
            tapped.push(s);
        }
        assert_eq!(tapped.len(), 16);
        assert_eq!(tapped[..8], [1.0; 8]);
        assert_eq!(overflow.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_full_tap_counts_lost_samples() {
        let mut rig = rig();
        let handle = rig.collector.handle();
        let (producer, _tap_rx) = rtrb::RingBuffer::new(10);
        let overflow = Shared::new(&handle, AtomicU64::new(0));
        rig.send(Command::ArmTap(Owned::new(&handle, Tap::new(producer, overflow.clone()))));
        let mut out = vec![0.0; 2 * 8];
        rig.renderer.process(&mut out, 2);
        assert_eq!(overflow.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_source_without_bus_is_dropped() {
        let mut rig = rig();
        let handle = rig.collector.handle();
        rig.send(Command::Play {
            id: SourceId(4),
            route: Route::Track(5),
            source: Owned::new(&handle, ones(100)),
        });
        let mut out = vec![0.0; 2 * 20];
        rig.renderer.process(&mut out, 2);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(rig.status.pop(), Ok(Status::Finished(SourceId(4))));
        assert_eq!(rig.renderer.active_sources(), 0);
    }

    #[test]
    fn test_clock_advances_per_frame() {
        let mut rig = rig();
        let mut out = vec![0.0; 2 * 1500];
        rig.renderer.process(&mut out, 2);
        assert_eq!(rig.renderer.clock.frames(), 1500);
    }
}
