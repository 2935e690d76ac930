//! Sound sources living on the render thread.
//!
//! A source renders itself into a stereo bus buffer given the absolute frame
//! of the block, so every source carries its own start and stop times and
//! becomes audible sample-accurately regardless of block boundaries.

use daw_transport::AudioArc;

use crate::dsp::{Filter, Oscillator, Waveform};
use crate::param::{self, Automation};

/// Level an exponential release decays to before the voice ends.
pub const RELEASE_FLOOR: f32 = 0.001;

pub struct RenderContext {
    /// Absolute frame of the first frame in the block.
    pub frame: u64,
    pub sample_rate: f32,
}

impl RenderContext {
    #[inline]
    pub fn time_of(&self, offset: usize) -> f64 {
        (self.frame + offset as u64) as f64 / self.sample_rate as f64
    }
}

pub trait Source: Send {
    /// Mix into `out` (interleaved stereo). Returns `false` once the source
    /// has nothing more to play and can be discarded.
    fn render(&mut self, out: &mut [f32], ctx: &RenderContext) -> bool;

    /// Stop (or begin releasing) at absolute time `when`. Calling it again
    /// with a later time does nothing.
    fn stop(&mut self, when: f64);
}

/// Plays decoded audio from an offset, starting at an absolute time.
pub struct BufferSource {
    audio: AudioArc,
    start: f64,
    position: f64,
    step: f64,
    gain: f32,
    stop: Option<f64>,
}

impl BufferSource {
    /// `offset` is in seconds into the buffer; `when` is absolute.
    pub fn new(audio: AudioArc, when: f64, offset: f64, gain: f32, sample_rate: u32) -> Self {
        let offset = param::SECONDS
            .with_max(f32::MAX)
            .sanitize(offset as f32) as f64;
        let step = audio.sample_rate() as f64 / sample_rate as f64;
        Self {
            position: offset * audio.sample_rate() as f64,
            audio,
            start: when,
            step,
            gain: param::GAIN.sanitize(gain),
            stop: None,
        }
    }

    fn interpolate(&self, channel: usize) -> f32 {
        let index = self.position.floor();
        let frac = (self.position - index) as f32;
        let i = index as usize;
        let a = self.audio.sample(i, channel);
        let b = self.audio.sample(i + 1, channel);
        a + (b - a) * frac
    }
}

impl Source for BufferSource {
    fn render(&mut self, out: &mut [f32], ctx: &RenderContext) -> bool {
        let total = self.audio.frames() as f64;
        for (i, frame) in out.chunks_exact_mut(2).enumerate() {
            let t = ctx.time_of(i);
            if self.stop.is_some_and(|stop| t >= stop) {
                return false;
            }
            if t < self.start {
                continue;
            }
            if self.position >= total {
                return false;
            }
            frame[0] += self.interpolate(0) * self.gain;
            frame[1] += self.interpolate(1) * self.gain;
            self.position += self.step;
        }
        self.position < total
    }

    fn stop(&mut self, when: f64) {
        if self.stop.is_none_or(|stop| when < stop) {
            self.stop = Some(when);
        }
    }
}

enum Generator {
    Oscillator {
        osc: Oscillator,
        frequency: Automation,
        level: f32,
    },
    Noise {
        samples: Vec<f32>,
        position: usize,
        level: f32,
    },
}

impl Generator {
    #[inline]
    fn next(&mut self, t: f64, sample_rate: f32) -> f32 {
        match self {
            Generator::Oscillator {
                osc,
                frequency,
                level,
            } => osc.next(frequency.value_at(t), sample_rate) * *level,
            Generator::Noise {
                samples,
                position,
                level,
            } => {
                let s = samples.get(*position).copied().unwrap_or(0.0);
                *position += 1;
                s * *level
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Release {
    start: f64,
    from: f32,
    duration: f64,
}

impl Release {
    fn gain_at(&self, t: f64) -> f32 {
        if self.duration <= 0.0 || self.from <= RELEASE_FLOOR {
            return 0.0;
        }
        let progress = ((t - self.start) / self.duration).clamp(0.0, 1.0) as f32;
        self.from * (RELEASE_FLOOR / self.from).powf(progress)
    }

    fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// A synthesized voice: generators summed through an optional filter and a
/// gain envelope. Sustained voices play until stopped and then release;
/// one-shots end on their own.
pub struct Voice {
    start: f64,
    generators: Vec<Generator>,
    filter: Option<Filter>,
    envelope: Automation,
    release_time: f64,
    release: Option<Release>,
    end: Option<f64>,
}

impl Voice {
    pub fn builder(start: f64) -> VoiceBuilder {
        VoiceBuilder {
            start,
            generators: Vec::new(),
            filter: None,
            envelope: Automation::constant(1.0),
            release_time: 0.005,
            end: None,
        }
    }

    fn gain_at(&self, t: f64) -> f32 {
        match self.release {
            Some(release) if t >= release.start => release.gain_at(t),
            _ => self.envelope.value_at(t),
        }
    }

    fn finished_at(&self, t: f64) -> bool {
        self.release.is_some_and(|r| t >= r.end()) || self.end.is_some_and(|end| t >= end)
    }
}

impl Source for Voice {
    fn render(&mut self, out: &mut [f32], ctx: &RenderContext) -> bool {
        for (i, frame) in out.chunks_exact_mut(2).enumerate() {
            let t = ctx.time_of(i);
            if self.finished_at(t) {
                return false;
            }
            if t < self.start {
                continue;
            }
            let mut sample = 0.0;
            for generator in &mut self.generators {
                sample += generator.next(t, ctx.sample_rate);
            }
            if let Some(filter) = &mut self.filter {
                sample = filter.run(sample);
            }
            sample *= self.gain_at(t);
            frame[0] += sample;
            frame[1] += sample;
        }
        true
    }

    fn stop(&mut self, when: f64) {
        if self.release.is_some_and(|r| r.start <= when) {
            return;
        }
        if when <= self.start {
            self.end = Some(self.start);
            return;
        }
        let from = self.gain_at(when);
        self.release = Some(Release {
            start: when,
            from,
            duration: self.release_time,
        });
    }
}

pub struct VoiceBuilder {
    start: f64,
    generators: Vec<Generator>,
    filter: Option<Filter>,
    envelope: Automation,
    release_time: f64,
    end: Option<f64>,
}

impl VoiceBuilder {
    pub fn oscillator(mut self, waveform: Waveform, frequency: Automation, level: f32) -> Self {
        self.generators.push(Generator::Oscillator {
            osc: Oscillator::new(waveform),
            frequency,
            level: param::GAIN.sanitize(level),
        });
        self
    }

    pub fn noise(mut self, samples: Vec<f32>, level: f32) -> Self {
        self.generators.push(Generator::Noise {
            samples,
            position: 0,
            level: param::GAIN.sanitize(level),
        });
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn envelope(mut self, envelope: Automation) -> Self {
        self.envelope = envelope;
        self
    }

    /// Exponential release length used when the voice is stopped.
    pub fn release(mut self, seconds: f64) -> Self {
        self.release_time = param::SECONDS.sanitize(seconds as f32) as f64;
        self
    }

    /// Ends the voice by itself `duration` seconds after it starts.
    pub fn one_shot(mut self, duration: f64) -> Self {
        self.end = Some(self.start + param::SECONDS.sanitize(duration as f32) as f64);
        self
    }

    pub fn build(self) -> Voice {
        Voice {
            start: self.start,
            generators: self.generators,
            filter: self.filter,
            envelope: self.envelope,
            release_time: self.release_time,
            release: None,
            end: self.end,
        }
    }
}
