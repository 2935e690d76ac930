//! Effect processors for track inserts.
//!
//! Processors are built on the control thread from a kind and its parameter
//! values in schema order, then shipped to the render thread inside a
//! [`ChainProcessor`]. Parameter indices follow
//! [`EffectKind::parameters`](daw_transport::EffectKind::parameters).

use basedrop::{Handle, Owned};
use daw_transport::EffectKind;
use rand::Rng;

use crate::dsp::{Compressor, DelayLine, Filter, FilterMode, Gate, Smoothed, StereoConvolver};

pub trait Processor: Send {
    /// Process interleaved stereo in place.
    fn process(&mut self, buffer: &mut [f32]);

    fn set_param(&mut self, index: usize, value: f32);

    /// Replace the impulse response of a convolution effect.
    fn set_impulse(&mut self, _impulse: Owned<StereoConvolver>) {}
}

pub enum EffectUpdate {
    Param { index: usize, value: f32 },
    Impulse(Owned<StereoConvolver>),
}

/// A track's insert chain. Slots line up with the declared effect list;
/// disabled entries are `None` so updates keep addressing the right effect.
pub struct ChainProcessor {
    id: u64,
    slots: Vec<Option<Box<dyn Processor>>>,
}

impl ChainProcessor {
    pub fn new(id: u64, slots: Vec<Option<Box<dyn Processor>>>) -> Self {
        Self { id, slots }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn process(&mut self, buffer: &mut [f32]) {
        for processor in self.slots.iter_mut().flatten() {
            processor.process(buffer);
        }
    }

    pub fn apply(&mut self, slot: usize, update: EffectUpdate) {
        let Some(Some(processor)) = self.slots.get_mut(slot) else {
            return;
        };
        match update {
            EffectUpdate::Param { index, value } => processor.set_param(index, value),
            EffectUpdate::Impulse(impulse) => processor.set_impulse(impulse),
        }
    }
}

/// Build the processor for `kind` with `values` in schema order.
pub fn build_processor(
    kind: EffectKind,
    values: &[f32],
    sample_rate: u32,
    handle: &Handle,
) -> Box<dyn Processor> {
    let sr = sample_rate as f32;
    let mut processor: Box<dyn Processor> = match kind {
        EffectKind::Eq => Box::new(EqProcessor::new(sr)),
        EffectKind::Compressor => Box::new(CompressorProcessor::new(sr)),
        EffectKind::Reverb => {
            let room = value_or_default(kind, values, 0);
            let damp = value_or_default(kind, values, 1);
            let (l, r) = reverb_impulse(sample_rate, room, damp, &mut rand::thread_rng());
            Box::new(ReverbProcessor::new(
                sr,
                Owned::new(handle, StereoConvolver::new(&l, &r)),
            ))
        }
        EffectKind::Delay => Box::new(DelayProcessor::new(sr)),
        EffectKind::Chorus => Box::new(ChorusProcessor::new(sr)),
        EffectKind::Distortion => Box::new(DistortionProcessor::new(sr)),
        EffectKind::Autotune => Box::new(Passthrough),
        EffectKind::Filter => Box::new(FilterProcessor::new(sr)),
        EffectKind::Gate => Box::new(GateProcessor::new(sr)),
    };
    for index in 0..kind.parameters().len() {
        processor.set_param(index, value_or_default(kind, values, index));
    }
    processor
}

fn value_or_default(kind: EffectKind, values: &[f32], index: usize) -> f32 {
    values
        .get(index)
        .copied()
        .or_else(|| kind.parameters().get(index).map(|p| p.default))
        .unwrap_or(0.0)
}

/// Two channels of decaying noise, `room_size`% of three seconds long,
/// normalised to unit energy per channel.
pub fn reverb_impulse(
    sample_rate: u32,
    room_size: f32,
    dampening: f32,
    rng: &mut impl Rng,
) -> (Vec<f32>, Vec<f32>) {
    let sr = sample_rate as f32;
    let length = ((sr * (room_size.clamp(0.0, 100.0) / 100.0) * 3.0) as usize).max(1);
    let base = 1.0 - dampening.clamp(0.0, 100.0) / 100.0;
    let mut channel = || {
        let mut data: Vec<f32> = (0..length)
            .map(|i| rng.gen_range(-1.0f32..1.0) * base.powf(i as f32 / sr))
            .collect();
        let energy: f32 = data.iter().map(|s| s * s).sum();
        if energy > 0.0 {
            let scale = energy.sqrt().recip();
            data.iter_mut().for_each(|s| *s *= scale);
        }
        data
    };
    let left = channel();
    let right = channel();
    (left, right)
}

struct Passthrough;

impl Processor for Passthrough {
    fn process(&mut self, _buffer: &mut [f32]) {}
    fn set_param(&mut self, _index: usize, _value: f32) {}
}

struct EqProcessor {
    values: [f32; 7],
    bands: [[Filter; 3]; 2],
}

impl EqProcessor {
    fn new(sr: f32) -> Self {
        let band = || {
            [
                Filter::new(FilterMode::LowShelf { gain_db: 0.0 }, 80.0, 0.707, sr),
                Filter::new(FilterMode::Peaking { gain_db: 0.0 }, 1000.0, 1.0, sr),
                Filter::new(FilterMode::HighShelf { gain_db: 0.0 }, 8000.0, 0.707, sr),
            ]
        };
        Self {
            values: [0.0, 80.0, 0.0, 1000.0, 1.0, 0.0, 8000.0],
            bands: [band(), band()],
        }
    }
}

impl Processor for EqProcessor {
    fn process(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            for (sample, chain) in frame.iter_mut().zip(self.bands.iter_mut()) {
                for filter in chain.iter_mut() {
                    *sample = filter.run(*sample);
                }
            }
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        let Some(slot) = self.values.get_mut(index) else {
            return;
        };
        *slot = value;
        let [low_gain, low_freq, mid_gain, mid_freq, mid_q, high_gain, high_freq] = self.values;
        for [low, mid, high] in &mut self.bands {
            low.set(FilterMode::LowShelf { gain_db: low_gain }, low_freq, 0.707);
            mid.set(FilterMode::Peaking { gain_db: mid_gain }, mid_freq, mid_q);
            high.set(FilterMode::HighShelf { gain_db: high_gain }, high_freq, 0.707);
        }
    }
}

struct CompressorProcessor {
    compressor: Compressor,
}

impl CompressorProcessor {
    fn new(sr: f32) -> Self {
        Self {
            compressor: Compressor::new(sr),
        }
    }
}

impl Processor for CompressorProcessor {
    fn process(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            let (l, r) = self.compressor.process(frame[0], frame[1]);
            frame[0] = l;
            frame[1] = r;
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        let c = &mut self.compressor;
        match index {
            0 => c.set_threshold(value),
            1 => c.set_ratio(value),
            2 => c.set_attack(value / 1000.0),
            3 => c.set_release(value / 1000.0),
            4 => c.set_knee(value),
            5 => c.set_makeup_db(value),
            _ => {}
        }
    }
}

const MAX_PRE_DELAY_SECS: f32 = 0.1;

struct ReverbProcessor {
    convolver: Owned<StereoConvolver>,
    pre_delay: [DelayLine; 2],
    pre_delay_samples: f32,
    wet: f32,
    dry: f32,
    sample_rate: f32,
}

impl ReverbProcessor {
    fn new(sr: f32, convolver: Owned<StereoConvolver>) -> Self {
        let max = (MAX_PRE_DELAY_SECS * sr) as usize + 1;
        Self {
            convolver,
            pre_delay: [DelayLine::new(max), DelayLine::new(max)],
            pre_delay_samples: 0.0,
            wet: 0.3,
            dry: 0.7,
            sample_rate: sr,
        }
    }
}

impl Processor for ReverbProcessor {
    fn process(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            let (l, r) = (frame[0], frame[1]);
            self.pre_delay[0].write(l);
            self.pre_delay[1].write(r);
            let (wl, wr) = self.convolver.process(
                self.pre_delay[0].read(self.pre_delay_samples),
                self.pre_delay[1].read(self.pre_delay_samples),
            );
            frame[0] = l * self.dry + wl * self.wet;
            frame[1] = r * self.dry + wr * self.wet;
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        match index {
            // room size and dampening arrive as a new impulse
            2 => {
                self.wet = value / 100.0;
                self.dry = 1.0 - self.wet;
            }
            3 => {
                self.pre_delay_samples = (value / 1000.0).min(MAX_PRE_DELAY_SECS) * self.sample_rate
            }
            _ => {}
        }
    }

    fn set_impulse(&mut self, impulse: Owned<StereoConvolver>) {
        self.convolver = impulse;
    }
}

const MAX_DELAY_SECS: f32 = 2.0;

struct DelayProcessor {
    lines: [DelayLine; 2],
    time: Smoothed,
    spread: f32,
    feedback: f32,
    wet: f32,
    sample_rate: f32,
}

impl DelayProcessor {
    fn new(sr: f32) -> Self {
        let max = (MAX_DELAY_SECS * sr) as usize + 1;
        Self {
            lines: [DelayLine::new(max), DelayLine::new(max)],
            time: Smoothed::new(0.25 * sr, sr, 0.05),
            spread: 0.0,
            feedback: 0.4,
            wet: 0.25,
            sample_rate: sr,
        }
    }
}

impl Processor for DelayProcessor {
    fn process(&mut self, buffer: &mut [f32]) {
        let max = MAX_DELAY_SECS * self.sample_rate;
        for frame in buffer.chunks_exact_mut(2) {
            let base = self.time.next();
            // spread lengthens one side and shortens the other
            let times = [
                (base * (1.0 - self.spread * 0.5)).clamp(1.0, max),
                (base * (1.0 + self.spread * 0.5)).clamp(1.0, max),
            ];
            for (ch, sample) in frame.iter_mut().enumerate() {
                let delayed = self.lines[ch].read(times[ch]);
                self.lines[ch].write(*sample + delayed * self.feedback);
                *sample = *sample * (1.0 - self.wet) + delayed * self.wet;
            }
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        match index {
            0 => self
                .time
                .set((value / 1000.0).min(MAX_DELAY_SECS) * self.sample_rate),
            1 => self.feedback = (value / 100.0).clamp(0.0, 0.9),
            2 => self.wet = value / 100.0,
            3 => self.spread = (value / 100.0).clamp(-1.0, 1.0),
            _ => {}
        }
    }
}

struct ChorusProcessor {
    lines: [DelayLine; 2],
    lfo_phase: [f32; 2],
    rate: f32,
    depth: f32,
    wet: f32,
    feedback: f32,
    sample_rate: f32,
}

const CHORUS_BASE_DELAYS: [f32; 2] = [0.02, 0.03];
const CHORUS_MAX_SWING: f32 = 0.005;

impl ChorusProcessor {
    fn new(sr: f32) -> Self {
        let max = ((CHORUS_BASE_DELAYS[1] + CHORUS_MAX_SWING) * sr) as usize + 2;
        Self {
            lines: [DelayLine::new(max), DelayLine::new(max)],
            lfo_phase: [0.0, 0.25],
            rate: 1.0,
            depth: 0.5,
            wet: 0.5,
            feedback: 0.0,
            sample_rate: sr,
        }
    }
}

impl Processor for ChorusProcessor {
    fn process(&mut self, buffer: &mut [f32]) {
        // second voice runs its LFO 10% faster
        let rates = [self.rate, self.rate * 1.1];
        for frame in buffer.chunks_exact_mut(2) {
            for ch in 0..2 {
                let lfo = (self.lfo_phase[ch] * std::f32::consts::TAU).sin();
                self.lfo_phase[ch] = (self.lfo_phase[ch] + rates[ch] / self.sample_rate).fract();
                let delay = (CHORUS_BASE_DELAYS[ch] + lfo * self.depth * CHORUS_MAX_SWING)
                    * self.sample_rate;
                let delayed = self.lines[ch].read(delay);
                let input = frame[ch];
                self.lines[ch].write(input + delayed * self.feedback);
                frame[ch] = input * (1.0 - self.wet) + delayed * self.wet;
            }
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        match index {
            0 => self.rate = value.max(0.0),
            1 => self.depth = value / 100.0,
            2 => self.wet = value / 100.0,
            3 => self.feedback = (value / 100.0).clamp(-0.9, 0.9),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shaper {
    Soft,
    Hard,
    Tube,
    Digital,
}

struct DistortionProcessor {
    shaper: Shaper,
    amount: f32,
    level: f32,
    tone: [Filter; 2],
}

impl DistortionProcessor {
    fn new(sr: f32) -> Self {
        let tone = || Filter::new(FilterMode::LowPass, tone_cutoff(50.0), 0.707, sr);
        Self {
            shaper: Shaper::Soft,
            amount: 0.3,
            level: 0.75,
            tone: [tone(), tone()],
        }
    }

    #[inline]
    fn shape(&self, x: f32) -> f32 {
        let x = x.clamp(-1.0, 1.0);
        let k = self.amount * 20.0;
        match self.shaper {
            Shaper::Soft => {
                let deg = std::f32::consts::PI / 180.0;
                (3.0 + k) * x * 20.0 * deg / (std::f32::consts::PI + k * x.abs())
            }
            Shaper::Hard => (x * (1.0 + k)).clamp(-1.0, 1.0),
            Shaper::Tube => {
                if x >= 0.0 {
                    (x * (1.0 + k)).tanh()
                } else {
                    (x * (1.0 + k * 0.5)).tanh() * 0.8
                }
            }
            Shaper::Digital => {
                let steps = 2f32.powf(16.0 - self.amount * 14.0);
                (x * steps).round() / steps
            }
        }
    }
}

fn tone_cutoff(tone: f32) -> f32 {
    800.0 + tone.clamp(0.0, 100.0) / 100.0 * 11200.0
}

impl Processor for DistortionProcessor {
    fn process(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            for ch in 0..frame.len().min(self.tone.len()) {
                let shaped = self.shape(frame[ch]);
                frame[ch] = self.tone[ch].run(shaped) * self.level;
            }
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        match index {
            0 => self.amount = (value / 100.0).clamp(0.0, 1.0),
            1 => {
                for filter in &mut self.tone {
                    filter.set_frequency(tone_cutoff(value));
                }
            }
            2 => self.level = value / 100.0,
            3 => {
                self.shaper = match value.round() as i32 {
                    1 => Shaper::Hard,
                    2 => Shaper::Tube,
                    3 => Shaper::Digital,
                    _ => Shaper::Soft,
                }
            }
            _ => {}
        }
    }
}

const MAX_FILTER_STAGES: usize = 4;

struct FilterProcessor {
    stages: [[Filter; MAX_FILTER_STAGES]; 2],
    active: usize,
    mode: FilterMode,
    cutoff: f32,
    q: f32,
}

impl FilterProcessor {
    fn new(sr: f32) -> Self {
        let chain = || -> [Filter; MAX_FILTER_STAGES] {
            std::array::from_fn(|_| Filter::new(FilterMode::LowPass, 1000.0, 1.0, sr))
        };
        Self {
            stages: [chain(), chain()],
            active: 2,
            mode: FilterMode::LowPass,
            cutoff: 1000.0,
            q: 1.0,
        }
    }

    fn retune(&mut self) {
        for chain in &mut self.stages {
            for stage in chain.iter_mut() {
                stage.set(self.mode, self.cutoff, self.q);
            }
        }
    }
}

impl Processor for FilterProcessor {
    fn process(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            for (sample, chain) in frame.iter_mut().zip(self.stages.iter_mut()) {
                for stage in &mut chain[..self.active] {
                    *sample = stage.run(*sample);
                }
            }
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        match index {
            0 => self.cutoff = value,
            1 => self.q = value,
            2 => self.mode = FilterMode::from_index(value),
            3 => {
                self.active = (value.round() as usize).clamp(1, MAX_FILTER_STAGES);
                return;
            }
            _ => return,
        }
        self.retune();
    }
}

struct GateProcessor {
    gate: Gate,
}

impl GateProcessor {
    fn new(sr: f32) -> Self {
        Self { gate: Gate::new(sr) }
    }
}

impl Processor for GateProcessor {
    fn process(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            let (l, r) = self.gate.process(frame[0], frame[1]);
            frame[0] = l;
            frame[1] = r;
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        let g = &mut self.gate;
        match index {
            0 => g.set_threshold(value),
            1 => g.set_ratio(value),
            2 => g.set_attack(value / 1000.0),
            3 => g.set_hold(value / 1000.0),
            4 => g.set_release(value / 1000.0),
            _ => {}
        }
    }
}
