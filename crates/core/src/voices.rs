//! Playable instrument voices.
//!
//! A voice is described by a [`VoiceKind`] built from an instrument preset,
//! realised as an engine [`Voice`] and tracked by [`VoiceKey`] until it is
//! released or ends on its own.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use daw_catalog::{Catalog, InstrumentKind, Preset};
use daw_engine::dsp::{Filter, FilterMode, Waveform, white_noise};
use daw_engine::param::{self, Automation, ParamRange};
use daw_engine::{AudioContext, ContextState, RELEASE_FLOOR, Route, SourceId, Voice};
use daw_transport::midi_to_frequency;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Identity of a sounding note: one active voice per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoiceKey {
    pub instrument: String,
    pub note: u8,
}

impl fmt::Display for VoiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.instrument, self.note)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrumKind {
    Kick,
    Snare,
    HiHat,
    Crash,
    Ride,
    Tom1,
    Tom2,
    Tom3,
}

impl DrumKind {
    const BY_NOTE: [DrumKind; 8] = [
        DrumKind::Kick,
        DrumKind::Snare,
        DrumKind::HiHat,
        DrumKind::Crash,
        DrumKind::Ride,
        DrumKind::Tom1,
        DrumKind::Tom2,
        DrumKind::Tom3,
    ];

    pub fn from_note(note: u8) -> Self {
        Self::BY_NOTE[note as usize % Self::BY_NOTE.len()]
    }

    /// Lowest note that plays this drum.
    pub fn note(self) -> u8 {
        Self::BY_NOTE.iter().position(|d| *d == self).unwrap_or(0) as u8
    }

    /// How long the hit rings.
    pub fn duration(self) -> f64 {
        match self {
            DrumKind::Kick => 0.3,
            DrumKind::Snare => 0.2,
            DrumKind::HiHat => 0.1,
            DrumKind::Crash => 1.5,
            DrumKind::Ride => 0.8,
            DrumKind::Tom1 | DrumKind::Tom2 | DrumKind::Tom3 => 0.4,
        }
    }
}

const LEVEL: ParamRange = param::PERCENT;
const MILLIS: ParamRange = ParamRange::new("milliseconds", 0.0, 10_000.0, 10.0);

/// Synthesis recipe for one note, with every preset value already clamped.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceKind {
    Piano {
        brightness: f32,
        sustain: f32,
        attack: f32,
        release: f32,
    },
    Synth {
        waveform: Waveform,
        cutoff: f32,
        resonance: f32,
        attack_ms: f32,
        decay_ms: f32,
        sustain: f32,
        release_ms: f32,
    },
    Bass {
        tone: f32,
        attack: f32,
        sustain: f32,
        release: f32,
    },
    Drum(DrumKind),
}

impl VoiceKind {
    pub fn from_preset(kind: InstrumentKind, preset: &Preset, note: u8) -> Self {
        let level = |name: &str, default: f32| LEVEL.sanitize(preset.number(name, default));
        let millis = |name: &str, default: f32| MILLIS.sanitize(preset.number(name, default));
        match kind {
            InstrumentKind::Piano => VoiceKind::Piano {
                brightness: level("brightness", 60.0),
                sustain: level("sustain", 60.0),
                attack: level("attack", 10.0),
                release: level("release", 80.0),
            },
            InstrumentKind::Synth => VoiceKind::Synth {
                waveform: preset
                    .text("oscillator_type")
                    .and_then(Waveform::from_name)
                    .unwrap_or_default(),
                cutoff: level("cutoff", 70.0),
                resonance: level("resonance", 30.0),
                attack_ms: millis("attack", 10.0),
                decay_ms: millis("decay", 20.0),
                sustain: level("sustain", 70.0),
                release_ms: millis("release", 40.0),
            },
            InstrumentKind::Bass => VoiceKind::Bass {
                tone: level("tone", 60.0),
                attack: level("attack", 40.0),
                sustain: level("sustain", 80.0),
                release: level("release", 60.0),
            },
            InstrumentKind::Drums => VoiceKind::Drum(DrumKind::from_note(note)),
        }
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, VoiceKind::Drum(_))
    }

    /// Build the voice for `note` starting at absolute time `start`.
    /// `velocity` is on the MIDI 0..=127 scale.
    pub fn build(
        &self,
        note: u8,
        velocity: f32,
        start: f64,
        sample_rate: u32,
        rng: &mut impl Rng,
    ) -> Voice {
        let sr = sample_rate as f32;
        let vel = param::VELOCITY.sanitize(velocity) / 127.0;
        let hz = param::FREQUENCY.with_max(sr * 0.5);
        let frequency = hz.sanitize(midi_to_frequency(note.min(127)));

        match *self {
            VoiceKind::Piano {
                brightness,
                sustain,
                attack,
                release,
            } => {
                let attack = (attack / 100.0 * 0.1) as f64;
                let mut envelope = Automation::constant(0.0);
                envelope
                    .set_value_at(start, 0.0)
                    .linear_ramp_to(start + attack, vel)
                    .set_value_at(start + attack + 0.1, vel * sustain / 100.0);
                Voice::builder(start)
                    .oscillator(Waveform::Triangle, Automation::constant(frequency), vel * 0.8)
                    .oscillator(
                        Waveform::Sine,
                        Automation::constant(hz.sanitize(frequency * 2.0)),
                        vel * 0.3 * brightness / 100.0,
                    )
                    .filter(Filter::new(FilterMode::LowPass, 800.0 + brightness * 40.0, 1.0, sr))
                    .envelope(envelope)
                    .release((release / 100.0 * 2.0) as f64)
                    .build()
            }
            VoiceKind::Synth {
                waveform,
                cutoff,
                resonance,
                attack_ms,
                decay_ms,
                sustain,
                release_ms,
            } => {
                let attack = (attack_ms / 1000.0) as f64;
                let decay = (decay_ms / 1000.0) as f64;
                let mut envelope = Automation::constant(0.0);
                envelope
                    .set_value_at(start, 0.0)
                    .linear_ramp_to(start + attack, vel)
                    .exponential_ramp_to(start + attack + decay, vel * sustain / 100.0);
                Voice::builder(start)
                    .oscillator(waveform, Automation::constant(frequency), 1.0)
                    .filter(Filter::new(
                        FilterMode::LowPass,
                        200.0 + cutoff / 100.0 * 4000.0,
                        resonance / 10.0,
                        sr,
                    ))
                    .envelope(envelope)
                    .release((release_ms / 1000.0) as f64)
                    .build()
            }
            VoiceKind::Bass {
                tone,
                attack,
                sustain,
                release,
            } => {
                let attack = (attack / 100.0 * 0.05) as f64;
                let mut envelope = Automation::constant(0.0);
                envelope
                    .set_value_at(start, 0.0)
                    .linear_ramp_to(start + attack, vel)
                    .exponential_ramp_to(start + attack + 0.15, vel * sustain / 100.0);
                Voice::builder(start)
                    .oscillator(Waveform::Sawtooth, Automation::constant(frequency), 0.6)
                    .oscillator(
                        Waveform::Sine,
                        Automation::constant(hz.sanitize(frequency * 0.5)),
                        0.5,
                    )
                    .filter(Filter::new(
                        FilterMode::LowPass,
                        200.0 + tone / 100.0 * 1800.0,
                        1.0,
                        sr,
                    ))
                    .envelope(envelope)
                    .release((release / 100.0) as f64)
                    .build()
            }
            VoiceKind::Drum(drum) => drum_voice(drum, vel, start, sample_rate, rng),
        }
    }
}

fn decay_envelope(start: f64, level: f32, duration: f64) -> Automation {
    let mut envelope = Automation::constant(0.0);
    envelope
        .set_value_at(start, level)
        .exponential_ramp_to(start + duration, RELEASE_FLOOR);
    envelope
}

fn sweep(start: f64, from: f32, to: f32, over: f64) -> Automation {
    let mut frequency = Automation::constant(from);
    frequency
        .set_value_at(start, from)
        .exponential_ramp_to(start + over, to);
    frequency
}

fn drum_voice(drum: DrumKind, vel: f32, start: f64, sample_rate: u32, rng: &mut impl Rng) -> Voice {
    let sr = sample_rate as f32;
    let duration = drum.duration();
    let noise_len = (duration * sample_rate as f64).ceil() as usize;
    let voice = Voice::builder(start).one_shot(duration);
    let voice = match drum {
        DrumKind::Kick => voice
            .oscillator(Waveform::Sine, sweep(start, 60.0, 30.0, 0.1), 1.0)
            .envelope(decay_envelope(start, vel, duration)),
        DrumKind::Snare => voice
            .noise(white_noise(noise_len, rng), 1.0)
            .oscillator(Waveform::Triangle, Automation::constant(180.0), 0.3)
            .filter(Filter::new(FilterMode::BandPass, 200.0, 1.0, sr))
            .envelope(decay_envelope(start, vel * 0.8, duration)),
        DrumKind::HiHat => voice
            .noise(white_noise(noise_len, rng), 1.0)
            .filter(Filter::new(FilterMode::HighPass, 8000.0, 1.0, sr))
            .envelope(decay_envelope(start, vel * 0.5, duration)),
        DrumKind::Crash => voice
            .noise(white_noise(noise_len, rng), 1.0)
            .filter(Filter::new(FilterMode::HighPass, 5000.0, 0.7, sr))
            .envelope(decay_envelope(start, vel * 0.4, duration)),
        DrumKind::Ride => voice
            .noise(white_noise(noise_len, rng), 0.6)
            .oscillator(Waveform::Square, Automation::constant(3200.0), 0.05)
            .filter(Filter::new(FilterMode::HighPass, 6000.0, 0.7, sr))
            .envelope(decay_envelope(start, vel * 0.3, duration)),
        DrumKind::Tom1 | DrumKind::Tom2 | DrumKind::Tom3 => {
            let pitch = match drum {
                DrumKind::Tom1 => 200.0,
                DrumKind::Tom2 => 150.0,
                _ => 100.0,
            };
            voice
                .oscillator(Waveform::Sine, sweep(start, pitch, pitch * 0.6, 0.2), 1.0)
                .envelope(decay_envelope(start, vel * 0.8, duration))
        }
    };
    voice.build()
}

struct ActiveVoice {
    source: SourceId,
    one_shot: bool,
}

/// Starts and stops instrument notes against the audio context.
pub struct VoiceEngine {
    catalog: Arc<Catalog>,
    active: HashMap<VoiceKey, ActiveVoice>,
    route: Route,
    rng: StdRng,
}

impl VoiceEngine {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            active: HashMap::new(),
            route: Route::Master,
            rng: StdRng::from_entropy(),
        }
    }

    /// Where new notes are mixed: the master bus, or a track bus while
    /// playing into a track.
    pub fn set_route(&mut self, route: Route) {
        self.route = route;
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Start `note` on `instrument_id`. Returns `None` when the context is
    /// not running, the instrument is unknown, or the voice could not be
    /// scheduled; the failure is logged and nothing else is affected.
    pub fn play_note(
        &mut self,
        ctx: &AudioContext,
        instrument_id: &str,
        note: u8,
        velocity: f32,
        preset_id: Option<&str>,
    ) -> Option<VoiceKey> {
        if ctx.state() != ContextState::Running {
            log::debug!("note {note} dropped: audio context is not running");
            return None;
        }
        let Some(instrument) = self.catalog.instrument(instrument_id) else {
            log::warn!("{}", crate::EngineError::UnknownInstrument(instrument_id.to_string()));
            return None;
        };
        let preset = preset_id
            .and_then(|id| instrument.preset(id).cloned())
            .unwrap_or_else(|| instrument.default_preset());

        let note = note.min(127);
        let kind = VoiceKind::from_preset(instrument.kind, &preset, note);
        let key = VoiceKey {
            instrument: instrument.id.clone(),
            note,
        };

        let now = ctx.now();
        if let Some(previous) = self.active.remove(&key) {
            if let Err(err) = ctx.stop(previous.source, now) {
                log::debug!("retrigger {}: {err}", crate::EngineError::SchedulingRace);
            }
        }

        let voice = kind.build(note, velocity, now, ctx.sample_rate(), &mut self.rng);
        match ctx.play(self.route, Box::new(voice)) {
            Ok(source) => {
                self.active.insert(
                    key.clone(),
                    ActiveVoice {
                        source,
                        one_shot: kind.is_one_shot(),
                    },
                );
                Some(key)
            }
            Err(err) => {
                log::warn!("voice {key} not started: {err}");
                None
            }
        }
    }

    /// Release the note. Unknown or already released keys are ignored.
    pub fn stop_note(&mut self, ctx: &AudioContext, key: &VoiceKey) {
        let Some(voice) = self.active.remove(key) else {
            return;
        };
        if voice.one_shot {
            return;
        }
        if let Err(err) = ctx.stop(voice.source, ctx.now()) {
            log::debug!("stopping {key}: {err}");
        }
    }

    pub fn stop_all_notes(&mut self, ctx: &AudioContext) {
        let now = ctx.now();
        for (key, voice) in self.active.drain() {
            if !voice.one_shot
                && let Err(err) = ctx.stop(voice.source, now)
            {
                log::debug!("stopping {key}: {err}");
            }
        }
    }

    /// Forget voices the render thread reports as finished.
    pub fn poll(&mut self, finished: &[SourceId]) {
        if finished.is_empty() {
            return;
        }
        self.active.retain(|_, voice| !finished.contains(&voice.source));
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, key: &VoiceKey) -> bool {
        self.active.contains_key(key)
    }

    /// Render one note offline into a mono buffer, for generated clips.
    pub fn render_note(
        &mut self,
        kind: &VoiceKind,
        note: u8,
        velocity: f32,
        at: f64,
        out: &mut [f32],
        sample_rate: u32,
    ) {
        use daw_engine::{RenderContext, Source};

        let mut voice = kind.build(note, velocity, at, sample_rate, &mut self.rng);
        if !kind.is_one_shot() {
            voice.stop(at + 0.25);
        }
        let mut stereo = vec![0.0; out.len() * 2];
        voice.render(
            &mut stereo,
            &RenderContext {
                frame: 0,
                sample_rate: sample_rate as f32,
            },
        );
        for (dst, frame) in out.iter_mut().zip(stereo.chunks_exact(2)) {
            *dst += frame[0];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daw_engine::{OfflineDriver, OfflineRenderHandle};

    fn running(sample_rate: u32) -> (AudioContext, OfflineRenderHandle) {
        let (driver, render) = OfflineDriver::new(sample_rate);
        let ctx = AudioContext::open(&driver).unwrap();
        ctx.resume().unwrap();
        (ctx, render)
    }

    fn engine() -> VoiceEngine {
        VoiceEngine::new(Arc::new(Catalog::builtin()))
    }

    #[test]
    fn test_play_note_adds_one_voice() {
        let (ctx, _render) = running(8000);
        let mut voices = engine();
        let key = voices.play_note(&ctx, "grand_piano", 60, 100.0, None).unwrap();
        assert_eq!(key.to_string(), "grand_piano-60");
        assert_eq!(voices.active_count(), 1);
        voices.play_note(&ctx, "grand_piano", 64, 127.0, Some("warm_piano")).unwrap();
        assert_eq!(voices.active_count(), 2);
    }

    #[test]
    fn test_play_note_needs_running_context() {
        let (driver, _render) = OfflineDriver::new(8000);
        let ctx = AudioContext::open(&driver).unwrap();
        let mut voices = engine();
        assert!(voices.play_note(&ctx, "grand_piano", 60, 100.0, None).is_none());
        assert_eq!(voices.active_count(), 0);
    }

    #[test]
    fn test_unknown_instrument_is_skipped() {
        let (ctx, _render) = running(8000);
        let mut voices = engine();
        assert!(voices.play_note(&ctx, "theremin", 60, 100.0, None).is_none());
        assert_eq!(voices.active_count(), 0);
    }

    #[test]
    fn test_retrigger_keeps_one_voice_per_key() {
        let (ctx, _render) = running(8000);
        let mut voices = engine();
        voices.play_note(&ctx, "analog_synth", 48, 90.0, None).unwrap();
        voices.play_note(&ctx, "analog_synth", 48, 90.0, None).unwrap();
        assert_eq!(voices.active_count(), 1);
    }

    #[test]
    fn test_stop_note_twice_is_harmless() {
        let (ctx, render) = running(8000);
        let mut voices = engine();
        let key = voices.play_note(&ctx, "analog_synth", 60, 100.0, None).unwrap();
        voices.stop_note(&ctx, &key);
        assert!(!voices.is_active(&key));
        voices.stop_note(&ctx, &key);
        assert_eq!(voices.active_count(), 0);
        render.render_seconds(1.0);
    }

    #[test]
    fn test_drum_voices_end_on_their_own() {
        let (ctx, render) = running(8000);
        let mut voices = engine();
        let key = voices.play_note(&ctx, "drum_kit", 2, 100.0, None).unwrap();
        assert!(voices.is_active(&key));

        render.render_seconds(0.05);
        voices.poll(&ctx.drain_finished());
        assert!(voices.is_active(&key));

        render.render_seconds(0.2);
        voices.poll(&ctx.drain_finished());
        assert!(!voices.is_active(&key), "hi-hat rings for 0.1 s");
    }

    #[test]
    fn test_released_voice_is_reported_finished() {
        let (ctx, render) = running(8000);
        let mut voices = engine();
        let key = voices.play_note(&ctx, "grand_piano", 60, 100.0, Some("bright_piano")).unwrap();
        render.render_seconds(0.2);
        voices.stop_note(&ctx, &key);
        // bright piano releases over 1.6 s
        render.render_seconds(1.7);
        assert_eq!(ctx.drain_finished().len(), 1);
    }

    #[test]
    fn test_drum_note_mapping() {
        assert_eq!(DrumKind::from_note(0), DrumKind::Kick);
        assert_eq!(DrumKind::from_note(9), DrumKind::Snare);
        assert_eq!(DrumKind::from_note(36), DrumKind::Ride);
        assert_eq!(DrumKind::from_note(127), DrumKind::Tom3);
        assert_eq!(DrumKind::from_note(DrumKind::HiHat.note()), DrumKind::HiHat);
    }

    #[test]
    fn test_preset_values_are_clamped() {
        let preset = Preset {
            id: "odd".into(),
            name: "Odd".into(),
            parameters: Default::default(),
        }
        .with("brightness", 400.0)
        .with("attack", -3.0);
        let kind = VoiceKind::from_preset(InstrumentKind::Piano, &preset, 60);
        assert_eq!(
            kind,
            VoiceKind::Piano {
                brightness: 100.0,
                sustain: 60.0,
                attack: 0.0,
                release: 80.0,
            }
        );
    }

    #[test]
    fn test_nan_velocity_still_builds() {
        let (ctx, render) = running(8000);
        let mut voices = engine();
        assert!(voices.play_note(&ctx, "electric_bass", 40, f32::NAN, None).is_some());
        let out = render.render_seconds(0.1);
        assert!(out.iter().all(|s| s.is_finite()));
    }
}
