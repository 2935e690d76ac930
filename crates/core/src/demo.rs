//! Procedurally generated audio: sample-pack sounds without files behind
//! them, and drum patterns rendered through the instrument voices.

use std::f32::consts::TAU;

use daw_catalog::Sample;
use daw_transport::{AudioArc, TimeContext};
use rand::Rng;

use crate::voices::{DrumKind, VoiceEngine, VoiceKind};

fn key_frequency(key: Option<&str>, table: &[(&str, f32)], fallback: f32) -> f32 {
    key.and_then(|k| table.iter().find(|(name, _)| *name == k))
        .map_or(fallback, |(_, hz)| *hz)
}

/// Synthesise a catalog sample from its type and key. Unknown types give a
/// plain 440 Hz tone.
pub fn generate_sample(sample: &Sample, sample_rate: u32, rng: &mut impl Rng) -> AudioArc {
    let sr = sample_rate as f32;
    let duration = if sample.duration.is_finite() {
        sample.duration.clamp(0.01, 60.0)
    } else {
        1.0
    };
    let len = (duration * sample_rate as f64) as usize;
    let key = sample.key.as_deref();
    let kind = sample.kind.as_deref().unwrap_or("");

    let mut noise = || rng.gen_range(-1.0f32..1.0);
    let sine = |hz: f32, t: f32| (TAU * hz * t).sin();

    let samples = (0..len)
        .map(|i| {
            let t = i as f32 / sr;
            match kind {
                "kick" => sine(60.0 * (-t * 10.0).exp(), t) * (-t * 8.0).exp() * 0.8,
                "snare" => (noise() * 0.3 + sine(200.0, t) * 0.2) * (-t * 15.0).exp(),
                "hihat" => noise() * (1.0 - (-t * 1000.0).exp()) * (-t * 30.0).exp() * 0.4,
                "bass" => {
                    let hz = key_frequency(key, &[("C", 65.41), ("F", 87.31), ("A", 110.0)], 65.41);
                    (sine(hz, t) + sine(hz * 2.0, t) * 0.3) * (-t * 2.0).exp() * 0.6
                }
                "lead" => {
                    let hz = key_frequency(key, &[("E", 329.63)], 440.0);
                    let attack = if t < 0.1 { t * 10.0 } else { 1.0 };
                    let vibrato = sine(5.0, t) * 0.1 + 1.0;
                    sine(hz * vibrato, t) * attack * 0.4
                }
                "pad" => {
                    let attack = if t < 0.5 { t * 2.0 } else { 1.0 };
                    let signal = sine(220.0, t) * 0.5 + sine(330.0, t) * 0.3 + sine(440.0, t) * 0.2;
                    signal * attack * 0.3
                }
                "piano" => {
                    let hz = 261.63;
                    let signal =
                        sine(hz, t) * 0.6 + sine(hz * 2.0, t) * 0.3 + sine(hz * 3.0, t) * 0.1;
                    signal * (-t * 1.5).exp() * 0.5
                }
                "texture" | "drone" => {
                    let signal = sine(80.0, t) * 0.3 + sine(120.0, t) * 0.2 + sine(160.0, t) * 0.1;
                    (signal + noise() * 0.05) * 0.2
                }
                "fx" => {
                    let progress = t / duration as f32;
                    let riser = noise() * progress + sine(100.0 + 2000.0 * progress, t) * 0.3;
                    riser * progress * 0.4
                }
                _ => sine(440.0, t) * 0.3,
            }
        })
        .collect();
    AudioArc::mono(samples, sample_rate)
}

/// A step in a drum pattern: sixteenth index within the bar and the drum.
type Step = (u32, DrumKind);

const BACKBEAT: &[Step] = &[
    (0, DrumKind::Kick),
    (8, DrumKind::Kick),
    (10, DrumKind::Kick),
    (4, DrumKind::Snare),
    (12, DrumKind::Snare),
    (0, DrumKind::HiHat),
    (2, DrumKind::HiHat),
    (4, DrumKind::HiHat),
    (6, DrumKind::HiHat),
    (8, DrumKind::HiHat),
    (10, DrumKind::HiHat),
    (12, DrumKind::HiHat),
    (14, DrumKind::HiHat),
];

/// Render `bars` bars of a rock backbeat at the given tempo. The first bar
/// opens with a crash.
pub fn drum_pattern(
    voices: &mut VoiceEngine,
    time: &TimeContext,
    bars: u32,
    sample_rate: u32,
) -> AudioArc {
    let bar = time.seconds_per_bar();
    let step = time.grid_step();
    let tail = 1.5;
    let len = ((bar * bars as f64 + tail) * sample_rate as f64) as usize;
    let mut out = vec![0.0; len];

    let mut hits: Vec<(f64, DrumKind)> = (0..bars)
        .flat_map(|b| {
            BACKBEAT
                .iter()
                .filter(move |(sixteenth, _)| (*sixteenth as f64) * step < bar)
                .map(move |(sixteenth, drum)| (b as f64 * bar + *sixteenth as f64 * step, *drum))
        })
        .collect();
    if bars > 0 {
        hits.push((0.0, DrumKind::Crash));
    }

    for (at, drum) in hits {
        let first = (at * sample_rate as f64) as usize;
        let Some(window) = out.get_mut(first..) else {
            continue;
        };
        let kind = VoiceKind::Drum(drum);
        voices.render_note(&kind, drum.note(), 110.0, 0.0, window, sample_rate);
    }
    AudioArc::mono(out, sample_rate)
}
