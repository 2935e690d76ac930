//! The catalog used when the backend cannot be reached.

use std::collections::BTreeMap;

use daw_transport::EffectKind;

use crate::{
    EffectParamSpec, EffectSpec, Instrument, InstrumentKind, Preset, Sample, SamplePack, slug,
};

fn preset(name: &str) -> Preset {
    Preset {
        id: slug(name),
        name: name.to_string(),
        parameters: BTreeMap::new(),
    }
}

fn instrument(
    name: &str,
    kind: InstrumentKind,
    category: &str,
    presets: Vec<Preset>,
) -> Instrument {
    Instrument {
        id: slug(name),
        name: name.to_string(),
        kind,
        category: category.to_string(),
        presets,
        enabled: true,
    }
}

pub fn builtin_instruments() -> Vec<Instrument> {
    vec![
        instrument(
            "Grand Piano",
            InstrumentKind::Piano,
            "Piano",
            vec![
                preset("Bright Piano")
                    .with("brightness", 80.0)
                    .with("sustain", 60.0)
                    .with("attack", 10.0)
                    .with("release", 80.0)
                    .with("reverb", 20.0)
                    .with("velocity_sensitivity", 70.0),
                preset("Warm Piano")
                    .with("brightness", 40.0)
                    .with("sustain", 80.0)
                    .with("attack", 20.0)
                    .with("release", 90.0)
                    .with("reverb", 30.0)
                    .with("velocity_sensitivity", 60.0),
            ],
        ),
        instrument(
            "Analog Synth",
            InstrumentKind::Synth,
            "Synthesizer",
            vec![
                preset("Lead Synth")
                    .with("oscillator_type", "sawtooth")
                    .with("cutoff", 70.0)
                    .with("resonance", 30.0)
                    .with("attack", 10.0)
                    .with("decay", 20.0)
                    .with("sustain", 70.0)
                    .with("release", 40.0),
                preset("Pad Synth")
                    .with("oscillator_type", "square")
                    .with("cutoff", 40.0)
                    .with("resonance", 10.0)
                    .with("attack", 200.0)
                    .with("decay", 100.0)
                    .with("sustain", 80.0)
                    .with("release", 300.0),
            ],
        ),
        instrument(
            "Drum Kit",
            InstrumentKind::Drums,
            "Percussion",
            vec![
                preset("Rock Kit")
                    .with("kick_punch", 80.0)
                    .with("kick_tone", 60.0)
                    .with("snare_crack", 70.0)
                    .with("snare_tone", 50.0),
            ],
        ),
        instrument(
            "Electric Bass",
            InstrumentKind::Bass,
            "Bass",
            vec![
                preset("Finger Bass")
                    .with("tone", 60.0)
                    .with("attack", 40.0)
                    .with("sustain", 80.0)
                    .with("release", 60.0),
            ],
        ),
    ]
}

/// One entry per effect the engine can realise, with schema defaults.
pub fn builtin_effects() -> Vec<EffectSpec> {
    EffectKind::ALL
        .iter()
        .map(|&kind| EffectSpec {
            kind: serde_json::to_value(kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            name: kind.display_name().to_string(),
            enabled: true,
            parameters: kind
                .parameters()
                .iter()
                .map(|p| EffectParamSpec {
                    name: p.name.to_string(),
                    value: p.default,
                    min_value: p.min,
                    max_value: p.max,
                })
                .collect(),
        })
        .collect()
}

fn sample(
    id: &str,
    name: &str,
    kind: &str,
    duration: f64,
    key: Option<&str>,
    tags: &[&str],
) -> Sample {
    Sample {
        id: id.to_string(),
        name: name.to_string(),
        kind: Some(kind.to_string()),
        file_path: None,
        duration,
        key: key.map(str::to_string),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

fn pack(
    id: &str,
    name: &str,
    description: &str,
    genre: &str,
    bpm: u32,
    samples_count: u32,
    samples: Vec<Sample>,
) -> SamplePack {
    SamplePack {
        id: id.to_string(),
        name: name.to_string(),
        description: Some(description.to_string()),
        genre: genre.to_string(),
        bpm,
        samples_count,
        samples,
    }
}

pub fn builtin_sample_packs() -> Vec<SamplePack> {
    vec![
        pack(
            "hip_hop_essentials",
            "Hip Hop Essentials",
            "Essential hip hop drums and samples",
            "Hip Hop",
            90,
            25,
            vec![
                sample("hh_kick_1", "Heavy Kick", "kick", 0.5, Some("C"), &["drum", "kick", "808"]),
                sample("hh_snare_1", "Trap Snare", "snare", 0.3, None, &["drum", "snare", "trap"]),
                sample(
                    "hh_hihat_1",
                    "Closed Hi-Hat",
                    "hihat",
                    0.1,
                    None,
                    &["drum", "hihat", "closed"],
                ),
                sample(
                    "hh_loop_1",
                    "Boom Bap Loop",
                    "loop",
                    4.0,
                    Some("Fm"),
                    &["loop", "boom bap", "vintage"],
                ),
                sample(
                    "hh_bass_1",
                    "808 Bass Hit",
                    "bass",
                    1.5,
                    Some("C"),
                    &["bass", "808", "sub"],
                ),
            ],
        ),
        pack(
            "electronic_vibes",
            "Electronic Vibes",
            "Modern electronic sounds and loops",
            "Electronic",
            128,
            30,
            vec![
                sample(
                    "ev_kick_1",
                    "House Kick",
                    "kick",
                    0.4,
                    Some("C"),
                    &["drum", "kick", "house"],
                ),
                sample(
                    "ev_bass_1",
                    "Acid Bass",
                    "bass",
                    2.0,
                    Some("A"),
                    &["bass", "acid", "synth"],
                ),
                sample(
                    "ev_lead_1",
                    "Pluck Lead",
                    "lead",
                    1.0,
                    Some("E"),
                    &["lead", "pluck", "synth"],
                ),
                sample("ev_pad_1", "Warm Pad", "pad", 4.0, Some("Am"), &["pad", "warm", "ambient"]),
                sample("ev_fx_1", "Riser FX", "fx", 2.0, None, &["fx", "riser", "build-up"]),
            ],
        ),
        pack(
            "lofi_chill",
            "Lo-Fi Chill",
            "Chill lo-fi beats and textures",
            "Lo-Fi",
            85,
            20,
            vec![
                sample(
                    "lf_kick_1",
                    "Soft Kick",
                    "kick",
                    0.6,
                    Some("C"),
                    &["drum", "kick", "soft", "vinyl"],
                ),
                sample(
                    "lf_snare_1",
                    "Dusty Snare",
                    "snare",
                    0.4,
                    None,
                    &["drum", "snare", "dusty"],
                ),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_effect_kind_round_trips_through_its_spec() {
        for (spec, kind) in builtin_effects().iter().zip(EffectKind::ALL) {
            assert_eq!(spec.kind(), Some(kind));
            assert_eq!(spec.parameters.len(), kind.parameters().len());
        }
    }

    #[test]
    fn test_builtin_instruments_cover_every_kind() {
        let instruments = builtin_instruments();
        for kind in [
            InstrumentKind::Piano,
            InstrumentKind::Synth,
            InstrumentKind::Drums,
            InstrumentKind::Bass,
        ] {
            let inst = instruments.iter().find(|i| i.kind == kind).unwrap();
            assert!(!inst.presets.is_empty(), "{} has no presets", inst.name);
        }
    }
}
