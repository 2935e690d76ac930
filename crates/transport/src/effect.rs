use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectId(pub u64);

/// Every effect the chain builder knows how to realise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Eq,
    Compressor,
    Reverb,
    Delay,
    Chorus,
    Distortion,
    Autotune,
    Filter,
    Gate,
}

/// Static description of one effect parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: f32,
    pub min: f32,
    pub max: f32,
    pub unit: &'static str,
}

const fn spec(
    name: &'static str,
    default: f32,
    min: f32,
    max: f32,
    unit: &'static str,
) -> ParamSpec {
    ParamSpec {
        name,
        default,
        min,
        max,
        unit,
    }
}

const EQ: &[ParamSpec] = &[
    spec("low_gain", 0.0, -15.0, 15.0, "dB"),
    spec("low_freq", 80.0, 20.0, 500.0, "Hz"),
    spec("mid_gain", 0.0, -15.0, 15.0, "dB"),
    spec("mid_freq", 1000.0, 200.0, 8000.0, "Hz"),
    spec("mid_q", 1.0, 0.1, 10.0, "Q"),
    spec("high_gain", 0.0, -15.0, 15.0, "dB"),
    spec("high_freq", 8000.0, 2000.0, 20000.0, "Hz"),
];

const COMPRESSOR: &[ParamSpec] = &[
    spec("threshold", -10.0, -40.0, 0.0, "dB"),
    spec("ratio", 3.0, 1.0, 20.0, ":1"),
    spec("attack", 3.0, 0.1, 100.0, "ms"),
    spec("release", 100.0, 10.0, 1000.0, "ms"),
    spec("knee", 2.0, 0.0, 40.0, "dB"),
    spec("makeup_gain", 0.0, -20.0, 20.0, "dB"),
];

const REVERB: &[ParamSpec] = &[
    spec("room_size", 30.0, 0.0, 100.0, "%"),
    spec("dampening", 50.0, 0.0, 100.0, "%"),
    spec("wet_dry", 30.0, 0.0, 100.0, "%"),
    spec("pre_delay", 20.0, 0.0, 100.0, "ms"),
];

const DELAY: &[ParamSpec] = &[
    spec("time", 250.0, 10.0, 2000.0, "ms"),
    spec("feedback", 40.0, 0.0, 90.0, "%"),
    spec("wet_dry", 25.0, 0.0, 100.0, "%"),
    spec("stereo_spread", 0.0, -100.0, 100.0, "%"),
];

const CHORUS: &[ParamSpec] = &[
    spec("rate", 1.0, 0.1, 10.0, "Hz"),
    spec("depth", 50.0, 0.0, 100.0, "%"),
    spec("wet_dry", 50.0, 0.0, 100.0, "%"),
    spec("feedback", 0.0, -100.0, 100.0, "%"),
];

const DISTORTION: &[ParamSpec] = &[
    spec("drive", 30.0, 0.0, 100.0, "%"),
    spec("tone", 50.0, 0.0, 100.0, "%"),
    spec("level", 75.0, 0.0, 100.0, "%"),
    // 0 = soft, 1 = hard, 2 = tube, 3 = digital
    spec("type", 0.0, 0.0, 3.0, "type"),
];

const AUTOTUNE: &[ParamSpec] = &[
    spec("correction", 50.0, 0.0, 100.0, "%"),
    spec("speed", 50.0, 0.0, 100.0, "%"),
    spec("key", 0.0, -12.0, 12.0, "semitones"),
];

const FILTER: &[ParamSpec] = &[
    spec("cutoff", 1000.0, 20.0, 20000.0, "Hz"),
    spec("resonance", 1.0, 0.1, 30.0, "Q"),
    // 0 = lowpass, 1 = highpass, 2 = bandpass, 3 = notch
    spec("type", 0.0, 0.0, 3.0, "type"),
    spec("slope", 2.0, 1.0, 4.0, "poles"),
];

const GATE: &[ParamSpec] = &[
    spec("threshold", -40.0, -80.0, 0.0, "dB"),
    spec("ratio", 10.0, 2.0, 100.0, ":1"),
    spec("attack", 0.1, 0.01, 10.0, "ms"),
    spec("hold", 10.0, 0.0, 1000.0, "ms"),
    spec("release", 100.0, 10.0, 5000.0, "ms"),
];

impl EffectKind {
    pub const ALL: [EffectKind; 9] = [
        EffectKind::Eq,
        EffectKind::Compressor,
        EffectKind::Reverb,
        EffectKind::Delay,
        EffectKind::Chorus,
        EffectKind::Distortion,
        EffectKind::Autotune,
        EffectKind::Filter,
        EffectKind::Gate,
    ];

    /// Parameter schema, in the order processors index them.
    pub fn parameters(self) -> &'static [ParamSpec] {
        match self {
            EffectKind::Eq => EQ,
            EffectKind::Compressor => COMPRESSOR,
            EffectKind::Reverb => REVERB,
            EffectKind::Delay => DELAY,
            EffectKind::Chorus => CHORUS,
            EffectKind::Distortion => DISTORTION,
            EffectKind::Autotune => AUTOTUNE,
            EffectKind::Filter => FILTER,
            EffectKind::Gate => GATE,
        }
    }

    pub fn param_index(self, name: &str) -> Option<usize> {
        self.parameters().iter().position(|p| p.name == name)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            EffectKind::Eq => "Parametric EQ",
            EffectKind::Compressor => "Compressor",
            EffectKind::Reverb => "Reverb",
            EffectKind::Delay => "Delay",
            EffectKind::Chorus => "Chorus",
            EffectKind::Distortion => "Distortion",
            EffectKind::Autotune => "Auto-Tune",
            EffectKind::Filter => "Filter",
            EffectKind::Gate => "Noise Gate",
        }
    }

    pub fn category(self) -> &'static str {
        match self {
            EffectKind::Eq | EffectKind::Filter => "Filter",
            EffectKind::Compressor | EffectKind::Gate => "Dynamics",
            EffectKind::Reverb | EffectKind::Delay => "Spatial",
            EffectKind::Chorus => "Modulation",
            EffectKind::Distortion => "Drive",
            EffectKind::Autotune => "Pitch Correction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectParam {
    pub name: String,
    pub value: f32,
    pub min: f32,
    pub max: f32,
    #[serde(default)]
    pub default: f32,
    pub unit: String,
}

impl EffectParam {
    /// Clamp into `[min, max]`; non-finite values fall back to the default.
    pub fn clamp(&self, value: f32) -> f32 {
        let value = if value.is_finite() { value } else { self.default };
        value.clamp(self.min, self.max)
    }
}

impl From<&ParamSpec> for EffectParam {
    fn from(spec: &ParamSpec) -> Self {
        Self {
            name: spec.name.to_string(),
            value: spec.default,
            min: spec.min,
            max: spec.max,
            default: spec.default,
            unit: spec.unit.to_string(),
        }
    }
}

/// One effect declared on a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectInstance {
    pub id: EffectId,
    pub kind: EffectKind,
    pub enabled: bool,
    pub params: Vec<EffectParam>,
}

impl EffectInstance {
    /// An enabled instance carrying the schema defaults.
    pub fn new(id: EffectId, kind: EffectKind) -> Self {
        Self {
            id,
            kind,
            enabled: true,
            params: kind.parameters().iter().map(EffectParam::from).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.params.iter().find(|p| p.name == name).map(|p| p.value)
    }

    /// Store a clamped value and return what was stored.
    pub fn set(&mut self, name: &str, value: f32) -> Option<f32> {
        let param = self.params.iter_mut().find(|p| p.name == name)?;
        param.value = param.clamp(value);
        Some(param.value)
    }

    /// Values in schema order; parameters missing from the instance use
    /// schema defaults and every value is clamped to the schema range.
    pub fn schema_values(&self) -> Vec<f32> {
        self.kind
            .parameters()
            .iter()
            .map(|spec| {
                let value = self.get(spec.name).unwrap_or(spec.default);
                if value.is_finite() {
                    value.clamp(spec.min, spec.max)
                } else {
                    spec.default
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_lie_within_ranges() {
        for kind in EffectKind::ALL {
            for spec in kind.parameters() {
                assert!(
                    spec.min <= spec.default && spec.default <= spec.max,
                    "{kind:?}.{} default out of range",
                    spec.name
                );
            }
        }
    }

    #[test]
    fn test_set_clamps_to_bounds() {
        let mut delay = EffectInstance::new(EffectId(1), EffectKind::Delay);
        assert_eq!(delay.set("feedback", 55.0), Some(55.0));
        assert_eq!(delay.get("feedback"), Some(55.0));
        assert_eq!(delay.set("feedback", 150.0), Some(90.0));
        assert_eq!(delay.set("time", -3.0), Some(10.0));
        assert_eq!(delay.set("nonexistent", 1.0), None);
    }

    #[test]
    fn test_non_finite_value_falls_back_to_default() {
        let mut delay = EffectInstance::new(EffectId(1), EffectKind::Delay);
        delay.set("feedback", 70.0);
        assert_eq!(delay.set("feedback", f32::NAN), Some(40.0));
        assert_eq!(delay.set("time", f32::INFINITY), Some(250.0));
    }

    #[test]
    fn test_schema_values_fill_missing() {
        let mut reverb = EffectInstance::new(EffectId(2), EffectKind::Reverb);
        reverb.params.retain(|p| p.name != "dampening");
        let values = reverb.schema_values();
        assert_eq!(values.len(), 4);
        assert_eq!(values[1], 50.0);
    }

    #[test]
    fn test_instance_serializes_with_snake_case_kind() {
        let gate = EffectInstance::new(EffectId(7), EffectKind::Gate);
        let json = serde_json::to_value(&gate).unwrap();
        assert_eq!(json["kind"], "gate");
        assert_eq!(json["params"][0]["name"], "threshold");

        let back: EffectInstance = serde_json::from_value(json).unwrap();
        assert_eq!(back, gate);
    }
}
