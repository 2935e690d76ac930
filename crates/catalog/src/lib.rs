mod builtin;
mod load;

use std::collections::BTreeMap;
use std::path::PathBuf;

use daw_transport::{EffectId, EffectInstance, EffectKind};
use serde::{Deserialize, Serialize};

pub use builtin::{builtin_effects, builtin_instruments, builtin_sample_packs};
pub use load::{
    CatalogProvider, JsonDirProvider, parse_effects, parse_instruments, parse_sample_packs,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Piano,
    Synth,
    Drums,
    Bass,
}

/// A preset parameter as the backend stores it: numbers for levels,
/// strings for choices such as `oscillator_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PresetValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, PresetValue>,
}

impl Preset {
    /// Numeric parameter, or `default` when absent or not a number.
    pub fn number(&self, name: &str, default: f32) -> f32 {
        match self.parameters.get(name) {
            Some(PresetValue::Number(n)) => *n as f32,
            _ => default,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.parameters.get(name) {
            Some(PresetValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<PresetValue>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }
}

impl From<f64> for PresetValue {
    fn from(value: f64) -> Self {
        PresetValue::Number(value)
    }
}

impl From<&str> for PresetValue {
    fn from(value: &str) -> Self {
        PresetValue::Text(value.to_string())
    }
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: InstrumentKind,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub presets: Vec<Preset>,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

impl Instrument {
    pub fn preset(&self, id: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.id == id)
    }

    /// The first preset; instruments without presets play on defaults.
    pub fn default_preset(&self) -> Preset {
        self.presets.first().cloned().unwrap_or_else(|| Preset {
            id: "default".into(),
            name: "Default".into(),
            parameters: BTreeMap::new(),
        })
    }

    pub fn color(&self) -> &'static str {
        match self.kind {
            InstrumentKind::Piano => "#3b82f6",
            InstrumentKind::Synth => "#8b5cf6",
            InstrumentKind::Drums => "#ef4444",
            InstrumentKind::Bass => "#10b981",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectParamSpec {
    pub name: String,
    pub value: f32,
    #[serde(default)]
    pub min_value: f32,
    #[serde(default = "default_max")]
    pub max_value: f32,
}

fn default_max() -> f32 {
    100.0
}

/// An effect offered by the catalog. `kind` is kept as text so entries for
/// effects this engine cannot realise still load; see [`EffectSpec::kind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub parameters: Vec<EffectParamSpec>,
}

impl EffectSpec {
    pub fn kind(&self) -> Option<EffectKind> {
        serde_json::from_value(serde_json::Value::String(self.kind.clone())).ok()
    }

    /// A fresh instance with the catalog's parameter values applied on top
    /// of the schema defaults. Values are clamped to the schema ranges.
    pub fn instantiate(&self, id: EffectId) -> Option<EffectInstance> {
        let mut instance = EffectInstance::new(id, self.kind()?);
        for param in &self.parameters {
            if instance.set(&param.name, param.value).is_none() {
                log::debug!("{}: ignoring unknown parameter {}", self.kind, param.name);
            }
        }
        Some(instance)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    pub duration: f64,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePack {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub genre: String,
    pub bpm: u32,
    #[serde(default)]
    pub samples_count: u32,
    #[serde(default)]
    pub samples: Vec<Sample>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {section}: {source}")]
    Parse {
        section: &'static str,
        source: serde_json::Error,
    },

    #[error("{0} section is empty")]
    Empty(&'static str),
}

/// `"Grand Piano"` -> `"grand_piano"`.
pub fn slug(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

/// Everything the engine can offer: instruments, effects and sample packs.
/// `offline` is set when any section came from the built-in fallback.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub instruments: Vec<Instrument>,
    pub effects: Vec<EffectSpec>,
    pub sample_packs: Vec<SamplePack>,
    pub offline: bool,
}

impl Catalog {
    pub fn builtin() -> Self {
        Self {
            instruments: builtin_instruments(),
            effects: builtin_effects(),
            sample_packs: builtin_sample_packs(),
            offline: true,
        }
    }

    /// Load each section from `provider`, substituting the built-in section
    /// for any that fails or comes back empty.
    pub fn load(provider: &dyn CatalogProvider) -> Self {
        let mut offline = false;

        let instruments =
            section("instruments", provider.instruments(), &mut offline, builtin_instruments);
        let effects = section("effects", provider.effects(), &mut offline, builtin_effects);
        let sample_packs =
            section("sample packs", provider.sample_packs(), &mut offline, builtin_sample_packs);

        if offline {
            log::warn!("using offline catalog for at least one section");
        }
        Self {
            instruments,
            effects,
            sample_packs,
            offline,
        }
    }

    pub fn instrument(&self, id: &str) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.id == id && i.enabled)
    }

    pub fn effect(&self, kind: EffectKind) -> Option<&EffectSpec> {
        self.effects.iter().find(|e| e.kind() == Some(kind))
    }

    pub fn sample_pack(&self, id: &str) -> Option<&SamplePack> {
        self.sample_packs.iter().find(|p| p.id == id)
    }

    pub fn sample(&self, id: &str) -> Option<(&SamplePack, &Sample)> {
        self.sample_packs
            .iter()
            .find_map(|pack| pack.samples.iter().find(|s| s.id == id).map(|s| (pack, s)))
    }
}

fn section<T>(
    name: &'static str,
    loaded: Result<Vec<T>, CatalogError>,
    offline: &mut bool,
    fallback: fn() -> Vec<T>,
) -> Vec<T> {
    match loaded {
        Ok(items) if !items.is_empty() => items,
        Ok(_) => {
            log::warn!("{name}: {}", CatalogError::Empty(name));
            *offline = true;
            fallback()
        }
        Err(err) => {
            log::warn!("{name}: {err}");
            *offline = true;
            fallback()
        }
    }
}
