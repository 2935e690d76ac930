use std::fs;
use std::path::{Path, PathBuf};

use crate::{CatalogError, EffectSpec, Instrument, SamplePack, slug};

/// Where catalog sections come from. Implementations report failures per
/// section; [`crate::Catalog::load`] decides what to fall back to.
pub trait CatalogProvider {
    fn instruments(&self) -> Result<Vec<Instrument>, CatalogError>;
    fn effects(&self) -> Result<Vec<EffectSpec>, CatalogError>;
    fn sample_packs(&self) -> Result<Vec<SamplePack>, CatalogError>;
}

/// Reads backend JSON responses saved as `instruments.json`,
/// `effects.json` and `sample_packs.json` in one directory.
#[derive(Debug, Clone)]
pub struct JsonDirProvider {
    dir: PathBuf,
}

impl JsonDirProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read(&self, file: &str) -> Result<String, CatalogError> {
        let path = self.dir.join(file);
        fs::read_to_string(&path).map_err(|source| CatalogError::Io { path, source })
    }
}

impl CatalogProvider for JsonDirProvider {
    fn instruments(&self) -> Result<Vec<Instrument>, CatalogError> {
        parse_instruments(&self.read("instruments.json")?)
    }

    fn effects(&self) -> Result<Vec<EffectSpec>, CatalogError> {
        parse_effects(&self.read("effects.json")?)
    }

    fn sample_packs(&self) -> Result<Vec<SamplePack>, CatalogError> {
        parse_sample_packs(&self.read("sample_packs.json")?)
    }
}

/// Parse the instrument list. Backend ids are opaque, so instrument and
/// preset ids are always derived from their names.
pub fn parse_instruments(json: &str) -> Result<Vec<Instrument>, CatalogError> {
    let mut instruments: Vec<Instrument> =
        serde_json::from_str(json).map_err(|source| CatalogError::Parse {
            section: "instruments",
            source,
        })?;
    for instrument in &mut instruments {
        instrument.id = slug(&instrument.name);
        for preset in &mut instrument.presets {
            preset.id = slug(&preset.name);
        }
    }
    Ok(instruments)
}

pub fn parse_effects(json: &str) -> Result<Vec<EffectSpec>, CatalogError> {
    serde_json::from_str(json).map_err(|source| CatalogError::Parse {
        section: "effects",
        source,
    })
}

pub fn parse_sample_packs(json: &str) -> Result<Vec<SamplePack>, CatalogError> {
    serde_json::from_str(json).map_err(|source| CatalogError::Parse {
        section: "sample packs",
        source,
    })
}
