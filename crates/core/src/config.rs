use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Engine tuning, read from `<config dir>/daw/engine.toml`. Every field has
/// a default so a partial file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 0..=100
    pub master_volume: f32,
    /// How often the metronome scheduler wakes, in milliseconds.
    pub lookahead_interval_ms: u64,
    /// How far ahead clicks and clips are scheduled, in milliseconds.
    pub lookahead_horizon_ms: u64,
    /// Per-frame decay factor for displayed meter levels.
    pub meter_decay: f32,
    /// Hold audio until a user gesture, as browsers do.
    pub require_user_gesture: bool,
    pub record_sample_rate: u32,
    pub record_channels: u16,
    /// Gain applied to clip playback.
    pub clip_gain: f32,
    pub metronome_volume: f32,
    pub count_in_beats: u32,
    /// Seconds of extra audio captured after the last clip ends.
    pub export_tail_secs: f64,
    /// Directory with the backend catalog JSON; the built-in catalog is used
    /// when unset or unreadable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_dir: Option<PathBuf>,
    /// Root for relative sample paths.
    pub samples_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            master_volume: 80.0,
            lookahead_interval_ms: 25,
            lookahead_horizon_ms: 150,
            meter_decay: 0.85,
            require_user_gesture: false,
            record_sample_rate: 44100,
            record_channels: 1,
            clip_gain: 0.7,
            metronome_volume: 100.0,
            count_in_beats: 4,
            export_tail_secs: 0.3,
            catalog_dir: None,
            samples_dir: PathBuf::from("samples"),
        }
    }
}

impl EngineConfig {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("daw").join("engine.toml"))
    }

    /// Load the user's config, falling back to defaults when it is missing
    /// or does not parse.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("ignoring {}: {err}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) {
        let Some(path) = Self::config_path() else {
            return;
        };
        if let Err(err) = self.save_to(&path) {
            log::warn!("could not save {}: {err}", path.display());
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn lookahead_interval(&self) -> f64 {
        self.lookahead_interval_ms as f64 / 1000.0
    }

    pub fn lookahead_horizon(&self) -> f64 {
        self.lookahead_horizon_ms as f64 / 1000.0
    }
}
