// Engine configuration
// Loaded from RON; every field has a default so partial files are accepted

use crate::sequencer::part::HumanizeSettings;
use crate::sequencer::time::{Tempo, TimeSignature};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Audio sample rate used to convert frames to bars
    pub sample_rate: f64,
    /// Tempo of a fresh session (BPM)
    pub tempo: f64,
    pub time_signature: TimeSignature,
    /// Depth of each undo/redo stack
    pub history_depth: usize,
    /// Upper bound of the humanize delay, in bars
    pub humanize_max_bars: f64,
    pub humanize_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let humanize = HumanizeSettings::default();
        Self {
            sample_rate: 48000.0,
            tempo: Tempo::default().bpm(),
            time_signature: TimeSignature::four_four(),
            history_depth: 100,
            humanize_max_bars: humanize.max_offset,
            humanize_seed: humanize.seed,
        }
    }
}

impl EngineConfig {
    /// Parse a RON document
    pub fn from_ron(ron_data: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(ron_data).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a RON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ron_data = std::fs::read_to_string(path)?;
        Self::from_ron(&ron_data)
    }

    pub fn to_ron(&self) -> Result<String, ConfigError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }

    /// Check ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "sample_rate must be > 0, got {}",
                self.sample_rate
            )));
        }
        if !Tempo::is_valid_bpm(self.tempo) {
            return Err(ConfigError::Invalid(format!(
                "tempo {} is outside {}..={} BPM",
                self.tempo,
                Tempo::MIN_BPM,
                Tempo::MAX_BPM
            )));
        }
        if !TimeSignature::is_valid(self.time_signature.numerator, self.time_signature.denominator)
        {
            return Err(ConfigError::Invalid(format!(
                "invalid time signature {}",
                self.time_signature
            )));
        }
        if !(self.humanize_max_bars.is_finite() && self.humanize_max_bars >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "humanize_max_bars must be >= 0, got {}",
                self.humanize_max_bars
            )));
        }
        Ok(())
    }

    pub fn humanize(&self) -> HumanizeSettings {
        HumanizeSettings {
            max_offset: self.humanize_max_bars,
            seed: self.humanize_seed,
        }
    }
}
