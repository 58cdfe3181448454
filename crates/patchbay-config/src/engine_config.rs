//! TOML engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use patchbay_core::{EngineOptions, PanPolicy};

use crate::error::ConfigError;

/// Supported sample-rate range in Hz.
const SAMPLE_RATE_RANGE: (u32, u32) = (8_000, 384_000);

/// Largest block the engine accepts from a config file.
const MAX_BLOCK: usize = 8192;

/// Engine configuration file.
///
/// # TOML Format
///
/// ```toml
/// [engine]
/// sample_rate = 48000
/// block_size = 512
/// max_nodes = 1024
/// midi_capacity = 512
/// event_capacity = 1024
///
/// [scheduler]
/// worker_threads = 2
/// background_compile = true
///
/// [mixer]
/// fade_frames = 1024
/// monitor_dim_db = -20.0
///
/// [mixer.pan]
/// algorithm = "sine_law"
/// law = "minus3_db"
/// ```
///
/// Every table and key is optional; missing values take the defaults above.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Audio format and capacities.
    pub engine: EngineSection,
    /// Worker pool.
    pub scheduler: SchedulerSection,
    /// Fader behaviour.
    pub mixer: MixerSection,
}

/// `[engine]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Maximum frames per cycle.
    pub block_size: usize,
    /// Upper bound on graph nodes.
    pub max_nodes: usize,
    /// Events per MIDI port buffer.
    pub midi_capacity: usize,
    /// Engine event queue capacity.
    pub event_capacity: usize,
}

/// `[scheduler]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Real-time workers besides the callback thread.
    pub worker_threads: usize,
    /// Compile topology changes on a background thread.
    pub background_compile: bool,
}

/// `[mixer]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerSection {
    /// Mute fade and send ramp length in frames.
    pub fade_frames: usize,
    /// Master attenuation while a track is listened.
    pub monitor_dim_db: f32,
    /// Balance curve and centre law.
    pub pan: PanPolicy,
}

impl Default for EngineSection {
    fn default() -> Self {
        let opts = EngineOptions::default();
        Self {
            sample_rate: opts.sample_rate as u32,
            block_size: opts.max_block,
            max_nodes: opts.max_nodes,
            midi_capacity: opts.midi_capacity,
            event_capacity: opts.event_capacity,
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        let opts = EngineOptions::default();
        Self {
            worker_threads: opts.worker_threads,
            background_compile: opts.background_compile,
        }
    }
}

impl Default for MixerSection {
    fn default() -> Self {
        let opts = EngineOptions::default();
        Self {
            fade_frames: opts.fade_frames,
            monitor_dim_db: opts.monitor_dim_db,
            pan: opts.pan,
        }
    }
}

impl EngineConfig {
    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml(&content)
    }

    /// Load the user config file, or defaults if there is none.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let path = crate::paths::user_config_file();
        if path.is_file() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Save the config to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
    }

    /// Render the config as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every setting against what the engine can run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.engine;
        let (lo, hi) = SAMPLE_RATE_RANGE;
        if !(lo..=hi).contains(&e.sample_rate) {
            return Err(ConfigError::invalid(
                "engine.sample_rate",
                format!("{} Hz is outside {lo}..={hi}", e.sample_rate),
            ));
        }
        if e.block_size == 0 || e.block_size > MAX_BLOCK {
            return Err(ConfigError::invalid(
                "engine.block_size",
                format!("must be in 1..={MAX_BLOCK}"),
            ));
        }
        // hw_in, Master and Monitor always exist.
        if e.max_nodes < 3 {
            return Err(ConfigError::invalid("engine.max_nodes", "must be at least 3"));
        }
        if e.midi_capacity == 0 {
            return Err(ConfigError::invalid("engine.midi_capacity", "must be > 0"));
        }
        if e.event_capacity == 0 {
            return Err(ConfigError::invalid("engine.event_capacity", "must be > 0"));
        }
        if self.mixer.fade_frames == 0 {
            return Err(ConfigError::invalid("mixer.fade_frames", "must be > 0"));
        }
        let dim = self.mixer.monitor_dim_db;
        if !dim.is_finite() || dim > 0.0 {
            return Err(ConfigError::invalid(
                "mixer.monitor_dim_db",
                "must be a finite value <= 0 dB",
            ));
        }
        Ok(())
    }

    /// Validate and convert into engine options.
    pub fn to_options(&self) -> Result<EngineOptions, ConfigError> {
        self.validate()?;
        Ok(EngineOptions {
            sample_rate: self.engine.sample_rate as f32,
            max_block: self.engine.block_size,
            worker_threads: self.scheduler.worker_threads,
            max_nodes: self.engine.max_nodes,
            background_compile: self.scheduler.background_compile,
            fade_frames: self.mixer.fade_frames,
            midi_capacity: self.engine.midi_capacity,
            event_capacity: self.engine.event_capacity,
            pan: self.mixer.pan,
            monitor_dim_db: self.mixer.monitor_dim_db,
        })
    }
}
