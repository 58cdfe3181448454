//! Session files: a named, versioned engine snapshot.

use serde::{Deserialize, Serialize};
use std::path::Path;

use patchbay_core::{Engine, EngineSnapshot, ProcessorRegistry};

use crate::error::ConfigError;

/// Highest session format version this build reads and the one it writes.
pub const SESSION_VERSION: u32 = 1;

/// On-disk encoding of a session, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFormat {
    /// `.toml`
    Toml,
    /// `.json`
    Json,
}

impl SessionFormat {
    /// Pick the format from a path's extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "toml" => Ok(SessionFormat::Toml),
            "json" => Ok(SessionFormat::Json),
            _ => Err(ConfigError::UnsupportedFormat(ext)),
        }
    }
}

/// A saved routing session.
///
/// The snapshot holds intent only: track outputs, sends, stage kinds and
/// parameter values. Loading it into an engine rebuilds the managed routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Display name.
    pub name: String,

    /// Format version the file was written with.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Optional free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Engine state.
    #[serde(default)]
    pub snapshot: EngineSnapshot,
}

fn default_version() -> u32 {
    SESSION_VERSION
}

impl Session {
    /// Create a session around a snapshot.
    pub fn new(name: impl Into<String>, snapshot: EngineSnapshot) -> Self {
        Self {
            name: name.into(),
            version: SESSION_VERSION,
            description: None,
            snapshot,
        }
    }

    /// Capture the current state of `engine`.
    pub fn capture(name: impl Into<String>, engine: &Engine) -> Self {
        Self::new(name, engine.snapshot())
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Load a session, picking TOML or JSON by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = SessionFormat::from_path(path)?;
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::parse(&content, format)
    }

    /// Parse a session and check its version.
    pub fn parse(text: &str, format: SessionFormat) -> Result<Self, ConfigError> {
        let session: Session = match format {
            SessionFormat::Toml => toml::from_str(text)?,
            SessionFormat::Json => serde_json::from_str(text)?,
        };
        if session.version > SESSION_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: session.version,
                supported: SESSION_VERSION,
            });
        }
        Ok(session)
    }

    /// Save the session, picking TOML or JSON by extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let format = SessionFormat::from_path(path)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
        let content = self.render(format)?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
    }

    /// Encode the session.
    pub fn render(&self, format: SessionFormat) -> Result<String, ConfigError> {
        Ok(match format {
            SessionFormat::Toml => toml::to_string_pretty(self)?,
            SessionFormat::Json => serde_json::to_string_pretty(self)?,
        })
    }

    /// Check that every stage and processor kind is known to `registry`.
    pub fn validate(&self, registry: &ProcessorRegistry) -> Result<(), ConfigError> {
        for track in &self.snapshot.tracks {
            for stage in &track.stages {
                if registry.get(&stage.kind).is_none() {
                    return Err(ConfigError::UnknownProcessor {
                        kind: stage.kind.clone(),
                        location: format!("track {} {}", track.id, stage.at),
                    });
                }
            }
        }
        for processor in &self.snapshot.processors {
            if registry.get(&processor.kind).is_none() {
                return Err(ConfigError::UnknownProcessor {
                    kind: processor.kind.clone(),
                    location: format!("processor {}", processor.key),
                });
            }
        }
        Ok(())
    }

    /// Validate against the engine's registry, then restore into it.
    pub fn apply(&self, engine: &mut Engine) -> Result<(), ConfigError> {
        self.validate(engine.registry())?;
        engine.restore(&self.snapshot)?;
        Ok(())
    }

    /// Number of tracks, Master included.
    pub fn track_count(&self) -> usize {
        self.snapshot.tracks.len()
    }
}
