//! Error types for configuration and session files.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading, saving or validating configuration and sessions.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create directory
    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        /// Path of the directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Failed to parse or serialize JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File extension is neither `.toml` nor `.json`
    #[error("unsupported session format '{0}' (expected .toml or .json)")]
    UnsupportedFormat(String),

    /// Session written by a newer version
    #[error("session version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version recorded in the file.
        found: u32,
        /// Highest version this build reads.
        supported: u32,
    },

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Out-of-range or inconsistent setting
    #[error("invalid value for '{field}': {reason}")]
    Invalid {
        /// Dotted key of the offending setting.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A session refers to a processor kind the registry does not know
    #[error("unknown processor '{kind}' at {location}")]
    UnknownProcessor {
        /// Registry id from the session.
        kind: String,
        /// Where in the session it appears.
        location: String,
    },

    /// The engine refused the session
    #[error("failed to apply session: {0}")]
    Engine(#[from] patchbay_core::EngineError),
}

impl ConfigError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create a write file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile {
            path: path.into(),
            source,
        }
    }

    /// Create a create directory error.
    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::CreateDir {
            path: path.into(),
            source,
        }
    }

    /// Create a validation error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn mock_io_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotFound, "mock")
    }

    #[test]
    fn read_file_display_names_path() {
        let err = ConfigError::read_file("/a/b.toml", mock_io_err());
        let msg = err.to_string();
        assert!(msg.contains("failed to read file"), "got: {msg}");
        assert!(msg.contains("/a/b.toml"), "got: {msg}");
        assert!(err.source().is_some());
    }

    #[test]
    fn invalid_display() {
        let err = ConfigError::invalid("engine.block_size", "must be > 0");
        assert_eq!(
            err.to_string(),
            "invalid value for 'engine.block_size': must be > 0"
        );
    }

    #[test]
    fn toml_parse_converts() {
        let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: ConfigError = toml_err.into();
        assert!(matches!(err, ConfigError::TomlParse(_)));
    }

    #[test]
    fn version_display() {
        let err = ConfigError::UnsupportedVersion {
            found: 9,
            supported: 1,
        };
        assert!(err.to_string().contains("9"));
    }
}
