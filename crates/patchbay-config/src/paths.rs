//! Platform-specific paths for configuration and sessions.
//!
//! # Directory Structure
//!
//! - **User config**: `~/.config/patchbay/` (Linux), `~/Library/Application Support/patchbay/` (macOS), `%APPDATA%\patchbay\` (Windows)
//! - **Config file**: `<user config>/patchbay.toml`
//! - **Sessions**: `<user config>/sessions/`

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Application name used for directory paths.
const APP_NAME: &str = "patchbay";

/// Subdirectory name for sessions.
const SESSIONS_SUBDIR: &str = "sessions";

/// Engine config file name.
const CONFIG_FILE: &str = "patchbay.toml";

/// Session file extensions, in lookup order.
const SESSION_EXTENSIONS: [&str; 2] = ["toml", "json"];

/// Returns the user-specific configuration directory.
///
/// Returns a fallback path if the config directory cannot be determined.
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Returns the path of the user engine config file.
pub fn user_config_file() -> PathBuf {
    user_config_dir().join(CONFIG_FILE)
}

/// Returns the user-specific sessions directory.
pub fn user_sessions_dir() -> PathBuf {
    user_config_dir().join(SESSIONS_SUBDIR)
}

/// Ensure the user config directory exists.
pub fn ensure_user_config_dir() -> Result<PathBuf, ConfigError> {
    ensure_dir(user_config_dir())
}

/// Ensure the user sessions directory exists.
pub fn ensure_user_sessions_dir() -> Result<PathBuf, ConfigError> {
    ensure_dir(user_sessions_dir())
}

fn ensure_dir(dir: PathBuf) -> Result<PathBuf, ConfigError> {
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| ConfigError::create_dir(&dir, e))?;
    }
    Ok(dir)
}

/// Find a session file by path or by name.
///
/// A name without an extension is looked up as `.toml` then `.json` in the
/// user sessions directory.
pub fn find_session(name: &str) -> Option<PathBuf> {
    find_session_in(name, &user_sessions_dir())
}

fn find_session_in(name: &str, dir: &Path) -> Option<PathBuf> {
    let path = PathBuf::from(name);
    if path.is_file() {
        return Some(path);
    }
    if path.extension().is_some() {
        let candidate = dir.join(name);
        return candidate.is_file().then_some(candidate);
    }
    SESSION_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{name}.{ext}")))
        .find(|p| p.is_file())
}

/// List session files in the user sessions directory.
pub fn list_sessions() -> Vec<PathBuf> {
    list_sessions_in(&user_sessions_dir())
}

fn list_sessions_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut sessions: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| SESSION_EXTENSIONS.contains(&ext))
        })
        .collect();
    sessions.sort();
    sessions
}

/// Session name from a file path (the file stem).
pub fn session_name_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}
