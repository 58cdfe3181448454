//! Shared helpers for loading configs and sessions.

use std::path::{Path, PathBuf};

use anyhow::Context;
use patchbay_config::{EngineConfig, Session, find_session};
use patchbay_core::{Engine, EngineOptions};

/// Load `path`, or the user config file, or defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(EngineConfig::load_or_default()?),
    }
}

/// Resolve a session argument (path or name in the sessions directory).
pub fn resolve_session(name: &str) -> anyhow::Result<PathBuf> {
    find_session(name).ok_or_else(|| anyhow::anyhow!("Session not found: {name}"))
}

/// Load a session by path or name.
pub fn load_session(name: &str) -> anyhow::Result<(Session, PathBuf)> {
    let path = resolve_session(name)?;
    let session =
        Session::load(&path).with_context(|| format!("loading session {}", path.display()))?;
    Ok((session, path))
}

/// Engine options for offline work: inline compile, the config's workers.
pub fn offline_options(config: &EngineConfig, block_size: Option<usize>) -> anyhow::Result<EngineOptions> {
    let mut config = config.clone();
    if let Some(block) = block_size {
        config.engine.block_size = block;
    }
    let options = config.to_options()?;
    Ok(EngineOptions {
        background_compile: false,
        ..options
    })
}

/// Build an engine and load `session` into it.
pub fn session_engine(options: EngineOptions, session: &Session) -> anyhow::Result<Engine> {
    let mut engine = Engine::new(options)?;
    session
        .apply(&mut engine)
        .with_context(|| format!("applying session '{}'", session.name))?;
    engine.flush();
    Ok(engine)
}

/// Linear amplitude in dBFS, floored at -120.
pub fn db(linear: f32) -> f32 {
    if linear <= 0.0 {
        -120.0
    } else {
        patchbay_core::linear_to_db(linear).max(-120.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_floor() {
        assert_eq!(db(0.0), -120.0);
        assert!((db(1.0)).abs() < 1e-4);
        assert!((db(0.5) + 6.02).abs() < 0.01);
    }

    #[test]
    fn block_override() {
        let options = offline_options(&EngineConfig::default(), Some(64)).unwrap();
        assert_eq!(options.max_block, 64);
        assert!(!options.background_compile);
        assert!(offline_options(&EngineConfig::default(), Some(0)).is_err());
    }
}
