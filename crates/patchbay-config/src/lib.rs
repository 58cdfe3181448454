//! Configuration and session files for patchbay.
//!
//! # Features
//!
//! - **Engine config**: `[engine]`, `[scheduler]` and `[mixer]` TOML tables
//!   that validate into [`patchbay_core::EngineOptions`]
//! - **Sessions**: a named, versioned [`EngineSnapshot`] saved as TOML or JSON
//! - **Paths**: platform config and session directories
//!
//! # Example
//!
//! ```rust,no_run
//! use patchbay_config::{EngineConfig, Session};
//! use patchbay_core::Engine;
//!
//! let config = EngineConfig::load("patchbay.toml").unwrap();
//! let mut engine = Engine::new(config.to_options().unwrap()).unwrap();
//!
//! let session = Session::load("song.toml").unwrap();
//! session.apply(&mut engine).unwrap();
//! ```

mod engine_config;
mod error;
mod session;

/// Platform-specific paths for configuration and sessions.
pub mod paths;

pub use engine_config::{EngineConfig, EngineSection, MixerSection, SchedulerSection};
pub use error::ConfigError;
pub use paths::{
    ensure_user_config_dir, ensure_user_sessions_dir, find_session, list_sessions,
    session_name_from_path, user_config_dir, user_config_file, user_sessions_dir,
};
pub use session::{SESSION_VERSION, Session, SessionFormat};

/// Snapshot types persisted by [`Session`].
pub use patchbay_core::EngineSnapshot;
