//! CLI command implementations.

pub mod common;
pub mod graph;
pub mod info;
pub mod init;
pub mod render;
