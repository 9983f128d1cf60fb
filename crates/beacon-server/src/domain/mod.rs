//! Domain layer: configuration types shared by the CLI, the accept loop,
//! and the watcher.

pub mod config;

pub use config::{ConfigError, ServerConfig, TlsFiles};
