//! Server configuration.
//!
//! [`ServerConfig`] is the single source of truth for all runtime settings.
//! It can be loaded from a TOML file, populated from CLI arguments, or
//! built from defaults that mirror the classic dev-server conventions:
//! port 3000, `index.html`, serve the current directory, live reload on.
//!
//! Fields use `#[serde(default = "...")]` so a partial TOML file (or one
//! written for an older version) still produces a complete config.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The bind address + port do not form a valid socket address.
    #[error("invalid bind address: {0:?}")]
    InvalidBindAddress(String),
}

// Serde default helpers.  Free functions because `#[serde(default = "...")]`
// takes a path, not an expression.
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_index_file() -> String {
    "index.html".to_string()
}
fn default_true() -> bool {
    true
}
fn default_watch_poll_ms() -> u64 {
    200
}
fn default_watch_debounce_ms() -> u64 {
    100
}

/// TLS certificate and key file paths (PEM).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsFiles {
    /// Certificate chain file.
    pub cert_path: PathBuf,
    /// Private key file.
    pub key_path: PathBuf,
}

/// All runtime configuration for the server.
///
/// Build once at startup and share via `Arc` across connection tasks and
/// the watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind the listener to.  `0.0.0.0` accepts connections
    /// from any interface; use `127.0.0.1` for local-only serving.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory static assets are served from.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// File served for directory requests (and as the SPA fallback).
    #[serde(default = "default_index_file")]
    pub index_file: String,

    /// Serve the index file for unknown paths (push-state routing).
    #[serde(default)]
    pub spa: bool,

    /// Inject the reload snippet into HTML and watch `root` for changes.
    #[serde(default = "default_true")]
    pub live_reload: bool,

    /// Suppress per-request log lines.
    #[serde(default)]
    pub quiet: bool,

    /// How often the watcher rescans `root`, in milliseconds.
    #[serde(default = "default_watch_poll_ms")]
    pub watch_poll_ms: u64,

    /// How long the watcher coalesces changes before broadcasting, in
    /// milliseconds.
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,

    /// TLS file paths; `None` serves plain HTTP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsFiles>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            root: default_root(),
            index_file: default_index_file(),
            spa: false,
            live_reload: true,
            quiet: false,
            watch_poll_ms: default_watch_poll_ms(),
            watch_debounce_ms: default_watch_debounce_ms(),
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Loads a config from a TOML file.  Missing fields take their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// The socket address the listener binds to.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] when `bind_address` is
    /// not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let joined = format!("{}:{}", self.bind_address, self.port);
        joined
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(joined))
    }

    /// Watcher rescan interval.
    pub fn watch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.watch_poll_ms)
    }

    /// Watcher change-coalescing window.
    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_port_is_3000() {
        assert_eq!(ServerConfig::default().port, 3000);
    }

    #[test]
    fn test_default_index_file() {
        assert_eq!(ServerConfig::default().index_file, "index.html");
    }

    #[test]
    fn test_default_live_reload_is_on() {
        let cfg = ServerConfig::default();
        assert!(cfg.live_reload);
        assert!(!cfg.spa);
        assert!(!cfg.quiet);
        assert!(cfg.tls.is_none());
    }

    #[test]
    fn test_bind_addr_combines_address_and_port() {
        let cfg = ServerConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_addr().unwrap().to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_bind_addr_rejects_hostname() {
        let cfg = ServerConfig {
            bind_address: "not an ip".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            cfg.bind_addr(),
            Err(ConfigError::InvalidBindAddress(_))
        ));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: ServerConfig = toml::from_str("port = 4000\nspa = true\n").unwrap();
        assert_eq!(cfg.port, 4000);
        assert!(cfg.spa);
        assert_eq!(cfg.index_file, "index.html");
        assert!(cfg.live_reload);
        assert_eq!(cfg.watch_poll_ms, 200);
    }

    #[test]
    fn test_toml_with_tls_section() {
        let cfg: ServerConfig = toml::from_str(
            "port = 443\n\n[tls]\ncert_path = \"cert.pem\"\nkey_path = \"key.pem\"\n",
        )
        .unwrap();
        let tls = cfg.tls.expect("tls section must parse");
        assert_eq!(tls.cert_path, PathBuf::from("cert.pem"));
        assert_eq!(tls.key_path, PathBuf::from("key.pem"));
    }

    #[test]
    fn test_load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 9000\nquiet = true").unwrap();

        let cfg = ServerConfig::load(file.path()).unwrap();
        assert_eq!(cfg.port, 9000);
        assert!(cfg.quiet);
    }

    #[test]
    fn test_load_missing_file_is_an_io_error() {
        let result = ServerConfig::load(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_watch_intervals_convert_to_durations() {
        let cfg = ServerConfig {
            watch_poll_ms: 250,
            watch_debounce_ms: 50,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.watch_poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.watch_debounce(), Duration::from_millis(50));
    }
}
