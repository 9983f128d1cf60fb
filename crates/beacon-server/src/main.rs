//! beacon — a live-reload static dev server.
//!
//! Serves a directory over HTTP (optionally HTTPS), injects a WebSocket
//! client snippet into served HTML, watches the directory for changes, and
//! pushes `reload` / `updatecss` to every connected page over the
//! from-scratch WebSocket engine in `beacon-core`.
//!
//! # Usage
//!
//! ```text
//! beacon-server [OPTIONS]
//!
//! Options:
//!   -p, --port <PORT>      Port to listen on [default: 3000]
//!       --bind <ADDR>      Address to bind [default: 0.0.0.0]
//!   -r, --root <DIR>       Directory to serve [default: .]
//!   -f, --file <NAME>      Index file [default: index.html]
//!       --spa              Serve the index file for unknown paths
//!       --no-reload        Disable live reloading
//!   -q, --quiet            Suppress per-request log lines
//!       --config <TOML>    Load settings from a TOML file
//!       --tls-cert <PEM>   TLS certificate chain (requires --tls-key)
//!       --tls-key <PEM>    TLS private key (requires --tls-cert)
//! ```
//!
//! Explicit CLI flags override config-file values, which override defaults.
//! The log level follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use beacon_core::{ConnectionRegistry, WsEvent};
use beacon_server::application::live_reload::run_live_reload;
use beacon_server::application::EndpointTable;
use beacon_server::domain::{ServerConfig, TlsFiles};
use beacon_server::infrastructure::http::Response;
use beacon_server::infrastructure::{run_server, ServerContext};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Live-reload static dev server.
#[derive(Debug, Parser)]
#[command(
    name = "beacon-server",
    about = "Serve a directory with live reload over a built-in WebSocket channel",
    version
)]
struct Cli {
    /// TCP port to listen on.
    #[arg(short, long, env = "BEACON_PORT")]
    port: Option<u16>,

    /// IP address to bind.  `0.0.0.0` accepts connections from any
    /// interface; `127.0.0.1` restricts to this machine.
    #[arg(long, env = "BEACON_BIND")]
    bind: Option<String>,

    /// Directory to serve static assets from.
    #[arg(short, long, env = "BEACON_ROOT")]
    root: Option<PathBuf>,

    /// File served for directory requests and as the SPA fallback.
    #[arg(short, long, env = "BEACON_FILE")]
    file: Option<String>,

    /// Serve the index file for unknown paths (push-state routing).
    #[arg(long)]
    spa: bool,

    /// Disable live reloading (no snippet injection, no watcher, no
    /// WebSocket upgrades).
    #[arg(long)]
    no_reload: bool,

    /// Suppress per-request log lines.
    #[arg(short, long)]
    quiet: bool,

    /// TOML config file; CLI flags override its values.
    #[arg(long, env = "BEACON_CONFIG")]
    config: Option<PathBuf>,

    /// TLS certificate chain file (PEM).
    #[arg(long, requires = "tls_key", env = "BEACON_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// TLS private key file (PEM).
    #[arg(long, requires = "tls_cert", env = "BEACON_TLS_KEY")]
    tls_key: Option<PathBuf>,
}

impl Cli {
    /// Builds the effective config: defaults, then the config file, then
    /// explicit CLI flags.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(root) = self.root {
            config.root = root;
        }
        if let Some(file) = self.file {
            config.index_file = file;
        }
        if self.spa {
            config.spa = true;
        }
        if self.no_reload {
            config.live_reload = false;
        }
        if self.quiet {
            config.quiet = true;
        }
        if let (Some(cert_path), Some(key_path)) = (self.tls_cert, self.tls_key) {
            config.tls = Some(TlsFiles {
                cert_path,
                key_path,
            });
        }

        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Log level from RUST_LOG, defaulting to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.into_server_config()?;

    let (registry, mut events) = ConnectionRegistry::new();

    // Registry event drain: keeps the live connection counter for the
    // status endpoint and logs traffic the dev server itself ignores.
    let connection_count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connection_count);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                WsEvent::Connected(handle) => {
                    counter.fetch_add(1, Ordering::Relaxed);
                    debug!("live-reload client connected: {}", handle.id());
                }
                WsEvent::Disconnected { connection_id } => {
                    counter.fetch_sub(1, Ordering::Relaxed);
                    debug!("live-reload client disconnected: {connection_id}");
                }
                WsEvent::Message {
                    connection_id,
                    message,
                } => {
                    // The reload channel is one-way; inbound chatter is only
                    // interesting for debugging.
                    debug!("ignoring message from {connection_id}: {message:?}");
                }
                WsEvent::Pong {
                    connection_id,
                    payload,
                } => {
                    debug!(
                        "pong from {connection_id} ({} payload bytes)",
                        payload.len()
                    );
                }
            }
        }
    });

    // Built-in status endpoint.
    let mut endpoints = EndpointTable::new();
    let status_count = Arc::clone(&connection_count);
    endpoints.get("/__beacon/status", move |_, _| {
        let body = serde_json::json!({
            "name": "beacon-server",
            "version": env!("CARGO_PKG_VERSION"),
            "connections": status_count.load(Ordering::Relaxed),
        });
        Response::new(200).with_body("application/json", body.to_string().into_bytes())
    });

    // Graceful shutdown: Ctrl+C clears the flag, the accept loop and the
    // watcher poll it.
    let running = Arc::new(AtomicBool::new(true));
    let running_signal = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C — shutting down");
                running_signal.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C: {e}"),
        }
    });

    // File watcher + broadcaster, only when live reload is on.
    if config.live_reload {
        tokio::spawn(run_live_reload(
            config.root.clone(),
            Arc::clone(&registry),
            Arc::clone(&running),
            config.watch_poll_interval(),
            config.watch_debounce(),
        ));
    }

    let ctx = Arc::new(ServerContext::new(config, endpoints, registry));
    run_server(ctx, running).await?;

    info!("beacon-server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_defaults_leave_config_at_defaults() {
        let cli = Cli::parse_from(["beacon-server"]);
        let config = cli.into_server_config().unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_cli_port_override() {
        let cli = Cli::parse_from(["beacon-server", "--port", "8080"]);
        let config = cli.into_server_config().unwrap();
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from([
            "beacon-server",
            "-p",
            "4000",
            "-r",
            "/srv/site",
            "-f",
            "main.html",
            "-q",
        ]);
        let config = cli.into_server_config().unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.root, PathBuf::from("/srv/site"));
        assert_eq!(config.index_file, "main.html");
        assert!(config.quiet);
    }

    #[test]
    fn test_cli_spa_and_no_reload_flags() {
        let cli = Cli::parse_from(["beacon-server", "--spa", "--no-reload"]);
        let config = cli.into_server_config().unwrap();
        assert!(config.spa);
        assert!(!config.live_reload);
    }

    #[test]
    fn test_cli_tls_requires_both_flags() {
        let result = Cli::try_parse_from(["beacon-server", "--tls-cert", "cert.pem"]);
        assert!(result.is_err(), "--tls-cert alone must be rejected");

        let cli = Cli::parse_from([
            "beacon-server",
            "--tls-cert",
            "cert.pem",
            "--tls-key",
            "key.pem",
        ]);
        let config = cli.into_server_config().unwrap();
        let tls = config.tls.unwrap();
        assert_eq!(tls.cert_path, PathBuf::from("cert.pem"));
        assert_eq!(tls.key_path, PathBuf::from("key.pem"));
    }

    #[test]
    fn test_cli_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 5000\nquiet = true\nspa = true").unwrap();

        let cli = Cli::parse_from([
            "beacon-server",
            "--config",
            file.path().to_str().unwrap(),
            "--port",
            "6000",
        ]);
        let config = cli.into_server_config().unwrap();

        // The explicit flag wins; untouched file values survive.
        assert_eq!(config.port, 6000);
        assert!(config.quiet);
        assert!(config.spa);
    }

    #[test]
    fn test_cli_missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["beacon-server", "--config", "/no/such/file.toml"]);
        assert!(cli.into_server_config().is_err());
    }
}
