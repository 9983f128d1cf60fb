//! beacon-server library crate.
//!
//! A small static file server for development, with live reload pushed over
//! the from-scratch WebSocket engine in `beacon-core`.
//!
//! # Architecture
//!
//! ```text
//! Browser (HTTP / WebSocket)
//!         ↕
//! [beacon-server]
//!   ├── domain/           Pure types: ServerConfig, TLS file paths
//!   ├── application/      Live-reload snippet + watcher, endpoint table
//!   └── infrastructure/
//!         ├── http/          Request-head parsing, response writing
//!         ├── static_files/  MIME table, SPA fallback, file serving
//!         ├── tls/           rustls acceptor from PEM files
//!         └── server/        Accept loop and per-connection routing
//!         ↕
//! beacon-core (upgrade handshake, frame codec, connection registry)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O beyond loading its own TOML file.
//! - `application` depends on `domain` and `beacon-core` only.
//! - `infrastructure` depends on everything plus `tokio` and the TLS stack.

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: live reload and custom endpoints.
pub mod application;

/// Infrastructure layer: HTTP plumbing, static files, TLS, accept loop.
pub mod infrastructure;
