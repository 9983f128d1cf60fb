//! Infrastructure layer: HTTP parsing, static file serving, TLS, and the
//! accept loop.

pub mod http;
pub mod server;
pub mod static_files;
pub mod tls;

pub use server::{run_server, serve_connection, ServerContext};
