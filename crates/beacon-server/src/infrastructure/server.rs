//! Accept loop and per-connection request routing.
//!
//! Every accepted socket gets its own task.  A request is routed down one
//! of three paths, checked in order:
//!
//! 1. **WebSocket upgrade** — the `Upgrade` header names the websocket
//!    token and live reload is on: the socket is handed to the
//!    `beacon-core` registry and never returns to HTTP.
//! 2. **Custom endpoint** — an exact method + path match in the endpoint
//!    table.
//! 3. **Static file** — everything else, with SPA fallback and snippet
//!    injection per configuration.
//!
//! Plain requests are served keep-alive until the client asks to close;
//! the loop also exits on any parse or socket error.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use beacon_core::{handshake, ConnectionRegistry};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::application::EndpointTable;
use crate::domain::ServerConfig;
use crate::infrastructure::http::{
    read_body, read_request_head, write_response, HttpError, Response,
};
use crate::infrastructure::static_files::StaticFiles;
use crate::infrastructure::tls;

/// How long the accept loop waits before re-checking the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Upper bound on reading one request head.  Protects the accept path from
/// sockets that connect and then go silent.
const HEAD_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a connection task needs, shared once via `Arc`.
pub struct ServerContext {
    /// Runtime configuration.
    pub config: ServerConfig,
    /// Static file resolver built from the configuration.
    pub static_files: StaticFiles,
    /// Custom endpoint table, fixed before startup.
    pub endpoints: EndpointTable,
    /// The WebSocket connection registry.
    pub registry: Arc<ConnectionRegistry>,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        endpoints: EndpointTable,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        let static_files = StaticFiles::new(
            config.root.clone(),
            config.index_file.clone(),
            config.spa,
        );
        Self {
            config,
            static_files,
            endpoints,
            registry,
        }
    }
}

/// Runs the accept loop until `running` clears.
///
/// # Errors
///
/// Returns an error when the listener cannot be bound or the TLS material
/// cannot be loaded; accept-time errors are logged and survived.
pub async fn run_server(ctx: Arc<ServerContext>, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let addr = ctx.config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind listener on {addr}"))?;

    let tls_acceptor = match &ctx.config.tls {
        Some(files) => Some(
            tls::load_acceptor(&files.cert_path, &files.key_path)
                .context("failed to load TLS certificate/key")?,
        ),
        None => None,
    };

    let scheme = if tls_acceptor.is_some() { "https" } else { "http" };
    info!(
        "serving {} on {scheme}://{addr}",
        ctx.config.root.display()
    );

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // A short timeout keeps the loop responsive to the shutdown flag
        // even when no clients are connecting.
        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                let ctx = Arc::clone(&ctx);
                let acceptor = tls_acceptor.clone();
                tokio::spawn(async move {
                    handle_client(stream, peer, ctx, acceptor).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept failure (e.g. file-descriptor pressure).
                error!("accept error: {e}");
            }
            Err(_) => {
                // No connection within the poll window; check the flag.
            }
        }
    }

    Ok(())
}

/// Completes the optional TLS handshake and runs the request loop.
async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ServerContext>,
    tls_acceptor: Option<TlsAcceptor>,
) {
    match tls_acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => serve_connection(tls_stream, peer, ctx).await,
            Err(e) => debug!("{peer}: TLS handshake failed: {e}"),
        },
        None => serve_connection(stream, peer, ctx).await,
    }
}

/// Serves requests on one socket until upgrade, close, or error.
///
/// Public so integration tests can drive it over in-memory streams.
pub async fn serve_connection<S>(mut stream: S, peer: SocketAddr, ctx: Arc<ServerContext>)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    loop {
        let (head, leftover) = match timeout(HEAD_READ_TIMEOUT, read_request_head(&mut stream))
            .await
        {
            Err(_) => {
                debug!("{peer}: request head timed out");
                return;
            }
            // The client closed between requests; normal end of keep-alive.
            Ok(Err(HttpError::UnexpectedEof)) => return,
            Ok(Err(e)) => {
                debug!("{peer}: bad request: {e}");
                let _ = write_response(&mut stream, &Response::bad_request(&e.to_string())).await;
                return;
            }
            Ok(Ok(parsed)) => parsed,
        };

        if !ctx.config.quiet {
            info!("{} {}", head.method, head.target);
        }

        // ── WebSocket upgrade ─────────────────────────────────────────────
        let is_upgrade = head
            .header("upgrade")
            .is_some_and(handshake::is_websocket_upgrade);
        if is_upgrade {
            if !ctx.config.live_reload {
                // Nothing is listening for upgrades; drop the socket the
                // way a server without an upgrade handler would.
                debug!("{peer}: websocket upgrade ignored (live reload disabled)");
                return;
            }

            let Some(nonce) = head.header("sec-websocket-key") else {
                let _ = write_response(
                    &mut stream,
                    &Response::bad_request("missing Sec-WebSocket-Key header"),
                )
                .await;
                return;
            };
            let nonce = nonce.to_string();

            match ctx.registry.handle_upgrade(stream, &nonce, leftover).await {
                Ok(id) => debug!("{peer}: upgraded to websocket connection {id}"),
                Err(e) => warn!("{peer}: websocket handshake failed: {e}"),
            }
            // Upgraded or failed, the socket now belongs to the registry's
            // world; HTTP service on it is over.
            return;
        }

        // ── Custom endpoint ───────────────────────────────────────────────
        if ctx.endpoints.contains(&head.method, head.path()) {
            let body = match read_body(&mut stream, &head, leftover).await {
                Ok(body) => body,
                Err(e) => {
                    let _ =
                        write_response(&mut stream, &Response::bad_request(&e.to_string())).await;
                    return;
                }
            };
            if let Some(response) = ctx.endpoints.dispatch(&head, &body) {
                if write_response(&mut stream, &response).await.is_err() {
                    return;
                }
            }
            if head.wants_close() {
                return;
            }
            continue;
        }

        // ── Static file ───────────────────────────────────────────────────
        let response = ctx
            .static_files
            .serve(head.path(), ctx.config.live_reload)
            .await;
        if write_response(&mut stream, &response).await.is_err() {
            return;
        }
        if head.wants_close() {
            return;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
