//! Live reload: the injected client snippet, change classification, and the
//! watch-and-broadcast loop.
//!
//! Served HTML gets a small script appended that connects back to the
//! server over WebSocket.  When the watcher sees a change under the served
//! root it broadcasts one message to every registered connection:
//! `updatecss` when only stylesheets changed (the page swaps them in place,
//! keeping scroll and form state), `reload` for anything else.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_core::ConnectionRegistry;
use tokio::time::{interval, Instant};
use tracing::{debug, info};

use crate::application::watcher::{diff_snapshots, DirScanner};

/// Message that makes every connected page reload itself.
pub const RELOAD_COMMAND: &str = "reload";

/// Message that makes every connected page refresh its stylesheets in
/// place.
pub const UPDATE_CSS_COMMAND: &str = "updatecss";

/// The script injected into served HTML.
///
/// Kept dependency-free and old-browser-friendly; it reconnects lazily by
/// reloading the page when the socket drops and the tab regains focus.
pub const INJECTED_SNIPPET: &str = r#"
<!-- Code injected by beacon -->
<script>
    (function () {
        var protocol = location.protocol === "https:" ? "wss:" : "ws:";
        var socket = new WebSocket(protocol + "//" + location.host);
        var refreshStyles = function () {
            var links = document.querySelectorAll("link[rel=stylesheet]");
            for (var i = 0; i < links.length; i++) {
                var href = links[i].href.replace(/[?&]_beacon=\d+/, "");
                links[i].href =
                    href + (href.indexOf("?") >= 0 ? "&" : "?") + "_beacon=" + Date.now();
            }
        };
        socket.onmessage = function (event) {
            if (event.data === "updatecss") refreshStyles();
            else if (event.data === "reload") location.reload();
        };
        socket.onclose = function () {
            window.addEventListener("focus", function () { location.reload(); });
        };
    })();
</script>
"#;

/// Finds the byte offset of `needle` (lowercase ASCII) in `haystack`,
/// ignoring case.
fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(needle)
}

/// Inserts the snippet into an HTML document: immediately before the first
/// `</body>`, else before `</head>`, else appended to the end.
pub fn inject_snippet(html: &str) -> String {
    for tag in ["</body>", "</head>"] {
        if let Some(pos) = find_case_insensitive(html, tag) {
            let mut out = String::with_capacity(html.len() + INJECTED_SNIPPET.len());
            out.push_str(&html[..pos]);
            out.push_str(INJECTED_SNIPPET);
            out.push_str(&html[pos..]);
            return out;
        }
    }

    let mut out = String::with_capacity(html.len() + INJECTED_SNIPPET.len());
    out.push_str(html);
    out.push_str(INJECTED_SNIPPET);
    out
}

/// Chooses the broadcast command for a batch of changed paths: stylesheets
/// alone can be hot-swapped, anything else needs a full reload.
pub fn classify_changes(changed: &[PathBuf]) -> &'static str {
    let only_css = !changed.is_empty()
        && changed.iter().all(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("css"))
        });
    if only_css {
        UPDATE_CSS_COMMAND
    } else {
        RELOAD_COMMAND
    }
}

/// Watches `root` and broadcasts to the registry until `running` clears.
///
/// Changes are coalesced inside a debounce window so one save that touches
/// several files produces a single broadcast.
pub async fn run_live_reload(
    root: PathBuf,
    registry: Arc<ConnectionRegistry>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
    debounce: Duration,
) {
    info!("watching {} for changes", root.display());

    let scanner = DirScanner::new(root);
    let mut snapshot = scanner.scan();

    let mut ticker = interval(poll_interval);
    ticker.tick().await; // the first tick resolves immediately

    let mut pending: Vec<PathBuf> = Vec::new();
    let mut first_seen: Option<Instant> = None;

    while running.load(Ordering::Relaxed) {
        ticker.tick().await;

        let current = scanner.scan();
        let changed = diff_snapshots(&snapshot, &current);
        snapshot = current;

        if !changed.is_empty() {
            for path in &changed {
                debug!("change detected: {}", path.display());
            }
            pending.extend(changed);
            first_seen.get_or_insert_with(Instant::now);
        }

        let Some(seen) = first_seen else { continue };
        if seen.elapsed() < debounce {
            continue;
        }

        let command = classify_changes(&pending);
        let delivered = registry.broadcast(command).await;
        info!(
            "{} file(s) changed — sent \"{command}\" to {delivered} connection(s)",
            pending.len()
        );
        pending.clear();
        first_seen = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
