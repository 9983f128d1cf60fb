//! Static file lookup: MIME mapping, traversal-safe path resolution,
//! directory index files, and the SPA fallback.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::application::live_reload;
use crate::infrastructure::http::Response;

/// Maps a file extension to its Content-Type.
///
/// Unknown extensions fall back to `application/octet-stream`.
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("ico") => "image/x-icon",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("png") => "image/png",
        Some("jpg") => "image/jpg",
        Some("gif") => "image/gif",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        Some("woff") => "application/font-woff",
        Some("ttf") => "application/font-ttf",
        Some("eot") => "application/vnd.ms-fontobject",
        Some("otf") => "application/font-otf",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        _ => "application/octet-stream",
    }
}

/// Percent-decodes a path, rejecting malformed escapes and non-UTF-8
/// results.
fn percent_decode(path: &str) -> Option<String> {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Turns a request path into a root-relative path, or `None` when the path
/// is malformed or tries to escape the root.
pub fn sanitize_path(request_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode(request_path)?;

    let mut clean = PathBuf::new();
    for component in Path::new(&decoded).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            // Leading "/" and "." segments are dropped; ".." escapes the
            // root and is rejected outright.
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

/// Outcome of resolving a request path against the root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Serve this file.
    File(PathBuf),
    /// Nothing to serve; the path names what was looked for.
    NotFound(PathBuf),
}

/// The static file service for one server instance.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    index_file: String,
    spa: bool,
}

impl StaticFiles {
    pub fn new(root: PathBuf, index_file: String, spa: bool) -> Self {
        Self {
            root,
            index_file,
            spa,
        }
    }

    /// Resolves a request path to a file on disk.
    ///
    /// Directories resolve to their index file.  A missing path falls back
    /// to the root index file when SPA mode is on (the client-side router
    /// owns unknown paths), and to [`Resolved::NotFound`] otherwise.
    pub async fn resolve(&self, request_path: &str) -> Resolved {
        let Some(relative) = sanitize_path(request_path) else {
            return Resolved::NotFound(PathBuf::from(request_path));
        };

        let mut full = self.root.join(relative);
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => full.push(&self.index_file),
            Ok(_) => return Resolved::File(full),
            Err(_) => {}
        }

        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => Resolved::File(full),
            _ if self.spa => Resolved::File(self.root.join(&self.index_file)),
            _ => Resolved::NotFound(full),
        }
    }

    /// Resolves and serves a request path.
    ///
    /// HTML responses get the live-reload snippet injected when
    /// `live_reload` is set; every other type is served verbatim.
    pub async fn serve(&self, request_path: &str, live_reload_enabled: bool) -> Response {
        let path = match self.resolve(request_path).await {
            Resolved::File(path) => path,
            Resolved::NotFound(path) => {
                debug!("static miss: {}", path.display());
                return Response::not_found(&path.display().to_string());
            }
        };

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Response::not_found(&path.display().to_string());
            }
            Err(e) => return Response::server_error(&e.to_string()),
        };

        let mime = mime_for(&path);
        if live_reload_enabled && mime == "text/html" {
            let html = String::from_utf8_lossy(&data);
            let injected = live_reload::inject_snippet(&html);
            return Response::new(200).with_body("text/html", injected.into_bytes());
        }
        Response::new(200).with_body(mime, data)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture_root() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("index.html"),
            "<html><body>home</body></html>",
        )
        .unwrap();
        fs::write(dir.path().join("app.css"), "body { color: red }").unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/index.html"), "<body>docs</body>").unwrap();
        fs::write(dir.path().join("docs/guide.pdf"), b"%PDF-").unwrap();
        dir
    }

    fn service(dir: &TempDir, spa: bool) -> StaticFiles {
        StaticFiles::new(dir.path().to_path_buf(), "index.html".to_string(), spa)
    }

    #[test]
    fn test_mime_table_matches_served_types() {
        assert_eq!(mime_for(Path::new("a.html")), "text/html");
        assert_eq!(mime_for(Path::new("a.htm")), "text/html");
        assert_eq!(mime_for(Path::new("a.css")), "text/css");
        assert_eq!(mime_for(Path::new("a.js")), "text/javascript");
        assert_eq!(mime_for(Path::new("a.png")), "image/png");
        assert_eq!(mime_for(Path::new("a.jpg")), "image/jpg");
        assert_eq!(mime_for(Path::new("a.svg")), "image/svg+xml");
        assert_eq!(mime_for(Path::new("a.woff")), "application/font-woff");
        assert_eq!(mime_for(Path::new("a.wasm")), "application/octet-stream");
        assert_eq!(mime_for(Path::new("Makefile")), "application/octet-stream");
    }

    #[test]
    fn test_mime_is_case_insensitive_on_extension() {
        assert_eq!(mime_for(Path::new("A.HTML")), "text/html");
        assert_eq!(mime_for(Path::new("logo.PNG")), "image/png");
    }

    #[test]
    fn test_sanitize_strips_root_and_decodes_percent_escapes() {
        assert_eq!(
            sanitize_path("/docs/my%20file.html"),
            Some(PathBuf::from("docs/my file.html"))
        );
        assert_eq!(sanitize_path("/"), Some(PathBuf::new()));
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert_eq!(sanitize_path("/../etc/passwd"), None);
        assert_eq!(sanitize_path("/docs/../../secret"), None);
        assert_eq!(sanitize_path("/%2e%2e/escape"), None);
    }

    #[test]
    fn test_sanitize_rejects_malformed_escapes() {
        assert_eq!(sanitize_path("/bad%2"), None);
        assert_eq!(sanitize_path("/bad%zz"), None);
    }

    #[tokio::test]
    async fn test_resolve_serves_existing_file() {
        let dir = fixture_root();
        let resolved = service(&dir, false).resolve("/app.css").await;
        assert_eq!(resolved, Resolved::File(dir.path().join("app.css")));
    }

    #[tokio::test]
    async fn test_resolve_directory_uses_index_file() {
        let dir = fixture_root();
        let service = service(&dir, false);

        assert_eq!(
            service.resolve("/").await,
            Resolved::File(dir.path().join("index.html"))
        );
        assert_eq!(
            service.resolve("/docs").await,
            Resolved::File(dir.path().join("docs").join("index.html"))
        );
    }

    #[tokio::test]
    async fn test_resolve_missing_path_is_not_found_without_spa() {
        let dir = fixture_root();
        let resolved = service(&dir, false).resolve("/missing.js").await;
        assert!(matches!(resolved, Resolved::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_missing_path_falls_back_to_index_with_spa() {
        let dir = fixture_root();
        let resolved = service(&dir, true).resolve("/client/route/42").await;
        assert_eq!(resolved, Resolved::File(dir.path().join("index.html")));
    }

    #[tokio::test]
    async fn test_serve_injects_snippet_into_html_when_live() {
        let dir = fixture_root();
        let response = service(&dir, false).serve("/", true).await;

        assert_eq!(response.status, 200);
        let body = String::from_utf8(response.body).unwrap();
        assert!(body.contains("WebSocket"), "snippet must be injected");
        assert!(body.ends_with("</body></html>"));
    }

    #[tokio::test]
    async fn test_serve_leaves_html_untouched_when_live_reload_off() {
        let dir = fixture_root();
        let response = service(&dir, false).serve("/", false).await;
        assert_eq!(response.body, b"<html><body>home</body></html>");
    }

    #[tokio::test]
    async fn test_serve_does_not_inject_into_css() {
        let dir = fixture_root();
        let response = service(&dir, false).serve("/app.css", true).await;
        assert_eq!(response.body, b"body { color: red }");
    }

    #[tokio::test]
    async fn test_serve_missing_file_returns_classic_404() {
        let dir = fixture_root();
        let response = service(&dir, false).serve("/nope.html", false).await;
        assert_eq!(response.status, 404);
        let body = String::from_utf8(response.body).unwrap();
        assert!(body.starts_with("ERROR 404: "));
        assert!(body.ends_with(" not found."));
    }
}
