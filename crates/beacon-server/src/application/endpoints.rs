//! Custom endpoint dispatch.
//!
//! An embedding application can register handlers for exact method + path
//! pairs; they run before static file lookup.  The table is built before
//! the server starts and is immutable afterwards — handlers are plain
//! `Fn` values owned by the table, not entries in any shared mutable
//! registry.

use std::collections::HashMap;

use crate::infrastructure::http::{RequestHead, Response};

/// A request handler: receives the parsed head and the (possibly empty)
/// body, returns the response to write.
pub type EndpointHandler = Box<dyn Fn(&RequestHead, &[u8]) -> Response + Send + Sync>;

/// Method + path → handler table.
#[derive(Default)]
pub struct EndpointTable {
    routes: HashMap<(String, String), EndpointHandler>,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for an arbitrary method.
    pub fn route<H>(&mut self, method: &str, path: &str, handler: H)
    where
        H: Fn(&RequestHead, &[u8]) -> Response + Send + Sync + 'static,
    {
        self.routes.insert(
            (method.to_ascii_uppercase(), path.to_string()),
            Box::new(handler),
        );
    }

    /// Registers a GET handler.
    pub fn get<H>(&mut self, path: &str, handler: H)
    where
        H: Fn(&RequestHead, &[u8]) -> Response + Send + Sync + 'static,
    {
        self.route("GET", path, handler);
    }

    /// Registers a POST handler.
    pub fn post<H>(&mut self, path: &str, handler: H)
    where
        H: Fn(&RequestHead, &[u8]) -> Response + Send + Sync + 'static,
    {
        self.route("POST", path, handler);
    }

    /// Registers a PUT handler.
    pub fn put<H>(&mut self, path: &str, handler: H)
    where
        H: Fn(&RequestHead, &[u8]) -> Response + Send + Sync + 'static,
    {
        self.route("PUT", path, handler);
    }

    /// Registers a PATCH handler.
    pub fn patch<H>(&mut self, path: &str, handler: H)
    where
        H: Fn(&RequestHead, &[u8]) -> Response + Send + Sync + 'static,
    {
        self.route("PATCH", path, handler);
    }

    /// Registers a DELETE handler.
    pub fn delete<H>(&mut self, path: &str, handler: H)
    where
        H: Fn(&RequestHead, &[u8]) -> Response + Send + Sync + 'static,
    {
        self.route("DELETE", path, handler);
    }

    /// True when a handler is registered for this request's method + path.
    pub fn contains(&self, method: &str, path: &str) -> bool {
        self.routes
            .contains_key(&(method.to_ascii_uppercase(), path.to_string()))
    }

    /// Runs the matching handler, if any.
    pub fn dispatch(&self, head: &RequestHead, body: &[u8]) -> Option<Response> {
        self.routes
            .get(&(head.method.to_ascii_uppercase(), head.path().to_string()))
            .map(|handler| handler(head, body))
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True when no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl std::fmt::Debug for EndpointTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointTable")
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn head(method: &str, target: &str) -> RequestHead {
        RequestHead::parse(&format!("{method} {target} HTTP/1.1")).unwrap()
    }

    #[test]
    fn test_dispatch_matches_method_and_path() {
        let mut table = EndpointTable::new();
        table.get("/api/ping", |_, _| Response::text(200, "pong"));

        let hit = table.dispatch(&head("GET", "/api/ping"), &[]).unwrap();
        assert_eq!(hit.body, b"pong");

        assert!(table.dispatch(&head("POST", "/api/ping"), &[]).is_none());
        assert!(table.dispatch(&head("GET", "/api/other"), &[]).is_none());
    }

    #[test]
    fn test_dispatch_ignores_query_string() {
        let mut table = EndpointTable::new();
        table.get("/api/items", |_, _| Response::text(200, "list"));

        let hit = table.dispatch(&head("GET", "/api/items?page=2"), &[]);
        assert!(hit.is_some());
    }

    #[test]
    fn test_handler_receives_body() {
        let mut table = EndpointTable::new();
        table.post("/api/echo", |_, body| {
            Response::new(200).with_body("application/octet-stream", body.to_vec())
        });

        let hit = table
            .dispatch(&head("POST", "/api/echo"), b"payload")
            .unwrap();
        assert_eq!(hit.body, b"payload");
    }

    #[test]
    fn test_every_verb_registrar_routes_its_method() {
        let mut table = EndpointTable::new();
        table.get("/r", |_, _| Response::text(200, "get"));
        table.post("/r", |_, _| Response::text(200, "post"));
        table.put("/r", |_, _| Response::text(200, "put"));
        table.patch("/r", |_, _| Response::text(200, "patch"));
        table.delete("/r", |_, _| Response::text(200, "delete"));

        assert_eq!(table.len(), 5);
        for method in ["GET", "POST", "PUT", "PATCH", "DELETE"] {
            let hit = table.dispatch(&head(method, "/r"), &[]).unwrap();
            assert_eq!(hit.body, method.to_ascii_lowercase().as_bytes());
        }
    }

    #[test]
    fn test_contains_is_case_insensitive_on_method() {
        let mut table = EndpointTable::new();
        table.route("get", "/x", |_, _| Response::new(204));

        assert!(table.contains("GET", "/x"));
        assert!(table.contains("get", "/x"));
        assert!(!table.contains("GET", "/y"));
    }

    #[test]
    fn test_empty_table_reports_empty() {
        let table = EndpointTable::new();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
    }
}
