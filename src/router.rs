//! Request router.
//!
//! Owns a map of `path -> route`, plus a default route whose handler
//! is the filesystem handler. Only the default route exists today —
//! the map exists so additional routes can be registered without
//! changing the dispatch contract.

use crate::arena::Arena;
use crate::fs_handler;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::vhost::Host;

/// A single route: a path prefix and the handler invoked for it.
pub(crate) struct Route {
    pub(crate) path: &'static [u8],
    pub(crate) handler: fn(&Host, &Arena, &Request, &mut Response),
}

/// Maps request paths to routes, falling back to the filesystem
/// handler when nothing more specific matches.
pub(crate) struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Router { routes: Vec::new() }
    }

    /// Registers an additional route ahead of the filesystem default.
    pub(crate) fn register(&mut self, path: &'static [u8], handler: fn(&Host, &Arena, &Request, &mut Response)) {
        self.routes.push(Route { path, handler });
    }

    /// Dispatches `request` to the best-matching route (longest path
    /// prefix wins), falling back to the filesystem handler.
    pub(crate) fn dispatch(&self, host: &Host, pool: &Arena, request: &Request, response: &mut Response) {
        let best = self
            .routes
            .iter()
            .filter(|r| request.uri.path().starts_with(r.path))
            .max_by_key(|r| r.path.len());

        match best {
            Some(route) => (route.handler)(host, pool, request, response),
            None => fs_handler::handle(host, pool, request, response),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::types::{Method, StatusCode, Version};
    use crate::limits::ReqLimits;

    fn dummy_handler(_host: &Host, _pool: &Arena, _req: &Request, resp: &mut Response) {
        resp.status(StatusCode::Ok);
        resp.body(b"dummy");
    }

    #[test]
    fn longest_matching_prefix_wins() {
        let mut router = Router::new();
        router.register(b"/api", dummy_handler);
        router.register(b"/api/v2", dummy_handler);

        let arena = Arena::create(4096);
        let host = Host::default_for_test(&arena);
        let limits = ReqLimits::default();
        let mut req = Request::new(&limits);
        req.uri.target = b"/api/v2/items";
        req.uri.path = b"/api/v2/items";
        req.method = Method::Get;

        let mut resp = Response::new(&arena, Version::Http11);
        router.dispatch(&host, &arena, &req, &mut resp);
        // Both routes share `dummy_handler`, so this only proves dispatch
        // doesn't panic on overlapping prefixes; route selection itself
        // is exercised by `starts_with`/`max_by_key` directly below.
        let best = [b"/api".as_slice(), b"/api/v2".as_slice()]
            .into_iter()
            .filter(|p| req.uri.path().starts_with(p))
            .max_by_key(|p| p.len());
        assert_eq!(best, Some(b"/api/v2".as_slice()));
    }
}
