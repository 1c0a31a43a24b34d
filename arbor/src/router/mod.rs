//! Routes requests to their handler chains.
//!
//! The index keeps one trie per HTTP method plus a map from
//! `(method, canonical pattern)` to the ordered handler list registered for
//! it. Group composition and the middleware-chain cache live in sibling
//! modules; the index itself knows nothing about groups.

pub mod chain;
pub mod group;
pub mod pattern;
pub(crate) mod tree;

use std::collections::HashMap;
use std::sync::Arc;

use hyper::Method;
use log::trace;
use percent_encoding::percent_decode_str;

use crate::middleware::Middleware;
use crate::router::pattern::{canonicalize, parse_pattern, request_tokens, tokenize};
use crate::router::tree::Tree;

pub use crate::router::pattern::RouteError;
pub use crate::router::pattern::Segment;

/// Parameters captured from the dynamic segments of a matched pattern.
/// Insertion order follows segment order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params {
    items: Vec<(String, String)>,
}

impl Params {
    /// The value captured for `name`, if the matched pattern bound it.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Iterates captured `(name, value)` pairs in segment order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of captured parameters.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn insert(&mut self, name: &str, value: String) {
        self.items.push((name.to_string(), value));
    }
}

/// A successful lookup: the canonical pattern, its captured parameters and
/// the handler list registered for it.
pub(crate) struct RouteMatch {
    pub pattern: String,
    pub params: Params,
    pub handlers: Arc<Vec<Middleware>>,
}

/// The per-method route index.
pub(crate) struct Router {
    trees: HashMap<Method, Tree>,
    routes: HashMap<(Method, String), Arc<Vec<Middleware>>>,
}

impl Router {
    pub(crate) fn new() -> Router {
        Router {
            trees: HashMap::new(),
            routes: HashMap::new(),
        }
    }

    /// Registers `handlers` for `(method, pattern)`. Fails with
    /// [`RouteError::Conflict`] when a pattern tokenizing identically is
    /// already present for the method, and with [`RouteError::Malformed`]
    /// when the pattern violates the grammar.
    pub(crate) fn register(
        &mut self,
        method: Method,
        pattern: &str,
        handlers: Vec<Middleware>,
    ) -> Result<(), RouteError> {
        let segments = parse_pattern(pattern)?;
        let canonical = canonicalize(&segments);

        let key = (method.clone(), canonical.clone());
        if self.routes.contains_key(&key) {
            return Err(RouteError::Conflict {
                method: method.to_string(),
                pattern: canonical,
            });
        }

        let tree = self.trees.entry(method.clone()).or_insert_with(Tree::new);
        if !tree.insert(&segments, canonical.clone()) {
            return Err(RouteError::Conflict {
                method: method.to_string(),
                pattern: canonical,
            });
        }

        trace!(" registered `{} {}`", method, canonical);
        self.routes.insert(key, Arc::new(handlers));
        Ok(())
    }

    /// Finds the best-matching route for a request path. Tokens are percent
    /// decoded before matching; parameters come from aligning the leaf
    /// pattern with the decoded tokens.
    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let tree = self.trees.get(method)?;

        let decoded: Vec<String> = request_tokens(path)
            .into_iter()
            .map(decode_token)
            .collect();
        let tokens: Vec<&str> = decoded.iter().map(|t| t.as_str()).collect();

        let pattern = tree.lookup(&tokens)?.to_string();
        let params = extract_params(&tokenize(&pattern), &tokens);
        let handlers = self.routes.get(&(method.clone(), pattern.clone()))?.clone();

        trace!(" matched `{} {}` -> `{}`", method, path, pattern);
        Some(RouteMatch {
            pattern,
            params,
            handlers,
        })
    }

    /// All methods a path is registered under, used by `any`-style helpers
    /// and tests.
    #[cfg(test)]
    pub(crate) fn route_count(&self) -> usize {
        self.routes.len()
    }
}

// Matching works on decoded text. A token that is not valid
// percent-encoded utf8 participates in its raw form.
fn decode_token(raw: &str) -> String {
    match percent_decode_str(raw).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

/// Builds the parameter map by re-tokenizing the matched pattern and
/// aligning it with the request tokens. Named and braced segments bind a
/// single token; a named wildcard binds the joined remainder; an anonymous
/// wildcard matches without binding.
fn extract_params(segments: &[Segment], tokens: &[&str]) -> Params {
    let mut params = Params::default();
    for (i, segment) in segments.iter().enumerate() {
        match segment {
            Segment::Static(_) => {}
            Segment::Named(name) | Segment::Braced(name) => {
                if let Some(token) = tokens.get(i) {
                    params.insert(name, (*token).to_string());
                }
            }
            Segment::Wildcard(name) => {
                if !name.is_empty() && i <= tokens.len() {
                    params.insert(name, tokens[i..].join("/"));
                }
            }
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::handler::{Handler, HandlerResult};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        async fn handle(&self, _ctx: &mut Context) -> HandlerResult {
            Ok(())
        }
    }

    fn noop() -> Vec<Middleware> {
        vec![Arc::new(Noop)]
    }

    #[test]
    fn registers_and_looks_up_static_routes() {
        let mut router = Router::new();
        router.register(Method::GET, "/ping", noop()).unwrap();

        let found = router.lookup(&Method::GET, "/ping").unwrap();
        assert_eq!(found.pattern, "/ping");
        assert!(found.params.is_empty());

        assert!(router.lookup(&Method::POST, "/ping").is_none());
        assert!(router.lookup(&Method::GET, "/pong").is_none());
    }

    #[test]
    fn captures_named_and_braced_params() {
        let mut router = Router::new();
        router.register(Method::GET, "/users/:id", noop()).unwrap();
        router
            .register(Method::GET, "/teams/{team}/members/:id", noop())
            .unwrap();

        let found = router.lookup(&Method::GET, "/users/42").unwrap();
        assert_eq!(found.params.get("id"), Some("42"));
        assert_eq!(found.params.len(), 1);

        let found = router.lookup(&Method::GET, "/teams/red/members/7").unwrap();
        assert_eq!(found.params.get("team"), Some("red"));
        assert_eq!(found.params.get("id"), Some("7"));
        assert_eq!(found.params.len(), 2);
    }

    #[test]
    fn captures_wildcard_remainder() {
        let mut router = Router::new();
        router.register(Method::GET, "/files/*rest", noop()).unwrap();

        let found = router.lookup(&Method::GET, "/files/a/b/c.txt").unwrap();
        assert_eq!(found.pattern, "/files/*rest");
        assert_eq!(found.params.get("rest"), Some("a/b/c.txt"));
    }

    #[test]
    fn anonymous_wildcard_matches_without_binding() {
        let mut router = Router::new();
        router.register(Method::GET, "/files/*", noop()).unwrap();

        let found = router.lookup(&Method::GET, "/files/a/b").unwrap();
        assert!(found.params.is_empty());
    }

    #[test]
    fn duplicate_registration_fails_deterministically() {
        let mut router = Router::new();
        router.register(Method::GET, "/users/:id", noop()).unwrap();

        let err = router.register(Method::GET, "/users/:id", noop());
        assert!(matches!(err, Err(RouteError::Conflict { .. })));

        // Same tokens spelled with redundant slashes still conflict.
        let err = router.register(Method::GET, "//users//:id/", noop());
        assert!(matches!(err, Err(RouteError::Conflict { .. })));

        // A braced spelling tokenizes differently, so it may coexist.
        router.register(Method::GET, "/users/{id}", noop()).unwrap();
        assert_eq!(router.route_count(), 2);
    }

    #[test]
    fn percent_decodes_request_tokens() {
        let mut router = Router::new();
        router.register(Method::GET, "/users/:name", noop()).unwrap();

        let found = router.lookup(&Method::GET, "/users/j%C3%BCrgen").unwrap();
        assert_eq!(found.params.get("name"), Some("jürgen"));
    }

    #[test]
    fn undecodable_tokens_match_in_raw_form() {
        let mut router = Router::new();
        router.register(Method::GET, "/users/:name", noop()).unwrap();

        let found = router.lookup(&Method::GET, "/users/%ff%fe").unwrap();
        assert_eq!(found.params.get("name"), Some("%ff%fe"));
    }

    #[test]
    fn canonical_pattern_lookup_round_trips() {
        let mut router = Router::new();
        for pattern in &["/ping", "/users/:id", "/files/*rest"] {
            router.register(Method::GET, pattern, noop()).unwrap();
        }
        for pattern in &["/ping", "/users/:id", "/files/*rest"] {
            let canonical = canonicalize(&tokenize(pattern));
            assert_eq!(canonical, *pattern);
        }
    }
}
