//! Registration-ordered route table.
//!
//! Routes are tried in the order they were registered and the first one whose
//! pattern matches the path *and* which carries the requested method wins.
//! Registration order is therefore significant: specific routes go before
//! generic ones sharing a prefix, and catch-all `*` routes go last.
//!
//! ```text
//! articles/:id        → /articles/42       → { id: "42" }
//! articles/:id/tags   → /articles/42/tags  → { id: "42" }
//! *                   → anything not matched above
//! ```

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::error::Error;
use crate::handler::BoxedHandler;
use crate::method::Method;
use crate::rate_limit::RateLimiter;

/// One segment of a route pattern.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// A parsed route pattern: literal and `:name` segments with an optional
/// terminal `*`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parses a pattern such as `/api/v1/articles/:id` or `/api/*`.
    pub fn parse(pattern: &str) -> Result<Self, Error> {
        let raw = normalize_path(pattern);
        let invalid = |reason| Error::InvalidPattern { pattern: pattern.to_owned(), reason };

        let parts: Vec<&str> = split_segments(&raw).collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = if *part == "*" {
                if i + 1 != parts.len() {
                    return Err(invalid("`*` must be the last segment"));
                }
                Segment::Wildcard
            } else if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(invalid("parameter segments need a name"));
                }
                Segment::Param(name.to_owned())
            } else {
                Segment::Literal((*part).to_owned())
            };
            segments.push(segment);
        }
        Ok(Self { raw, segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The bare root `/` and wildcard-terminal patterns may be registered more
    /// than once: mounting an API at the server root makes the API-level and
    /// root-level fallbacks collide on purpose.
    pub fn is_reserved(&self) -> bool {
        self.segments.is_empty() || self.is_catch_all()
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Wildcard))
    }

    /// Matches a normalized request path, returning the named parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut parts = split_segments(path);
        for segment in &self.segments {
            match segment {
                Segment::Wildcard => return Some(params),
                Segment::Literal(lit) => {
                    if parts.next()? != lit {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), parts.next()?.to_owned());
                }
            }
        }
        parts.next().is_none().then_some(params)
    }
}

/// Strips a trailing slash (except for the bare root) and ensures a leading one.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_owned();
    }
    if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// One HTTP-method handler with its resolved configuration.
#[derive(Clone)]
pub struct Endpoint {
    pub(crate) handler: BoxedHandler,
    pub auth_required: bool,
    pub role_required: Vec<String>,
    pub scope_required: Vec<String>,
    pub(crate) limiter: Option<RateLimiter>,
}

impl Endpoint {
    pub(crate) fn new(handler: BoxedHandler) -> Self {
        Self {
            handler,
            auth_required: false,
            role_required: Vec::new(),
            scope_required: Vec::new(),
            limiter: None,
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("auth_required", &self.auth_required)
            .field("role_required", &self.role_required)
            .field("scope_required", &self.scope_required)
            .field("rate_limit", &self.limiter.as_ref().map(RateLimiter::policy))
            .finish_non_exhaustive()
    }
}

/// A path pattern with its per-method endpoints.
#[derive(Debug)]
pub struct Route {
    pattern: PathPattern,
    endpoints: BTreeMap<Method, Endpoint>,
}

impl Route {
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn methods(&self) -> Vec<Method> {
        self.endpoints.keys().copied().collect()
    }
}

/// Outcome of [`RouteTable::lookup`].
#[derive(Debug)]
pub enum RouteMatch<'a> {
    Found {
        endpoint: &'a Endpoint,
        params: HashMap<String, String>,
        pattern: &'a PathPattern,
    },
    /// `OPTIONS` on a path whose route has no explicit OPTIONS endpoint.
    Options { allowed: Vec<Method> },
    MethodNotAllowed { allowed: Vec<Method> },
    NotFound,
}

/// Append-only registry of routes.
///
/// Written during startup, then frozen inside the
/// [`Dispatcher`](crate::Dispatcher) and shared read-only across requests.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `endpoint` for `method` at `pattern`.
    ///
    /// Fails if the same method is already registered on the same literal
    /// pattern, except for the reserved `/` and `*` patterns, whose first
    /// registration keeps winning.
    pub fn register(&mut self, method: Method, pattern: &str, endpoint: Endpoint) -> Result<(), Error> {
        let pattern = PathPattern::parse(pattern)?;
        let reserved = pattern.is_reserved();

        if let Some(route) = self.routes.iter_mut().find(|r| r.pattern == pattern) {
            if route.endpoints.contains_key(&method) {
                if reserved {
                    debug!(%method, path = pattern.as_str(), "reserved route registered again; keeping the first");
                    return Ok(());
                }
                return Err(Error::DuplicateRoute {
                    method: method.to_string(),
                    path: pattern.raw.clone(),
                });
            }
            debug!(%method, path = pattern.as_str(), "route registered");
            route.endpoints.insert(method, endpoint);
            return Ok(());
        }

        debug!(%method, path = pattern.as_str(), "route registered");
        let mut endpoints = BTreeMap::new();
        endpoints.insert(method, endpoint);
        self.routes.push(Route { pattern, endpoints });
        Ok(())
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub(crate) fn endpoints_mut(&mut self) -> impl Iterator<Item = &mut Endpoint> {
        self.routes.iter_mut().flat_map(|r| r.endpoints.values_mut())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Finds the endpoint for `method` on `path`.
    ///
    /// A route whose pattern matches but lacks the method contributes to the
    /// `Allow` list; a later catch-all does not mask that as a 404.
    pub fn lookup(&self, method: Method, path: &str) -> RouteMatch<'_> {
        let path = normalize_path(path);
        let mut allowed: Vec<Method> = Vec::new();

        for route in &self.routes {
            let Some(params) = route.pattern.matches(&path) else { continue };
            let catch_all = route.pattern.is_catch_all();

            if method == Method::Options && !route.endpoints.contains_key(&Method::Options) {
                if catch_all && allowed.is_empty() {
                    continue;
                }
                merge_methods(&mut allowed, route.endpoints.keys().copied());
                merge_methods(&mut allowed, [Method::Options]);
                return RouteMatch::Options { allowed };
            }

            match route.endpoints.get(&method) {
                Some(_) if catch_all && !allowed.is_empty() => break,
                Some(endpoint) => {
                    return RouteMatch::Found { endpoint, params, pattern: &route.pattern };
                }
                None if !catch_all => merge_methods(&mut allowed, route.endpoints.keys().copied()),
                None => {}
            }
        }

        if allowed.is_empty() {
            RouteMatch::NotFound
        } else {
            allowed.sort();
            RouteMatch::MethodNotAllowed { allowed }
        }
    }
}

fn merge_methods(into: &mut Vec<Method>, methods: impl IntoIterator<Item = Method>) {
    for m in methods {
        if !into.contains(&m) {
            into.push(m);
        }
    }
}
