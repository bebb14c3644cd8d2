//! Route table.
//!
//! Maps `METHOD path` to a `Controller#Action` in the handler table. One
//! radix tree keyed by path, O(path-length) lookup. Each matched path knows
//! every method routed on it, so a known path with the wrong method is
//! answered with `405` and an `Allow` list instead of `404`.
//!
//! ```rust
//! use corvid::Routes;
//!
//! let routes = Routes::new()
//!     .get("/", "Home#Index")
//!     .scope("/users", Routes::new()
//!         .get("/", "Users#Index")
//!         .get("/{id}", "Users#Show")
//!         .delete("/{id}", "Users#Destroy"));
//! ```

use std::collections::BTreeSet;

use http::Method;
use matchit::Router as MatchitRouter;
use tracing::debug;

use crate::descriptor::ActionDescriptor;
use crate::dispatch::Target;
use crate::error::Error;
use crate::handler::HandlerTable;
use crate::method::RouteMethod;

/// One route as written.
#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub method: String,
    pub path: String,
    pub descriptor: String,
}

/// An ordered list of routes. Each method returns `self` so routes chain.
#[derive(Clone, Debug, Default)]
pub struct Routes {
    routes: Vec<Route>,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    /// `method` is a standard method name or `ANY`; it is checked when the
    /// router is built.
    pub fn on(mut self, method: &str, path: &str, descriptor: &str) -> Self {
        self.routes.push(Route {
            method: method.to_owned(),
            path: normalize_path(path),
            descriptor: descriptor.to_owned(),
        });
        self
    }

    pub fn get(self, path: &str, descriptor: &str) -> Self { self.on("GET", path, descriptor) }
    pub fn post(self, path: &str, descriptor: &str) -> Self { self.on("POST", path, descriptor) }
    pub fn put(self, path: &str, descriptor: &str) -> Self { self.on("PUT", path, descriptor) }
    pub fn patch(self, path: &str, descriptor: &str) -> Self { self.on("PATCH", path, descriptor) }
    pub fn delete(self, path: &str, descriptor: &str) -> Self { self.on("DELETE", path, descriptor) }
    pub fn head(self, path: &str, descriptor: &str) -> Self { self.on("HEAD", path, descriptor) }
    pub fn options(self, path: &str, descriptor: &str) -> Self { self.on("OPTIONS", path, descriptor) }
    pub fn any(self, path: &str, descriptor: &str) -> Self { self.on("ANY", path, descriptor) }

    /// Nests `routes` under `prefix`. A nested `/` becomes the prefix itself.
    pub fn scope(mut self, prefix: &str, routes: Routes) -> Self {
        let prefix = normalize_path(prefix);
        for mut route in routes.routes {
            route.path = if route.path == "/" {
                prefix.clone()
            } else if prefix == "/" {
                route.path
            } else {
                format!("{prefix}{}", route.path)
            };
            self.routes.push(route);
        }
        self
    }

    /// Appends another list as is.
    pub fn merge(mut self, other: Routes) -> Self {
        self.routes.extend(other.routes);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

struct PathEntry {
    pattern: String,
    methods: Vec<(RouteMethod, ActionDescriptor)>,
    allow: Option<String>,
}

/// A resolved route: where to dispatch, plus captured path parameters.
#[derive(Debug, PartialEq)]
pub struct RouteMatch {
    pub target: Target,
    pub params: Vec<(String, String)>,
}

pub struct Router {
    tree: MatchitRouter<usize>,
    entries: Vec<PathEntry>,
}

impl Router {
    /// Validates every route against `table` and builds the lookup tree.
    pub fn build(routes: &Routes, table: &HandlerTable) -> Result<Self, Error> {
        let mut entries: Vec<PathEntry> = Vec::new();

        for route in routes.iter() {
            let invalid = |reason: String| Error::InvalidRoute {
                method: route.method.clone(),
                path: route.path.clone(),
                reason,
            };

            let method: RouteMethod = route.method.parse().map_err(&invalid)?;
            let descriptor = ActionDescriptor::parse(&route.descriptor);
            if descriptor.action.is_empty() || !table.contains(&descriptor) {
                return Err(invalid(format!("action {descriptor} not found")));
            }

            let index = match entries.iter().position(|e| e.pattern == route.path) {
                Some(index) => index,
                None => {
                    entries.push(PathEntry { pattern: route.path.clone(), methods: Vec::new(), allow: None });
                    entries.len() - 1
                }
            };
            let entry = &mut entries[index];
            if entry.methods.iter().any(|(m, _)| *m == method) {
                return Err(invalid("route is defined twice".to_owned()));
            }
            debug!(method = %method, path = %route.path, handler = %descriptor, "route registered");
            entry.methods.push((method, descriptor));
        }

        let mut tree = MatchitRouter::new();
        for (index, entry) in entries.iter_mut().enumerate() {
            entry.allow = allow_list(&entry.methods);
            tree.insert(entry.pattern.clone(), index).map_err(|e| Error::InvalidRoute {
                method: "*".to_owned(),
                path: entry.pattern.clone(),
                reason: e.to_string(),
            })?;
        }

        Ok(Self { tree, entries })
    }

    /// Resolves a request. Never fails: unknown paths go to
    /// `ErrorsController.NotFound`, known paths with an unrouted method to
    /// `ErrorsController.MethodNotAllowed`.
    pub fn lookup(&self, method: &Method, path: &str) -> RouteMatch {
        let path = normalize_path(path);
        let Ok(matched) = self.tree.at(&path) else {
            return RouteMatch { target: Target::not_found(path), params: Vec::new() };
        };
        let Some(entry) = self.entries.get(*matched.value) else {
            return RouteMatch { target: Target::not_found(path.clone()), params: Vec::new() };
        };
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();

        // An explicit method wins over `ANY` on the same path.
        let explicit = entry.methods.iter().find(|(m, _)| *m == RouteMethod::Only(method.clone()));
        let found = explicit.or_else(|| entry.methods.iter().find(|(m, _)| m.matches(method)));
        let target = match (found, &entry.allow) {
            (Some((_, descriptor)), _) => Target::new(descriptor, entry.pattern.clone()),
            (None, Some(allow)) => Target::method_not_allowed(entry.pattern.clone(), allow.clone()),
            (None, None) => Target::not_found(entry.pattern.clone()),
        };
        RouteMatch { target, params }
    }

    /// `(method, pattern, handler)` for every route, in registration order.
    pub fn routes(&self) -> Vec<(String, String, String)> {
        self.entries
            .iter()
            .flat_map(|entry| {
                entry
                    .methods
                    .iter()
                    .map(|(m, d)| (m.to_string(), entry.pattern.clone(), d.to_string()))
            })
            .collect()
    }
}

/// Explicit methods on a path, sorted and comma-joined. `None` when the path
/// has none (only `ANY` routes), since then every method matches.
fn allow_list(methods: &[(RouteMethod, ActionDescriptor)]) -> Option<String> {
    let allowed: BTreeSet<&str> = methods
        .iter()
        .filter_map(|(m, _)| match m {
            RouteMethod::Only(m) => Some(m.as_str()),
            RouteMethod::Any => None,
        })
        .collect();
    (!allowed.is_empty()).then(|| allowed.into_iter().collect::<Vec<_>>().join(", "))
}

/// Leading slash, no duplicate slashes, no trailing slash (except the root).
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::Context;

    fn table() -> HandlerTable {
        let mut table = HandlerTable::default();
        for (controller, action) in [
            ("UsersController", "Index"),
            ("UsersController", "Show"),
            ("UsersController", "Destroy"),
            ("ProxyController", "Forward"),
        ] {
            table.insert(controller, action, Arc::new(|_: &mut Context| Ok(()))).unwrap();
        }
        table
    }

    fn router(routes: Routes) -> Router {
        Router::build(&routes, &table()).unwrap()
    }

    #[test]
    fn normalize_path_collapses_slashes() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("users/"), "/users");
        assert_eq!(normalize_path("//users///{id}/"), "/users/{id}");
    }

    #[test]
    fn matches_route_and_captures_params() {
        let r = router(Routes::new().get("/users/{id}", "Users#Show"));
        let m = r.lookup(&Method::GET, "/users/42/");
        assert_eq!(m.target.controller, "UsersController");
        assert_eq!(m.target.action, "Show");
        assert_eq!(m.target.path, "/users/{id}");
        assert_eq!(m.params, [("id".to_owned(), "42".to_owned())]);
    }

    #[test]
    fn known_path_with_other_method_is_405() {
        let r = router(
            Routes::new()
                .get("/users/{id}", "Users#Show")
                .delete("/users/{id}", "Users#Destroy"),
        );
        let m = r.lookup(&Method::POST, "/users/1");
        assert_eq!(m.target.action, "MethodNotAllowed");
        assert_eq!(m.target.allow.as_deref(), Some("DELETE, GET"));
    }

    #[test]
    fn unknown_path_is_404() {
        let r = router(Routes::new().get("/users", "Users#Index"));
        let m = r.lookup(&Method::GET, "/nope");
        assert_eq!(m.target.controller, "ErrorsController");
        assert_eq!(m.target.action, "NotFound");
    }

    #[test]
    fn any_matches_every_method_but_explicit_wins() {
        let r = router(
            Routes::new()
                .any("/proxy", "Proxy#Forward")
                .get("/proxy", "Users#Index"),
        );
        assert_eq!(r.lookup(&Method::PUT, "/proxy").target.action, "Forward");
        assert_eq!(r.lookup(&Method::GET, "/proxy").target.action, "Index");
    }

    #[test]
    fn scope_prefixes_nested_routes() {
        let routes = Routes::new().scope(
            "/api/",
            Routes::new()
                .get("/", "Users#Index")
                .scope("users", Routes::new().get("{id}", "Users#Show")),
        );
        let paths: Vec<_> = routes.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, ["/api", "/api/users/{id}"]);
    }

    #[test]
    fn route_to_missing_action_is_rejected() {
        let err = Router::build(&Routes::new().get("/x", "Users#Edit"), &table()).err().unwrap();
        assert!(err.to_string().contains("action UsersController.Edit not found"), "{err}");
    }

    #[test]
    fn invalid_method_is_rejected() {
        let err = Router::build(&Routes::new().on("FETCH", "/x", "Users#Index"), &table()).err().unwrap();
        assert!(err.to_string().contains("invalid method FETCH"), "{err}");
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let routes = Routes::new().get("/users", "Users#Index").get("/users/", "Users#Show");
        assert!(Router::build(&routes, &table()).is_err());
    }
}
