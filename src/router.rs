// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Request router: parameterized path routing over an immutable table built
//! once at startup.
//!
//! Routes are matched by segment: a literal segment must match exactly, a
//! `:name` segment captures one path segment, and a trailing `*name` segment
//! captures the remainder of the path. The first route in registration order
//! that matches wins — operators control precedence by ordering the route
//! table, the same way they'd order rules in an nginx/Envoy config.

use crate::parser::Method;

/// One segment of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard(String),
}

/// A registered route: an optional method filter (`None` matches any
/// method) and a parsed path pattern.
#[derive(Debug, Clone)]
pub struct Route {
    method: Option<Method>,
    segments: Vec<Segment>,
    /// Opaque handler identifier the caller assigns meaning to (an index
    /// into its own handler table, an upstream name, ...).
    pub handler: String,
}

impl Route {
    /// Parses a route pattern like `/users/:id` or `/static/*path`.
    pub fn new(method: Option<Method>, pattern: &str, handler: impl Into<String>) -> Self {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if let Some(name) = s.strip_prefix(':') {
                    Segment::Param(name.to_string())
                } else if let Some(name) = s.strip_prefix('*') {
                    Segment::Wildcard(name.to_string())
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Route {
            method,
            segments,
            handler: handler.into(),
        }
    }

    fn matches<'p>(&self, path_segments: &[&'p str]) -> Option<Vec<(String, String)>> {
        let mut params = Vec::new();
        let mut i = 0;
        for seg in &self.segments {
            match seg {
                Segment::Wildcard(name) => {
                    params.push((name.clone(), path_segments[i..].join("/")));
                    return Some(params);
                }
                Segment::Literal(lit) => {
                    if path_segments.get(i) != Some(&lit.as_str()) {
                        return None;
                    }
                    i += 1;
                }
                Segment::Param(name) => {
                    let value = path_segments.get(i)?;
                    params.push((name.clone(), value.to_string()));
                    i += 1;
                }
            }
        }
        if i == path_segments.len() {
            Some(params)
        } else {
            None
        }
    }
}

/// The outcome of a successful route lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch<'r> {
    /// The route that matched.
    pub route: &'r Route,
    /// Captured path parameters, in pattern order.
    pub params: Vec<(String, String)>,
}

/// An immutable table of routes, built once and shared read-only across
/// worker threads.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Builds a router from a fixed set of routes.
    pub fn new(routes: Vec<Route>) -> Self {
        Router { routes }
    }

    /// Finds the first route in registration order matching `method` and
    /// `path`.
    pub fn route(&self, method: Method, path: &str) -> Option<RouteMatch<'_>> {
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        self.routes
            .iter()
            .filter(|r| r.method.map_or(true, |m| m == method))
            .find_map(|r| r.matches(&path_segments).map(|params| RouteMatch { route: r, params }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::new(vec![
            Route::new(Some(Method::Get), "/users/:id", "get_user"),
            Route::new(Some(Method::Get), "/users/me", "get_self"),
            Route::new(None, "/static/*path", "static_files"),
            Route::new(Some(Method::Post), "/users", "create_user"),
        ])
    }

    #[test]
    fn first_registered_match_wins_over_a_later_literal() {
        let m = router().route(Method::Get, "/users/me").unwrap();
        assert_eq!(m.route.handler, "get_user");
    }

    #[test]
    fn reordering_the_table_changes_precedence() {
        let router = Router::new(vec![
            Route::new(Some(Method::Get), "/users/me", "get_self"),
            Route::new(Some(Method::Get), "/users/:id", "get_user"),
        ]);
        let m = router.route(Method::Get, "/users/me").unwrap();
        assert_eq!(m.route.handler, "get_self");
    }

    #[test]
    fn param_route_captures_value() {
        let m = router().route(Method::Get, "/users/42").unwrap();
        assert_eq!(m.route.handler, "get_user");
        assert_eq!(m.params, vec![("id".to_string(), "42".to_string())]);
    }

    #[test]
    fn wildcard_captures_remainder() {
        let m = router().route(Method::Get, "/static/css/app.css").unwrap();
        assert_eq!(m.route.handler, "static_files");
        assert_eq!(m.params, vec![("path".to_string(), "css/app.css".to_string())]);
    }

    #[test]
    fn method_filter_excludes_non_matching_routes() {
        assert!(router().route(Method::Delete, "/users/me").is_none());
    }

    #[test]
    fn no_route_matches_unknown_path() {
        assert!(router().route(Method::Get, "/nope").is_none());
    }

    #[test]
    fn method_agnostic_route_matches_any_method() {
        assert!(router().route(Method::Post, "/static/x").is_some());
    }
}
