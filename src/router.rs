// src/router.rs
use std::collections::HashMap;

/// One compiled pattern segment: a literal to match exactly, or a `{name}`
/// placeholder capturing any non-empty run of non-`/` characters.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone)]
pub struct Route {
    pub pattern: String,
    pub handler_id: String,
    pub param_names: Vec<String>,
    pub has_wildcards: bool,
    segments: Vec<Segment>,
}

impl Route {
    fn compile(pattern: &str, handler_id: &str) -> Self {
        let mut segments = Vec::new();
        let mut param_names = Vec::new();

        for part in pattern.split('/').filter(|s| !s.is_empty()) {
            if part.starts_with('{') && part.ends_with('}') && part.len() > 2 {
                let name = part[1..part.len() - 1].to_string();
                param_names.push(name.clone());
                segments.push(Segment::Param(name));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Route {
            pattern: pattern.to_string(),
            handler_id: handler_id.to_string(),
            param_names,
            has_wildcards: pattern.contains('{'),
            segments,
        }
    }

    fn matches(&self, path: &str, params: &mut HashMap<String, String>) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return false;
        }

        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != part {
                        return false;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), (*part).to_string());
                }
            }
        }

        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub matched: bool,
    pub handler_id: String,
    pub params: HashMap<String, String>,
}

/// Ordered route table. First registered match wins, so registration order is
/// the tie-break.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, pattern: &str, handler_id: &str) {
        self.routes.push(Route::compile(pattern, handler_id));
    }

    pub fn remove_route(&mut self, pattern: &str) {
        self.routes.retain(|r| r.pattern != pattern);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn match_route(&self, path: &str) -> MatchResult {
        for route in &self.routes {
            let mut params = HashMap::new();
            if route.matches(path, &mut params) {
                return MatchResult {
                    matched: true,
                    handler_id: route.handler_id.clone(),
                    params,
                };
            }
        }
        MatchResult::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_route() {
        let mut table = RouteTable::new();
        table.add_route("/hello/world", "hello");
        assert!(table.match_route("/hello/world").matched);
        assert!(!table.match_route("/hello").matched);
        assert!(!table.match_route("/hello/world/extra").matched);
    }

    #[test]
    fn test_param_extraction() {
        let mut table = RouteTable::new();
        table.add_route("/users/{id}/posts/{post_id}", "user_posts");

        let result = table.match_route("/users/42/posts/abc");
        assert!(result.matched);
        assert_eq!(result.handler_id, "user_posts");
        assert_eq!(result.params["id"], "42");
        assert_eq!(result.params["post_id"], "abc");
    }

    #[test]
    fn test_param_does_not_cross_segments() {
        let mut table = RouteTable::new();
        table.add_route("/users/{id}", "user");
        assert!(!table.match_route("/users/1/extra").matched);
    }

    #[test]
    fn test_first_registered_wins() {
        let mut table = RouteTable::new();
        table.add_route("/users/{id}", "first");
        table.add_route("/users/{name}", "second");

        let result = table.match_route("/users/7");
        assert_eq!(result.handler_id, "first");
        assert_eq!(result.params["id"], "7");
    }

    #[test]
    fn test_literal_before_param_wins_by_order() {
        let mut table = RouteTable::new();
        table.add_route("/users/{id}", "by_id");
        table.add_route("/users/me", "me");
        // Registration order decides, not specificity.
        assert_eq!(table.match_route("/users/me").handler_id, "by_id");
    }

    #[test]
    fn test_param_names_and_wildcard_flag() {
        let mut table = RouteTable::new();
        table.add_route("/a/{x}/b/{y}", "h");
        table.add_route("/plain", "p");
        assert_eq!(table.routes[0].param_names, vec!["x", "y"]);
        assert!(table.routes[0].has_wildcards);
        assert!(!table.routes[1].has_wildcards);
    }

    #[test]
    fn test_remove_route() {
        let mut table = RouteTable::new();
        table.add_route("/a", "a");
        table.add_route("/b", "b");
        table.remove_route("/a");
        assert_eq!(table.len(), 1);
        assert!(!table.match_route("/a").matched);
    }

    #[test]
    fn test_unmatched_returns_empty_result() {
        let table = RouteTable::new();
        let result = table.match_route("/anything");
        assert!(!result.matched);
        assert!(result.params.is_empty());
    }
}
