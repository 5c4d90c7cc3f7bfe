//! Route matching logic.
//!
//! # Responsibilities
//! - Parse path patterns (literal, `:param` and trailing `*` segments)
//! - Match request paths and methods against a route
//! - Decide whether one route's conditions fully cover another's
//!
//! # Design Decisions
//! - Path matching is case-sensitive, segment by segment
//! - A trailing `*` needs at least one (possibly empty) segment after the
//!   prefix: `/api/users/*` matches `/api/users/` and `/api/users/7`, not
//!   `/api/users`
//! - No regex, so matching stays O(segments)

use std::fmt;

use axum::http::Method;
use thiserror::Error;

/// Errors raised while parsing route conditions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("path pattern '{0}' must start with '/'")]
    MissingLeadingSlash(String),
    #[error("path pattern '{0}' has a wildcard before its last segment")]
    InnerWildcard(String),
    #[error("path pattern '{0}' has an unnamed ':' parameter")]
    UnnamedParam(String),
    #[error("unknown HTTP method '{0}'")]
    InvalidMethod(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
    Wildcard,
}

/// A compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a pattern such as `/api/users/*` or `/orders/:id`.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let rest = raw
            .strip_prefix('/')
            .ok_or_else(|| PatternError::MissingLeadingSlash(raw.to_string()))?;

        let parts: Vec<&str> = rest.split('/').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "*" if i == last => Segment::Wildcard,
                "*" => return Err(PatternError::InnerWildcard(raw.to_string())),
                ":" => return Err(PatternError::UnnamedParam(raw.to_string())),
                p if p.starts_with(':') => Segment::Param,
                p => Segment::Literal(p.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn has_wildcard(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Wildcard))
    }

    /// Fewest path segments a matching path can have.
    fn min_len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if `path` (without query string) matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        let Some(rest) = path.strip_prefix('/') else {
            return false;
        };
        let parts: Vec<&str> = rest.split('/').collect();

        if self.has_wildcard() {
            if parts.len() < self.segments.len() {
                return false;
            }
        } else if parts.len() != self.segments.len() {
            return false;
        }

        self.segments.iter().zip(parts.iter()).all(|(seg, part)| match seg {
            Segment::Literal(lit) => lit == part,
            Segment::Param => !part.is_empty(),
            Segment::Wildcard => true,
        })
    }

    /// Returns true if every path matched by `other` is also matched by `self`.
    pub fn covers(&self, other: &PathPattern) -> bool {
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                Segment::Wildcard => return other.min_len() > i,
                Segment::Literal(lit) => match other.segments.get(i) {
                    Some(Segment::Literal(o)) if o == lit => {}
                    _ => return false,
                },
                Segment::Param => match other.segments.get(i) {
                    Some(Segment::Literal(o)) if !o.is_empty() => {}
                    Some(Segment::Param) => {}
                    _ => return false,
                },
            }
        }
        !other.has_wildcard() && other.segments.len() == self.segments.len()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Matches the request method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodMatcher {
    /// "ALL": any method.
    Any,
    Exact(Method),
}

impl MethodMatcher {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let upper = raw.trim().to_ascii_uppercase();
        match upper.as_str() {
            "ALL" | "ANY" | "*" => Ok(Self::Any),
            "" => Err(PatternError::InvalidMethod(raw.to_string())),
            m => Method::from_bytes(m.as_bytes())
                .map(Self::Exact)
                .map_err(|_| PatternError::InvalidMethod(raw.to_string())),
        }
    }

    pub fn matches(&self, method: &Method) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(m) => m == method,
        }
    }

    pub fn covers(&self, other: &MethodMatcher) -> bool {
        match (self, other) {
            (Self::Any, _) => true,
            (Self::Exact(a), Self::Exact(b)) => a == b,
            (Self::Exact(_), Self::Any) => false,
        }
    }
}

/// Path and method conditions combined with AND semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatcher {
    pub path: PathPattern,
    pub method: MethodMatcher,
}

impl RouteMatcher {
    pub fn parse(path: &str, method: &str) -> Result<Self, PatternError> {
        Ok(Self {
            path: PathPattern::parse(path)?,
            method: MethodMatcher::parse(method)?,
        })
    }

    pub fn matches(&self, path: &str, method: &Method) -> bool {
        self.method.matches(method) && self.path.matches(path)
    }

    /// True when this matcher would win every request the other one matches.
    pub fn shadows(&self, other: &RouteMatcher) -> bool {
        self.method.covers(&other.method) && self.path.covers(&other.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_wildcard() {
        let p = PathPattern::parse("/api/users/*").unwrap();
        assert!(p.matches("/api/users/"));
        assert!(p.matches("/api/users/42"));
        assert!(p.matches("/api/users/42/orders"));
        assert!(!p.matches("/api/users"));
        assert!(!p.matches("/api/userss/1"));
        assert!(!p.matches("/API/users/1")); // case sensitive
    }

    #[test]
    fn test_exact_and_param() {
        let p = PathPattern::parse("/orders/:id").unwrap();
        assert!(p.matches("/orders/9"));
        assert!(!p.matches("/orders/"));
        assert!(!p.matches("/orders/9/items"));

        let root = PathPattern::parse("/").unwrap();
        assert!(root.matches("/"));
        assert!(!root.matches("/x"));

        let all = PathPattern::parse("/*").unwrap();
        assert!(all.matches("/"));
        assert!(all.matches("/anything/at/all"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert_eq!(
            PathPattern::parse("api"),
            Err(PatternError::MissingLeadingSlash("api".into()))
        );
        assert!(matches!(
            PathPattern::parse("/a/*/b"),
            Err(PatternError::InnerWildcard(_))
        ));
        assert!(matches!(
            PathPattern::parse("/a/:"),
            Err(PatternError::UnnamedParam(_))
        ));
    }

    #[test]
    fn test_method_matcher() {
        let any = MethodMatcher::parse("ALL").unwrap();
        assert!(any.matches(&Method::DELETE));

        let get = MethodMatcher::parse("get").unwrap();
        assert!(get.matches(&Method::GET));
        assert!(!get.matches(&Method::POST));

        assert!(MethodMatcher::parse("").is_err());
        assert!(MethodMatcher::parse("NOT A METHOD").is_err());
    }

    #[test]
    fn test_covers() {
        let wide = PathPattern::parse("/api/*").unwrap();
        let narrow = PathPattern::parse("/api/users/*").unwrap();
        let exact = PathPattern::parse("/api/users/me").unwrap();
        let param = PathPattern::parse("/api/:section").unwrap();

        assert!(wide.covers(&narrow));
        assert!(wide.covers(&exact));
        assert!(wide.covers(&param));
        assert!(!narrow.covers(&wide));
        assert!(narrow.covers(&exact));
        assert!(!exact.covers(&narrow));
        assert!(!param.covers(&wide));
        assert!(param.covers(&PathPattern::parse("/api/users").unwrap()));
        assert!(exact.covers(&exact.clone()));
    }

    #[test]
    fn test_shadows_respects_method() {
        let get_all = RouteMatcher::parse("/api/*", "GET").unwrap();
        let post_users = RouteMatcher::parse("/api/users/*", "POST").unwrap();
        let any_users = RouteMatcher::parse("/api/users/*", "ALL").unwrap();
        let any_all = RouteMatcher::parse("/api/*", "ALL").unwrap();

        assert!(!get_all.shadows(&post_users));
        assert!(!get_all.shadows(&any_users));
        assert!(any_all.shadows(&post_users));
        assert!(any_all.shadows(&any_users));
    }
}
