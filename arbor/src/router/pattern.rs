//! Lexing for route patterns and request paths.
//!
//! A pattern is an ordered list of segments. Four kinds exist: static text,
//! `:named`, `{braced}` and `*wildcard`. Named and braced segments are
//! equivalent at match time; a wildcard is terminal and consumes the rest of
//! the request path.

use std::fmt;

use thiserror::Error;

/// Errors raised while registering routes. Both variants are fatal at
/// startup; the index refuses the registration rather than shadowing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// A route with an identically-tokenizing pattern already exists for
    /// this method.
    #[error("route already registered for `{method} {pattern}`")]
    Conflict {
        /// Uppercase method token.
        method: String,
        /// Canonical form of the offending pattern.
        pattern: String,
    },

    /// The pattern text does not satisfy the pattern grammar.
    #[error("malformed pattern `{pattern}`: {reason}")]
    Malformed {
        /// The pattern as supplied by the caller.
        pattern: String,
        /// Human-readable grammar violation.
        reason: String,
    },
}

/// A single segment of a route pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Matched exactly (string equality) against the request segment.
    Static(String),

    /// `:name`: matches any single request segment and binds it.
    Named(String),

    /// `{name}`: matches any single request segment and binds it.
    Braced(String),

    /// `*name`: matches the remainder of the request path. An empty name
    /// matches without binding.
    Wildcard(String),
}

impl Segment {
    /// Classifies a single raw token. Empty tokens must be filtered out by
    /// the caller.
    pub(crate) fn classify(token: &str) -> Segment {
        if let Some(rest) = token.strip_prefix(':') {
            Segment::Named(rest.to_string())
        } else if token.starts_with('{') && token.ends_with('}') && token.len() >= 2 {
            Segment::Braced(token[1..token.len() - 1].to_string())
        } else if let Some(rest) = token.strip_prefix('*') {
            Segment::Wildcard(rest.to_string())
        } else {
            Segment::Static(token.to_string())
        }
    }

    /// True for named, braced and wildcard segments.
    pub fn is_dynamic(&self) -> bool {
        !matches!(self, Segment::Static(_))
    }

    /// True only for wildcard segments.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Segment::Wildcard(_))
    }

    /// The binding name for dynamic segments, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Segment::Static(_) => None,
            Segment::Named(name) | Segment::Braced(name) => Some(name),
            Segment::Wildcard(name) => {
                if name.is_empty() {
                    None
                } else {
                    Some(name)
                }
            }
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Static(text) => write!(f, "{}", text),
            Segment::Named(name) => write!(f, ":{}", name),
            Segment::Braced(name) => write!(f, "{{{}}}", name),
            Segment::Wildcard(name) => write!(f, "*{}", name),
        }
    }
}

/// Splits a pattern into classified segments.
///
/// Empty tokens are dropped, and lexing stops after the first wildcard
/// token: a wildcard consumes the remainder of any request path, so
/// anything that follows it in a pattern is ignored here (and rejected by
/// [`parse_pattern`]).
pub fn tokenize(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    for token in path.split('/').filter(|t| !t.is_empty()) {
        let segment = Segment::classify(token);
        let stop = segment.is_wildcard();
        segments.push(segment);
        if stop {
            break;
        }
    }
    segments
}

/// Splits a request path into raw tokens, dropping empty ones.
pub(crate) fn request_tokens(path: &str) -> Vec<&str> {
    path.split('/').filter(|t| !t.is_empty()).collect()
}

fn valid_ident(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Tokenizes a pattern and enforces the pattern grammar: idents must be
/// non-empty `[A-Za-z_][A-Za-z0-9_]*`, a wildcard must be the final
/// segment, and static text must not embed pattern metacharacters.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, RouteError> {
    let malformed = |reason: &str| RouteError::Malformed {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    let tokens: Vec<&str> = pattern.split('/').filter(|t| !t.is_empty()).collect();
    let mut segments = Vec::with_capacity(tokens.len());

    for (i, token) in tokens.iter().enumerate() {
        let segment = Segment::classify(token);
        match &segment {
            Segment::Static(text) => {
                if text.contains(|c| c == ':' || c == '*' || c == '{' || c == '}') {
                    return Err(malformed("static segment embeds a pattern metacharacter"));
                }
            }
            Segment::Named(name) | Segment::Braced(name) => {
                if !valid_ident(name) {
                    return Err(malformed("dynamic segment requires a valid identifier"));
                }
            }
            Segment::Wildcard(name) => {
                if !name.is_empty() && !valid_ident(name) {
                    return Err(malformed("wildcard name must be a valid identifier"));
                }
                if i + 1 != tokens.len() {
                    return Err(malformed("wildcard segment must be terminal"));
                }
            }
        }
        segments.push(segment);
    }

    Ok(segments)
}

/// Renders segments back into a canonical pattern string. Canonical form
/// always has a leading `/`, single separators and no trailing `/`.
pub fn canonicalize(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for segment in segments {
        out.push('/');
        out.push_str(&segment.to_string());
    }
    out
}

/// Joins a group prefix and a route suffix with exactly one `/` between
/// them. A bare `/` root is preserved and non-root results never carry a
/// trailing `/`.
pub fn join_paths(prefix: &str, suffix: &str) -> String {
    let head = prefix.trim_end_matches('/');
    let tail = suffix.trim_start_matches('/');
    if tail.is_empty() {
        if head.is_empty() {
            "/".to_string()
        } else {
            head.to_string()
        }
    } else {
        format!("{}/{}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_segment_kinds() {
        assert_eq!(
            tokenize("/users/:id/files/*rest"),
            vec![
                Segment::Static("users".into()),
                Segment::Named("id".into()),
                Segment::Static("files".into()),
                Segment::Wildcard("rest".into()),
            ]
        );
        assert_eq!(
            tokenize("/v1/{tenant}/status"),
            vec![
                Segment::Static("v1".into()),
                Segment::Braced("tenant".into()),
                Segment::Static("status".into()),
            ]
        );
    }

    #[test]
    fn drops_empty_tokens() {
        assert_eq!(tokenize("//a///b/"), tokenize("/a/b"));
        assert!(tokenize("/").is_empty());
    }

    #[test]
    fn stops_after_wildcard() {
        assert_eq!(
            tokenize("/files/*rest/ignored/tail"),
            vec![
                Segment::Static("files".into()),
                Segment::Wildcard("rest".into()),
            ]
        );
    }

    #[test]
    fn anonymous_wildcard_has_no_name() {
        let segments = tokenize("/files/*");
        assert_eq!(segments[1], Segment::Wildcard(String::new()));
        assert_eq!(segments[1].name(), None);
    }

    #[test]
    fn named_and_braced_are_distinct_but_both_dynamic() {
        let named = Segment::classify(":id");
        let braced = Segment::classify("{id}");
        assert_ne!(named, braced);
        assert!(named.is_dynamic() && braced.is_dynamic());
        assert_eq!(named.name(), braced.name());
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert!(parse_pattern("/users/:").is_err());
        assert!(parse_pattern("/users/{}").is_err());
        assert!(parse_pattern("/files/*rest/more").is_err());
        assert!(parse_pattern("/a/:1bad").is_err());
        assert!(parse_pattern("/a/*-").is_err());
    }

    #[test]
    fn rejects_embedded_metacharacters() {
        assert!(parse_pattern("/us:ers").is_err());
        assert!(parse_pattern("/users/{id").is_err());
    }

    #[test]
    fn tokenize_round_trips_through_canonical_form() {
        for pattern in &[
            "/ping",
            "/users/:id",
            "/v1/{tenant}/files/*rest",
            "//double//slashes",
            "/",
            "/files/*",
        ] {
            let tokens = tokenize(pattern);
            assert_eq!(tokenize(&canonicalize(&tokens)), tokens, "{}", pattern);
        }
    }

    #[test]
    fn join_preserves_root_and_avoids_doubles() {
        assert_eq!(join_paths("/", "/"), "/");
        assert_eq!(join_paths("/", "ping"), "/ping");
        assert_eq!(join_paths("/v1", "/users"), "/v1/users");
        assert_eq!(join_paths("/v1/", "/users/"), "/v1/users");
        assert_eq!(join_paths("/v1", ""), "/v1");
    }
}
