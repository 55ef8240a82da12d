//! Selectors: path expressions with optional filter, properties and fragment.
//!
//! A selector addresses a *set* of resources. Its grammar is a wire contract
//! shared across every language binding in a deployment:
//!
//! ```text
//! <path-expr> [ "?" <filter>? ( "(" <properties> ")" )? ] [ "#" <fragment> ]
//! ```
//!
//! The path expression may contain `*` (one segment) and `**` (any number of
//! segments). The filter predicate is currently inert and reserved.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AddressError;
use crate::path::Path;
use crate::value::{parse_properties, Properties};

/// Property-key prefixes that switch `get()` into time-series mode.
///
/// This is a de facto protocol convention honored by every implementation
/// sharing a deployment.
const SERIES_KEY_PREFIXES: [&str; 2] = ["starttime", "stoptime"];

fn grammar() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^
            (?P<path>[^\[\]?\#]+)
            (?:
                \?
                (?P<filter>[^\[\]()\#]*)
                (?: \( (?P<props>.*) \) )?
            )?
            (?: \# (?P<frag>.*) )?
            $",
        )
        .expect("selector grammar regex is valid")
    })
}

/// A parsed selector.
///
/// Immutable; decomposed once at construction into four substrings.
/// Re-serializing via [`fmt::Display`] yields a canonical form, which is the
/// basis for equality and hashing.
///
/// # Examples
///
/// ```
/// use canopy::Selector;
///
/// let sel = Selector::parse("/demo/**?ghi(starttime=0)#temp").unwrap();
/// assert_eq!(sel.path_expr(), "/demo/**");
/// assert_eq!(sel.filter(), "ghi");
/// assert_eq!(sel.properties(), "starttime=0");
/// assert_eq!(sel.fragment(), "temp");
/// assert!(sel.is_series_selector());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector {
    path_expr: String,
    filter: String,
    properties: String,
    fragment: String,
}

impl Selector {
    /// Parses a selector string.
    ///
    /// # Errors
    ///
    /// Returns `AddressError::InvalidSelector` if the string is empty or does
    /// not match the selector grammar.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let caps = grammar()
            .captures(s)
            .ok_or_else(|| AddressError::InvalidSelector {
                input: s.to_string(),
            })?;

        let group = |name: &str| caps.name(name).map_or(String::new(), |m| m.as_str().to_string());

        Ok(Self {
            path_expr: group("path"),
            filter: group("filter"),
            properties: group("props"),
            fragment: group("frag"),
        })
    }

    /// The path expression (may contain `*` / `**`).
    #[must_use]
    pub fn path_expr(&self) -> &str {
        &self.path_expr
    }

    /// The filter predicate (inert, reserved).
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// The raw properties substring (semicolon-separated `key=value` pairs).
    #[must_use]
    pub fn properties(&self) -> &str {
        &self.properties
    }

    /// The fragment (field-projection list).
    #[must_use]
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// The properties parsed into a map.
    #[must_use]
    pub fn properties_map(&self) -> Properties {
        parse_properties(&self.properties)
    }

    /// Everything after the path expression, in canonical form. This is what
    /// the transport receives as the query predicate.
    #[must_use]
    pub fn optional_part(&self) -> String {
        let mut out = String::new();
        if !self.filter.is_empty() || !self.properties.is_empty() {
            out.push('?');
            out.push_str(&self.filter);
            if !self.properties.is_empty() {
                out.push('(');
                out.push_str(&self.properties);
                out.push(')');
            }
        }
        if !self.fragment.is_empty() {
            out.push('#');
            out.push_str(&self.fragment);
        }
        out
    }

    /// True iff the path expression does not start with `/`.
    #[must_use]
    pub fn is_relative(&self) -> bool {
        !self.path_expr.starts_with('/')
    }

    /// Returns a new selector whose path expression is prefixed by `prefix`.
    /// Filter, properties and fragment are untouched.
    #[must_use]
    pub fn with_prefix(&self, prefix: &Path) -> Self {
        Self {
            path_expr: crate::path::normalize(&format!("{}/{}", prefix.as_str(), self.path_expr)),
            filter: self.filter.clone(),
            properties: self.properties.clone(),
            fragment: self.fragment.clone(),
        }
    }

    /// True iff any property key starts with `starttime` or `stoptime`.
    ///
    /// This single boolean switches [`Workspace::get`](crate::Workspace::get)
    /// between latest-value and time-series result semantics.
    #[must_use]
    pub fn is_series_selector(&self) -> bool {
        self.properties_map()
            .keys()
            .any(|k| SERIES_KEY_PREFIXES.iter().any(|p| k.starts_with(p)))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.path_expr, self.optional_part())
    }
}

impl TryFrom<&str> for Selector {
    type Error = AddressError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<&Path> for Selector {
    fn from(path: &Path) -> Self {
        Self {
            path_expr: path.as_str().to_string(),
            filter: String::new(),
            properties: String::new(),
            fragment: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_decomposition() {
        let sel = Selector::parse("/a/b/c?ghi#xyz").unwrap();
        assert_eq!(sel.path_expr(), "/a/b/c");
        assert_eq!(sel.filter(), "ghi");
        assert_eq!(sel.properties(), "");
        assert_eq!(sel.fragment(), "xyz");
    }

    #[test]
    fn test_filter_is_greedy() {
        // A second '?' belongs to the filter, not to a new segment.
        let sel = Selector::parse("/a/b/c?ghi?xyz").unwrap();
        assert_eq!(sel.filter(), "ghi?xyz");
        assert_eq!(sel.properties(), "");
        assert_eq!(sel.fragment(), "");
    }

    #[test]
    fn test_properties_in_parens() {
        let sel = Selector::parse("/a/b?f(k1=v1;k2=v2)#frag").unwrap();
        assert_eq!(sel.filter(), "f");
        assert_eq!(sel.properties(), "k1=v1;k2=v2");
        assert_eq!(sel.fragment(), "frag");

        let map = sel.properties_map();
        assert_eq!(map.get("k1").map(String::as_str), Some("v1"));
        assert_eq!(map.get("k2").map(String::as_str), Some("v2"));
    }

    #[test]
    fn test_path_only() {
        let sel = Selector::parse("/a/b/**").unwrap();
        assert_eq!(sel.path_expr(), "/a/b/**");
        assert_eq!(sel.filter(), "");
        assert_eq!(sel.optional_part(), "");
    }

    #[test]
    fn test_empty_fails() {
        let err = Selector::parse("").unwrap_err();
        assert!(matches!(err, AddressError::InvalidSelector { .. }));
    }

    #[test]
    fn test_bracket_in_path_fails() {
        let err = Selector::parse("/a[0]/b").unwrap_err();
        assert!(matches!(err, AddressError::InvalidSelector { .. }));
    }

    #[test]
    fn test_canonical_form_equality() {
        // A bare trailing '?' serializes away, so the two parse equal.
        let a = Selector::parse("/a/b?").unwrap();
        let b = Selector::parse("/a/b").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "/a/b");

        let c = Selector::parse("/a/b?f(p=1)#x").unwrap();
        assert_eq!(c.to_string(), "/a/b?f(p=1)#x");
        assert_eq!(c, Selector::parse(&c.to_string()).unwrap());
    }

    #[test]
    fn test_is_relative() {
        assert!(Selector::parse("a/b/*").unwrap().is_relative());
        assert!(!Selector::parse("/a/b/*").unwrap().is_relative());
    }

    #[test]
    fn test_with_prefix_rewrites_path_only() {
        let sel = Selector::parse("b/*?f(p=1)#x").unwrap();
        let root = Path::parse("/demo").unwrap();
        let abs = sel.with_prefix(&root);
        assert_eq!(abs.path_expr(), "/demo/b/*");
        assert_eq!(abs.filter(), "f");
        assert_eq!(abs.properties(), "p=1");
        assert_eq!(abs.fragment(), "x");
    }

    #[test]
    fn test_series_switch() {
        assert!(Selector::parse("/a/**?(starttime=0)").unwrap().is_series_selector());
        assert!(Selector::parse("/a/**?(stoptime=now)").unwrap().is_series_selector());
        assert!(Selector::parse("/a/**?(starttime.ntp=123)")
            .unwrap()
            .is_series_selector());
        assert!(!Selector::parse("/a/**").unwrap().is_series_selector());
        assert!(!Selector::parse("/a/**?(other=1)").unwrap().is_series_selector());
    }

    #[test]
    fn test_selector_from_path() {
        let path = Path::parse("/a/b").unwrap();
        let sel = Selector::from(&path);
        assert_eq!(sel.path_expr(), "/a/b");
        assert!(!sel.is_series_selector());
    }
}
