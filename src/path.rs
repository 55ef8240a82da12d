//! Canonical resource paths.
//!
//! A [`Path`] names exactly one resource in the tree: it carries no
//! wildcards and is normalized at construction, so two paths naming the same
//! resource compare equal. Use [`Selector`](crate::Selector) to address a
//! set of resources.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// Characters that may never appear in a path.
const FORBIDDEN: [char; 5] = ['?', '#', '[', ']', '*'];

/// A validated, normalized resource identifier.
///
/// Invariants:
/// - non-empty;
/// - contains none of `? # [ ] *`;
/// - no repeated `/`;
/// - no trailing `/` (unless the whole path is `/`).
///
/// Paths are immutable; [`Path::with_prefix`] produces a new path.
///
/// # Examples
///
/// ```
/// use canopy::Path;
///
/// let p = Path::parse("/demo//sensor/temp/").unwrap();
/// assert_eq!(p.as_str(), "/demo/sensor/temp");
/// assert_eq!(p, Path::parse("/demo/sensor/temp").unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(String);

impl Path {
    /// Parses and normalizes a path string.
    ///
    /// # Errors
    ///
    /// Returns `AddressError::InvalidPath` if the string is empty or contains
    /// any of `? # [ ] *`.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        if s.is_empty() {
            return Err(AddressError::InvalidPath {
                input: s.to_string(),
                reason: "path is empty".to_string(),
            });
        }
        if let Some(c) = s.chars().find(|c| FORBIDDEN.contains(c)) {
            return Err(AddressError::InvalidPath {
                input: s.to_string(),
                reason: format!("forbidden character '{c}'"),
            });
        }
        Ok(Self(normalize(s)))
    }

    /// Returns the normalized path string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True iff the path does not start with `/`.
    #[must_use]
    pub fn is_relative(&self) -> bool {
        !self.0.starts_with('/')
    }

    /// Returns a new path with `prefix` prepended, separated by a single `/`.
    #[must_use]
    pub fn with_prefix(&self, prefix: &Path) -> Self {
        Self(normalize(&format!("{}/{}", prefix.0, self.0)))
    }
}

/// Collapses repeated `/` and strips a trailing `/` (keeping a lone `/`).
pub(crate) fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_slash = false;
    for c in s.chars() {
        if c == '/' {
            if !prev_slash {
                out.push('/');
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Path {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Path {
    type Error = AddressError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Path {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}
