//! Typed values carried by resources.
//!
//! Each [`Value`] variant knows how to serialize itself to wire bytes and
//! which [`Encoding`](crate::Encoding) tag describes those bytes. Numbers
//! travel as their decimal string representation; this is part of the wire
//! contract shared with every other language binding in a deployment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::encoding::Encoding;

/// Key/value properties, kept sorted for a deterministic wire form.
pub type Properties = BTreeMap<String, String>;

/// Parses a `k1=v1;k2=v2` property string.
///
/// A pair without `=` becomes a key with an empty value. Splitting happens on
/// the first `=` only, so values may themselves contain `=`.
#[must_use]
pub fn parse_properties(s: &str) -> Properties {
    let mut out = Properties::new();
    for pair in s.split(';') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((k, v)) => out.insert(k.to_string(), v.to_string()),
            None => out.insert(pair.to_string(), String::new()),
        };
    }
    out
}

/// Serializes properties to the `k1=v1;k2=v2` wire form.
#[must_use]
pub fn format_properties(props: &Properties) -> String {
    props
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Possible values a resource can hold.
///
/// Values are immutable and compared by content.
///
/// # Examples
///
/// ```
/// use canopy::{Encoding, Value};
///
/// let v = Value::Int(42);
/// assert_eq!(v.encoding(), Encoding::Int);
/// assert_eq!(v.encode(), b"42");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Opaque bytes.
    Raw(Vec<u8>),
    /// A UTF-8 string.
    Str(String),
    /// Key/value properties.
    Properties(Properties),
    /// A JSON document, carried as its string form.
    Json(String),
    /// A 32-bit signed integer.
    Int(i32),
    /// A 32-bit float.
    Float(f32),
}

impl Value {
    /// Serializes this value to its wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Raw(bytes) => bytes.clone(),
            Self::Str(s) | Self::Json(s) => s.as_bytes().to_vec(),
            Self::Properties(props) => format_properties(props).into_bytes(),
            Self::Int(i) => i.to_string().into_bytes(),
            Self::Float(f) => f.to_string().into_bytes(),
        }
    }

    /// The encoding tag describing this value's wire bytes.
    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        match self {
            Self::Raw(_) => Encoding::Raw,
            Self::Str(_) => Encoding::Str,
            Self::Properties(_) => Encoding::Properties,
            Self::Json(_) => Encoding::Json,
            Self::Int(_) => Encoding::Int,
            Self::Float(_) => Encoding::Float,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.encoding().name()
    }

    /// Returns true if this is a raw value.
    #[must_use]
    pub const fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }

    /// Returns true if this is a string value.
    #[must_use]
    pub const fn is_str(&self) -> bool {
        matches!(self, Self::Str(_))
    }

    /// Returns the textual content of a string or JSON value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Json(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content, if any.
    #[must_use]
    pub const fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float content, if any.
    #[must_use]
    pub const fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the property map, if any.
    #[must_use]
    pub const fn as_properties(&self) -> Option<&Properties> {
        match self {
            Self::Properties(p) => Some(p),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw(bytes) => write!(f, "raw[{}]", bytes.len()),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Properties(props) => write!(f, "{}", format_properties(props)),
            Self::Json(s) => write!(f, "{s}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Raw(bytes)
    }
}

impl From<Properties> for Value {
    fn from(props: Properties) -> Self {
        Self::Properties(props)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v.to_string())
    }
}
