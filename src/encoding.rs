//! Encoding tags and the decoder registry.
//!
//! Each encoding is bound to a numeric wire flag that must be numerically
//! identical across every language binding sharing a deployment. The
//! [`EncodingRegistry`] is a read-only decoder table built once at startup
//! and passed by reference into the workspace, never accessed as ambient
//! global state.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::value::{parse_properties, Value};

/// A closed set of wire encodings.
///
/// The flag values are a wire contract; see [`Encoding::flag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Opaque bytes.
    Raw,
    /// UTF-8 string.
    Str,
    /// Semicolon-separated `key=value` pairs.
    Properties,
    /// JSON document as UTF-8 text.
    Json,
    /// 32-bit signed integer as decimal text.
    Int,
    /// 32-bit float as decimal text.
    Float,
}

impl Encoding {
    /// The numeric wire flag for this encoding.
    #[must_use]
    pub const fn flag(self) -> u16 {
        match self {
            Self::Raw => 0x00,
            Self::Str => 0x02,
            Self::Properties => 0x03,
            Self::Json => 0x04,
            Self::Int => 0x07,
            Self::Float => 0x08,
        }
    }

    /// Resolves a wire flag to an encoding.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::UnknownEncoding` for flags outside the contract.
    pub const fn from_flag(flag: u16) -> Result<Self, CodecError> {
        match flag {
            0x00 => Ok(Self::Raw),
            0x02 => Ok(Self::Str),
            0x03 => Ok(Self::Properties),
            0x04 => Ok(Self::Json),
            0x07 => Ok(Self::Int),
            0x08 => Ok(Self::Float),
            _ => Err(CodecError::UnknownEncoding { flag }),
        }
    }

    /// Returns a human-readable encoding name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Str => "string",
            Self::Properties => "properties",
            Self::Json => "json",
            Self::Int => "int",
            Self::Float => "float",
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A decoder turns wire bytes into a typed value.
pub type Decoder = fn(&[u8]) -> Result<Value, CodecError>;

/// Read-only table mapping encoding flags to decoders.
///
/// Built once via [`EncodingRegistry::standard`] and shared by `Arc`; there
/// is no dynamic registration in the core.
#[derive(Debug, Clone)]
pub struct EncodingRegistry {
    decoders: HashMap<u16, Decoder>,
}

impl EncodingRegistry {
    /// Builds the registry for the closed set of standard encodings.
    #[must_use]
    pub fn standard() -> Arc<Self> {
        let mut decoders: HashMap<u16, Decoder> = HashMap::new();
        decoders.insert(Encoding::Raw.flag(), decode_raw);
        decoders.insert(Encoding::Str.flag(), decode_str);
        decoders.insert(Encoding::Properties.flag(), decode_properties);
        decoders.insert(Encoding::Json.flag(), decode_json);
        decoders.insert(Encoding::Int.flag(), decode_int);
        decoders.insert(Encoding::Float.flag(), decode_float);
        Arc::new(Self { decoders })
    }

    /// Decodes a payload carrying the given encoding flag.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::UnknownEncoding` for an unregistered flag and
    /// `CodecError::Decode` when the payload does not parse as its declared
    /// encoding.
    pub fn decode(&self, flag: u16, payload: &[u8]) -> Result<Value, CodecError> {
        let decoder = self
            .decoders
            .get(&flag)
            .ok_or(CodecError::UnknownEncoding { flag })?;
        decoder(payload)
    }
}

fn utf8<'a>(encoding: &'static str, payload: &'a [u8]) -> Result<&'a str, CodecError> {
    std::str::from_utf8(payload).map_err(|e| CodecError::Decode {
        encoding,
        reason: e.to_string(),
    })
}

fn decode_raw(payload: &[u8]) -> Result<Value, CodecError> {
    Ok(Value::Raw(payload.to_vec()))
}

fn decode_str(payload: &[u8]) -> Result<Value, CodecError> {
    Ok(Value::Str(utf8("string", payload)?.to_string()))
}

fn decode_properties(payload: &[u8]) -> Result<Value, CodecError> {
    Ok(Value::Properties(parse_properties(utf8(
        "properties",
        payload,
    )?)))
}

fn decode_json(payload: &[u8]) -> Result<Value, CodecError> {
    Ok(Value::Json(utf8("json", payload)?.to_string()))
}

fn decode_int(payload: &[u8]) -> Result<Value, CodecError> {
    let text = utf8("int", payload)?;
    let parsed = text.parse::<i32>().map_err(|e| CodecError::Decode {
        encoding: "int",
        reason: format!("{e}: {text:?}"),
    })?;
    Ok(Value::Int(parsed))
}

fn decode_float(payload: &[u8]) -> Result<Value, CodecError> {
    let text = utf8("float", payload)?;
    let parsed = text.parse::<f32>().map_err(|e| CodecError::Decode {
        encoding: "float",
        reason: format!("{e}: {text:?}"),
    })?;
    Ok(Value::Float(parsed))
}
