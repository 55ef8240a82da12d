//! Error types for canopy.
//!
//! All errors are strongly typed using thiserror. This enables pattern
//! matching on specific error conditions and provides clear error messages.
//! The taxonomy mirrors the propagation policy: address and transport errors
//! surface synchronously to the caller, codec errors during aggregation are
//! recovered locally.

use thiserror::Error;

/// Errors raised while constructing a [`Path`](crate::Path) or
/// [`Selector`](crate::Selector) from a string.
#[derive(Debug, Error)]
pub enum AddressError {
    /// The string is not a valid path.
    #[error("invalid path {input:?}: {reason}")]
    InvalidPath {
        /// Offending input string.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The string is not a valid selector.
    #[error("invalid selector {input:?}")]
    InvalidSelector {
        /// Offending input string.
        input: String,
    },
}

/// Errors raised while decoding wire payloads into values.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The encoding flag is not part of the wire contract.
    #[error("unknown encoding flag {flag:#04x}")]
    UnknownEncoding {
        /// The flag as received.
        flag: u16,
    },

    /// The change-kind flag is not part of the wire contract.
    #[error("unknown change kind flag {flag:#04x}")]
    UnknownKind {
        /// The flag as received.
        flag: u8,
    },

    /// A payload could not be decoded as its declared encoding.
    #[error("cannot decode payload as {encoding}: {reason}")]
    Decode {
        /// Name of the declared encoding.
        encoding: &'static str,
        /// Why decoding failed.
        reason: String,
    },
}

/// Errors reported by the transport collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport rejected the operation.
    #[error("rejected: {message}")]
    Rejected {
        /// Transport-supplied detail.
        message: String,
    },

    /// An internal channel to the transport was closed.
    #[error("disconnected: {channel}")]
    Disconnected {
        /// Which channel went away.
        channel: String,
    },
}

impl TransportError {
    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Creates a disconnection error.
    #[must_use]
    pub fn disconnected(channel: impl Into<String>) -> Self {
        Self::Disconnected {
            channel: channel.into(),
        }
    }
}

/// Top-level error type for canopy operations.
#[derive(Debug, Error)]
pub enum CanopyError {
    /// Path or selector construction failed.
    #[error("address error: {0}")]
    Address(#[from] AddressError),

    /// A payload could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The transport rejected an operation. `context` names the selector or
    /// path the operation was issued for.
    #[error("transport failure on {context}: {source}")]
    Transport {
        /// The selector or path involved.
        context: String,
        /// The underlying transport error.
        #[source]
        source: TransportError,
    },
}

impl CanopyError {
    /// Wraps a transport error with the selector/path it was issued for.
    #[must_use]
    pub fn transport(context: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    /// Returns true if this is an address error.
    #[must_use]
    pub const fn is_address(&self) -> bool {
        matches!(self, Self::Address(_))
    }

    /// Returns true if this is a codec error.
    #[must_use]
    pub const fn is_codec(&self) -> bool {
        matches!(self, Self::Codec(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Result type alias for canopy operations.
pub type CanopyResult<T> = Result<T, CanopyError>;
