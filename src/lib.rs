//! # canopy - A document-oriented access layer for pub/sub/query meshes
//!
//! canopy lets a caller address a tree of named resources with glob-like
//! selectors, write typed values, run scatter-gather reads across an
//! unknown number of distributed responders and subscribe to change
//! notifications, all without touching the raw wire protocol.
//!
//! ## Core Concepts
//!
//! - **Path**: a canonical, wildcard-free resource identifier
//! - **Selector**: a path expression plus optional filter/properties/fragment,
//!   addressing a set of resources
//! - **Value**: a typed payload that knows its own wire encoding
//! - **Workspace**: the orchestrator turning puts, gets, subscriptions and
//!   evals into transport operations
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use canopy::transport::MemoryTransport;
//! use canopy::{DispatchPolicy, Path, Selector, Value, Workspace};
//!
//! let transport = Arc::new(MemoryTransport::new());
//! let _storage = transport.add_storage("/demo/**")?;
//!
//! let ws = Workspace::new(transport, Path::parse("/demo")?, DispatchPolicy::Inline)?;
//! ws.put(&Path::parse("sensor/temp")?, Value::Float(21.5))?;
//!
//! for data in ws.get(&Selector::parse("sensor/**")?)? {
//!     println!("{data}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod encoding;
pub mod error;
pub mod path;
pub mod sample;
pub mod selector;
pub mod timestamp;
pub mod value;

// The transport seam and the orchestrator
pub mod transport;
pub mod workspace;

// Re-export primary types at crate root for convenience
pub use encoding::{Encoding, EncodingRegistry};
pub use error::{AddressError, CanopyError, CanopyResult, CodecError, TransportError};
pub use path::Path;
pub use sample::{Change, ChangeKind, Data};
pub use selector::Selector;
pub use timestamp::{Clock, Timestamp};
pub use value::{Properties, Value};
pub use workspace::{
    ChangeListener, DispatchPolicy, DispatchPool, Eval, SubscriptionId, Workspace,
};
