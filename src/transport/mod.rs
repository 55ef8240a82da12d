//! The transport collaborator seam.
//!
//! The workspace consumes the underlying publish/subscribe/query session
//! exclusively through the [`Transport`] trait: one scatter-gather query
//! primitive, subscriber and eval declaration, and a single-sample write.
//! Connection establishment, wire message encoding, peer discovery and
//! routing all live behind this seam.
//!
//! Every asynchronous callback (query replies, subscriber samples, incoming
//! eval queries) is delivered strictly serialized on the transport's one I/O
//! thread.

use crate::error::TransportError;
use crate::timestamp::Timestamp;

mod memory;

pub use memory::MemoryTransport;

/// One sample as it travels on the wire: a concrete path, an undecoded
/// payload with its encoding flag, an optional timestamp and a change-kind
/// flag.
#[derive(Debug, Clone)]
pub struct RawSample {
    /// Concrete (wildcard-free) path string.
    pub path: String,
    /// Undecoded payload bytes.
    pub payload: Vec<u8>,
    /// Wire encoding flag; see [`Encoding`](crate::Encoding).
    pub encoding_flag: u16,
    /// Write timestamp, if the responder supplied one.
    pub timestamp: Option<Timestamp>,
    /// Wire change-kind flag; see [`ChangeKind`](crate::ChangeKind).
    pub kind_flag: u8,
}

/// One reply event of a scatter-gather query.
///
/// A query produces zero or more `StorageData`/`EvalData` samples,
/// interleaved with per-responder `StorageFinal`/`EvalFinal` markers, and is
/// terminated by exactly one `ReplyFinal`.
#[derive(Debug)]
pub enum QueryReply {
    /// A sample from a storage responder.
    StorageData(RawSample),
    /// One storage responder finished answering.
    StorageFinal,
    /// A sample from an eval responder.
    EvalData(RawSample),
    /// One eval responder finished answering.
    EvalFinal,
    /// All responders finished; no further events will arrive.
    ReplyFinal,
}

/// Subscription delivery mode. The core uses `Push`; `Pull` is reserved for
/// transports that support on-demand delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberMode {
    /// The transport pushes each sample as it happens.
    Push,
    /// Samples are buffered until pulled (reserved).
    Pull,
}

/// Receives the reply events of one query, in transport-delivery order.
pub type ReplyCallback = Box<dyn FnMut(QueryReply) + Send>;

/// Receives subscription samples.
pub type SampleCallback = Box<dyn Fn(RawSample) + Send + Sync>;

/// Receives incoming queries addressed to an eval responder.
pub type QueryHandler = Box<dyn Fn(IncomingQuery) + Send + Sync>;

/// An incoming query handed to an eval responder.
///
/// The responder replies with [`IncomingQuery::reply`], zero or more times,
/// then drops the query; the drop tells the transport this responder is
/// finished. Dropping without replying yields an empty reply set.
pub struct IncomingQuery {
    path_expr: String,
    predicate: String,
    replier: Box<dyn Fn(RawSample) + Send + Sync>,
    done: Option<Box<dyn FnOnce() + Send>>,
}

impl IncomingQuery {
    /// Assembles an incoming query. Transports call this; responders only
    /// consume it.
    #[must_use]
    pub fn new(
        path_expr: impl Into<String>,
        predicate: impl Into<String>,
        replier: Box<dyn Fn(RawSample) + Send + Sync>,
        done: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self {
            path_expr: path_expr.into(),
            predicate: predicate.into(),
            replier,
            done: Some(done),
        }
    }

    /// The queried path expression.
    #[must_use]
    pub fn path_expr(&self) -> &str {
        &self.path_expr
    }

    /// The query predicate (the selector's optional part).
    #[must_use]
    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    /// Sends one reply sample back to the querier.
    pub fn reply(&self, sample: RawSample) {
        (self.replier)(sample);
    }
}

impl Drop for IncomingQuery {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            done();
        }
    }
}

impl std::fmt::Debug for IncomingQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingQuery")
            .field("path_expr", &self.path_expr)
            .field("predicate", &self.predicate)
            .finish_non_exhaustive()
    }
}

/// Handle for a declared subscriber or eval responder.
///
/// Undeclaration is asynchronous and best-effort: it stops future dispatch
/// but does not wait for callbacks already in flight. Dropping the handle
/// undeclares too.
pub struct TransportHandle {
    undeclare: Option<Box<dyn FnOnce() + Send>>,
}

impl TransportHandle {
    /// Wraps an undeclare action.
    #[must_use]
    pub fn new(undeclare: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            undeclare: Some(undeclare),
        }
    }

    /// Explicitly undeclares. Idempotent with the drop path.
    pub fn undeclare(mut self) {
        if let Some(f) = self.undeclare.take() {
            f();
        }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        if let Some(f) = self.undeclare.take() {
            f();
        }
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle").finish_non_exhaustive()
    }
}

/// The four primitives the workspace consumes.
pub trait Transport: Send + Sync {
    /// Issues one scatter-gather query. `on_reply` receives every reply
    /// event for this query, serialized on the I/O thread, terminated by
    /// exactly one [`QueryReply::ReplyFinal`].
    ///
    /// # Errors
    ///
    /// Returns an error when the transport rejects the query outright; in
    /// that case `on_reply` is never invoked.
    fn query(
        &self,
        path_expr: &str,
        predicate: &str,
        on_reply: ReplyCallback,
    ) -> Result<(), TransportError>;

    /// Declares a subscriber for the matching resources.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport rejects the declaration.
    fn declare_subscriber(
        &self,
        path_expr: &str,
        mode: SubscriberMode,
        on_sample: SampleCallback,
    ) -> Result<TransportHandle, TransportError>;

    /// Declares an eval responder answering queries that match `path_expr`.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport rejects the declaration.
    fn declare_eval(
        &self,
        path_expr: &str,
        on_query: QueryHandler,
    ) -> Result<TransportHandle, TransportError>;

    /// Writes one sample.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport rejects the write.
    fn write_data(
        &self,
        path: &str,
        payload: &[u8],
        encoding_flag: u16,
        kind_flag: u8,
    ) -> Result<(), TransportError>;
}
