//! The workspace: document-oriented operations over the transport.
//!
//! A [`Workspace`] turns `put`/`update`/`remove` into single writes, `get`
//! into a scatter-gather read merged per path by timestamp, `subscribe` into
//! a decode-and-dispatch pipeline and `register_eval` into a query
//! responder. It hides the raw wire protocol entirely: callers deal in
//! [`Path`]s, [`Selector`]s, [`Value`]s and [`Change`]s.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crossbeam_channel::bounded;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::encoding::{Encoding, EncodingRegistry};
use crate::error::{CanopyError, CanopyResult};
use crate::path::Path;
use crate::sample::{Change, ChangeKind, Data};
use crate::selector::Selector;
use crate::timestamp::Clock;
use crate::transport::{
    IncomingQuery, QueryReply, RawSample, SubscriberMode, Transport, TransportHandle,
};
use crate::value::{Properties, Value};

mod dispatch;

pub use dispatch::{DispatchPolicy, DispatchPool};

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives change notifications for one subscription.
///
/// Batches currently carry exactly one change; the slice signature leaves
/// room for transports that learn to batch. A panicking listener is logged
/// and does not affect its subscription or other listeners.
pub trait ChangeListener: Send + Sync {
    /// Called once per notification batch.
    fn on_changes(&self, changes: &[Change]);
}

impl<F> ChangeListener for F
where
    F: Fn(&[Change]) + Send + Sync,
{
    fn on_changes(&self, changes: &[Change]) {
        self(changes);
    }
}

/// Computes a value on demand in response to a query.
///
/// An `Err` (or a panic) degrades to an empty reply set: a broken evaluator
/// looks like "no data" to the querier instead of breaking its aggregation.
pub trait Eval: Send + Sync {
    /// Produces the value for `path` given the query's properties.
    ///
    /// # Errors
    ///
    /// Any error is logged on the responder side and converted to an empty
    /// reply; it never reaches the querier.
    fn eval(&self, path: &Path, properties: &Properties) -> CanopyResult<Value>;
}

impl<F> Eval for F
where
    F: Fn(&Path, &Properties) -> CanopyResult<Value> + Send + Sync,
{
    fn eval(&self, path: &Path, properties: &Properties) -> CanopyResult<Value> {
        self(path, properties)
    }
}

/// Per-`get` aggregation: one timestamp-ordered set per path. The set
/// deduplicates equal timestamps, which is the last-writer-wins merge unit.
type Aggregation = BTreeMap<Path, BTreeSet<Data>>;

/// A view over a subtree of named resources.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use canopy::transport::MemoryTransport;
/// use canopy::{DispatchPolicy, Path, Selector, Value, Workspace};
///
/// let transport = Arc::new(MemoryTransport::new());
/// let _storage = transport.add_storage("/demo/**").unwrap();
///
/// let ws = Workspace::new(transport, Path::parse("/demo").unwrap(), DispatchPolicy::Inline)
///     .unwrap();
/// ws.put(&Path::parse("sensor/temp").unwrap(), Value::Float(21.5)).unwrap();
///
/// let results = ws.get(&Selector::parse("sensor/*").unwrap()).unwrap();
/// assert_eq!(results.len(), 1);
/// assert_eq!(results[0].value, Value::Float(21.5));
/// ```
pub struct Workspace {
    transport: Arc<dyn Transport>,
    root: Path,
    registry: Arc<EncodingRegistry>,
    policy: DispatchPolicy,
    clock: Arc<Clock>,
    subscriptions: Mutex<HashMap<SubscriptionId, TransportHandle>>,
    evals: Mutex<HashMap<String, TransportHandle>>,
}

impl Workspace {
    /// Creates a workspace rooted at `root`.
    ///
    /// Relative paths and selectors are resolved against `root`. Use
    /// [`DispatchPolicy::Pooled`] whenever listeners or evals call back into
    /// the workspace; see [`DispatchPolicy`] for the deadlock rationale.
    ///
    /// # Errors
    ///
    /// Returns `AddressError::InvalidPath` if `root` is relative.
    pub fn new(
        transport: Arc<dyn Transport>,
        root: Path,
        policy: DispatchPolicy,
    ) -> CanopyResult<Self> {
        if root.is_relative() {
            return Err(crate::error::AddressError::InvalidPath {
                input: root.as_str().to_string(),
                reason: "workspace root must be absolute".to_string(),
            }
            .into());
        }
        Ok(Self {
            transport,
            root,
            registry: EncodingRegistry::standard(),
            policy,
            clock: Arc::new(Clock::random()),
            subscriptions: Mutex::new(HashMap::new()),
            evals: Mutex::new(HashMap::new()),
        })
    }

    /// The workspace root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute_path(&self, path: &Path) -> Path {
        if path.is_relative() {
            path.with_prefix(&self.root)
        } else {
            path.clone()
        }
    }

    fn absolute_selector(&self, selector: &Selector) -> Selector {
        if selector.is_relative() {
            selector.with_prefix(&self.root)
        } else {
            selector.clone()
        }
    }

    /// Writes `value` at `path`.
    ///
    /// # Errors
    ///
    /// Returns a transport error wrapped with the failing path.
    pub fn put(&self, path: &Path, value: impl Into<Value>) -> CanopyResult<()> {
        self.write(path, &value.into(), ChangeKind::Put)
    }

    /// Updates the value at `path` (a delta-style write; storages decide how
    /// to apply it).
    ///
    /// # Errors
    ///
    /// Returns a transport error wrapped with the failing path.
    pub fn update(&self, path: &Path, value: impl Into<Value>) -> CanopyResult<()> {
        self.write(path, &value.into(), ChangeKind::Update)
    }

    /// Removes the value at `path`.
    ///
    /// # Errors
    ///
    /// Returns a transport error wrapped with the failing path.
    pub fn remove(&self, path: &Path) -> CanopyResult<()> {
        let abs = self.absolute_path(path);
        self.transport
            .write_data(abs.as_str(), &[], Encoding::Raw.flag(), ChangeKind::Remove.flag())
            .map_err(|e| CanopyError::transport(abs.as_str(), e))
    }

    fn write(&self, path: &Path, value: &Value, kind: ChangeKind) -> CanopyResult<()> {
        let abs = self.absolute_path(path);
        self.transport
            .write_data(
                abs.as_str(),
                &value.encode(),
                value.encoding().flag(),
                kind.flag(),
            )
            .map_err(|e| CanopyError::transport(abs.as_str(), e))
    }

    /// Scatter-gather read: queries every responder matching `selector`,
    /// merges replies per path by timestamp, and blocks until the transport
    /// signals that all responders answered.
    ///
    /// With a plain selector every path yields exactly one entry, the one
    /// with the greatest timestamp (last writer wins). With a series
    /// selector ([`Selector::is_series_selector`]) every retained entry is
    /// returned, ascending by timestamp within each path.
    ///
    /// An entry that fails to decode is logged and skipped; the rest of the
    /// result is unaffected. There is no timeout: callers needing bounded
    /// latency must layer one externally.
    ///
    /// # Errors
    ///
    /// Returns a transport error (wrapped with the selector) when the query
    /// is rejected outright or the reply stream is cut off.
    pub fn get(&self, selector: &Selector) -> CanopyResult<Vec<Data>> {
        let sel = self.absolute_selector(selector);
        let series = sel.is_series_selector();

        let state: Arc<Mutex<Aggregation>> = Arc::new(Mutex::new(BTreeMap::new()));
        let (done_tx, done_rx) = bounded::<()>(1);

        let cb_state = Arc::clone(&state);
        let registry = Arc::clone(&self.registry);
        let clock = Arc::clone(&self.clock);
        let mut done_tx = Some(done_tx);

        self.transport
            .query(
                sel.path_expr(),
                &sel.optional_part(),
                Box::new(move |reply| match reply {
                    QueryReply::StorageData(sample) | QueryReply::EvalData(sample) => {
                        match decode_data(&registry, &clock, sample) {
                            Ok(data) => merge(&cb_state, data),
                            Err(err) => {
                                warn!(%err, "skipping undecodable reply entry");
                            }
                        }
                    }
                    QueryReply::StorageFinal | QueryReply::EvalFinal => {}
                    QueryReply::ReplyFinal => {
                        if let Some(tx) = done_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                }),
            )
            .map_err(|e| CanopyError::transport(sel.to_string(), e))?;

        // Block until the I/O thread delivers ReplyFinal.
        done_rx.recv().map_err(|_| {
            CanopyError::transport(
                sel.to_string(),
                crate::error::TransportError::disconnected("query reply stream"),
            )
        })?;

        let map = std::mem::take(&mut *state.lock().expect("aggregation lock poisoned"));
        let mut out = Vec::new();
        if series {
            for (_, entries) in map {
                out.extend(entries);
            }
        } else {
            for (_, entries) in map {
                if let Some(latest) = entries.into_iter().next_back() {
                    out.push(latest);
                }
            }
        }
        Ok(out)
    }

    /// Subscribes `listener` to changes of the resources matching
    /// `selector`. Each transport event becomes a one-element [`Change`]
    /// batch, dispatched per the workspace's [`DispatchPolicy`].
    ///
    /// # Errors
    ///
    /// Returns a transport error wrapped with the selector when the
    /// declaration is rejected.
    pub fn subscribe(
        &self,
        selector: &Selector,
        listener: Arc<dyn ChangeListener>,
    ) -> CanopyResult<SubscriptionId> {
        let sel = self.absolute_selector(selector);

        let registry = Arc::clone(&self.registry);
        let clock = Arc::clone(&self.clock);
        let policy = self.policy.clone();

        let on_sample: crate::transport::SampleCallback = Box::new(move |sample| {
            let change = match decode_change(&registry, &clock, sample) {
                Ok(change) => change,
                Err(err) => {
                    warn!(%err, "dropping undecodable notification");
                    return;
                }
            };
            let listener = Arc::clone(&listener);
            policy.dispatch(Box::new(move || {
                let batch = [change];
                if catch_unwind(AssertUnwindSafe(|| listener.on_changes(&batch))).is_err() {
                    warn!(path = %batch[0].path, "change listener panicked; subscription stays live");
                }
            }));
        });

        let handle = self
            .transport
            .declare_subscriber(sel.path_expr(), SubscriberMode::Push, on_sample)
            .map_err(|e| CanopyError::transport(sel.to_string(), e))?;

        let id = SubscriptionId::new();
        self.subscriptions
            .lock()
            .expect("subscription registry lock poisoned")
            .insert(id, handle);
        Ok(id)
    }

    /// Stops future dispatch for `id`. Asynchronous: a callback already
    /// handed to the pool may still run. Returns false for an unknown id.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let handle = self
            .subscriptions
            .lock()
            .expect("subscription registry lock poisoned")
            .remove(&id);
        match handle {
            Some(handle) => {
                handle.undeclare();
                true
            }
            None => false,
        }
    }

    /// Installs `eval` as a query responder at `path`. On each matching
    /// query the evaluator runs per the workspace's [`DispatchPolicy`]; its
    /// value is stamped with the workspace clock and sent back as a
    /// single-entry reply.
    ///
    /// # Errors
    ///
    /// Returns a transport error wrapped with the path when the declaration
    /// is rejected.
    pub fn register_eval(&self, path: &Path, eval: Arc<dyn Eval>) -> CanopyResult<()> {
        let abs = self.absolute_path(path);

        let policy = self.policy.clone();
        let clock = Arc::clone(&self.clock);
        let reply_path = abs.clone();

        let handler: crate::transport::QueryHandler = Box::new(move |query: IncomingQuery| {
            let eval = Arc::clone(&eval);
            let clock = Arc::clone(&clock);
            let path = reply_path.clone();
            let properties = query_properties(&query);
            policy.dispatch(Box::new(move || {
                match catch_unwind(AssertUnwindSafe(|| eval.eval(&path, &properties))) {
                    Ok(Ok(value)) => {
                        query.reply(RawSample {
                            path: path.as_str().to_string(),
                            payload: value.encode(),
                            encoding_flag: value.encoding().flag(),
                            timestamp: Some(clock.now()),
                            kind_flag: ChangeKind::Put.flag(),
                        });
                    }
                    Ok(Err(err)) => {
                        warn!(%err, path = %path, "eval failed; replying with empty set");
                    }
                    Err(_) => {
                        warn!(path = %path, "eval panicked; replying with empty set");
                    }
                }
                // `query` drops here, telling the transport this responder
                // is finished.
            }));
        });

        let handle = self
            .transport
            .declare_eval(abs.as_str(), handler)
            .map_err(|e| CanopyError::transport(abs.as_str(), e))?;

        self.evals
            .lock()
            .expect("eval registry lock poisoned")
            .insert(abs.as_str().to_string(), handle);
        Ok(())
    }

    /// Removes the responder installed at `path`. Asynchronous: in-flight
    /// evaluations are not cancelled. Returns false if none was registered.
    pub fn unregister_eval(&self, path: &Path) -> bool {
        let abs = self.absolute_path(path);
        let handle = self
            .evals
            .lock()
            .expect("eval registry lock poisoned")
            .remove(abs.as_str());
        match handle {
            Some(handle) => {
                handle.undeclare();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Merges one decoded entry into the aggregation.
///
/// Equal-timestamp entries collapse into one (the first kept); a collision
/// where path or value differ means the deployment-wide uniqueness
/// assumption was violated, which is logged but not treated as fatal.
fn merge(state: &Mutex<Aggregation>, data: Data) {
    let mut map = state.lock().expect("aggregation lock poisoned");
    let entries = map.entry(data.path.clone()).or_default();
    if let Some(existing) = entries.get(&data) {
        if existing.conflicts_with(&data) {
            warn!(kept = %existing, dropped = %data, "timestamp collision across distinct writes");
        }
        return;
    }
    entries.insert(data);
}

fn decode_data(
    registry: &EncodingRegistry,
    clock: &Clock,
    sample: RawSample,
) -> CanopyResult<Data> {
    let path = Path::parse(&sample.path)?;
    let value = registry.decode(sample.encoding_flag, &sample.payload)?;
    let timestamp = match sample.timestamp {
        Some(ts) => ts,
        None => {
            // Best-effort fallback; breaks the global-uniqueness assumption.
            warn!(path = %path, "reply carried no timestamp; synthesizing from local clock");
            clock.now()
        }
    };
    Ok(Data::new(path, value, timestamp))
}

fn decode_change(
    registry: &EncodingRegistry,
    clock: &Clock,
    sample: RawSample,
) -> CanopyResult<Change> {
    let path = Path::parse(&sample.path)?;
    let kind = ChangeKind::from_flag(sample.kind_flag)?;
    let timestamp = match sample.timestamp {
        Some(ts) => ts,
        None => {
            warn!(path = %path, "notification carried no timestamp; synthesizing from local clock");
            clock.now()
        }
    };
    Ok(match kind {
        ChangeKind::Put => {
            Change::put(path, registry.decode(sample.encoding_flag, &sample.payload)?, timestamp)
        }
        ChangeKind::Update => {
            Change::update(path, registry.decode(sample.encoding_flag, &sample.payload)?, timestamp)
        }
        ChangeKind::Remove => Change::removal(path, timestamp),
    })
}

/// Properties of an incoming query, taken from the predicate's `(...)`
/// section. An unparsable predicate yields an empty map.
fn query_properties(query: &IncomingQuery) -> Properties {
    Selector::parse(&format!("{}{}", query.path_expr(), query.predicate()))
        .map(|sel| sel.properties_map())
        .unwrap_or_default()
}
