//! In-process reference transport.
//!
//! `MemoryTransport` implements the whole collaborator contract inside one
//! process: storages keep per-path history, eval responders answer queries,
//! subscribers get pushed writes. One dedicated I/O thread owns all state and
//! delivers every callback, strictly serialized — the same scheduling model a
//! networked session exhibits, which is what makes this transport a faithful
//! stand-in for tests and embedded use.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::warn;

use crate::error::TransportError;
use crate::sample::ChangeKind;
use crate::timestamp::{Clock, Timestamp};

use super::{
    IncomingQuery, QueryHandler, QueryReply, RawSample, ReplyCallback, SampleCallback,
    SubscriberMode, Transport, TransportHandle,
};

enum IoMsg {
    Write {
        path: String,
        payload: Vec<u8>,
        encoding_flag: u16,
        kind_flag: u8,
        ack: Sender<()>,
    },
    Query {
        path_expr: String,
        predicate: String,
        on_reply: ReplyCallback,
    },
    DeclareStorage {
        path_expr: String,
        ack: Sender<u64>,
    },
    DeclareSubscriber {
        path_expr: String,
        callback: SampleCallback,
        ack: Sender<u64>,
    },
    DeclareEval {
        path_expr: String,
        handler: QueryHandler,
        ack: Sender<u64>,
    },
    Undeclare {
        id: u64,
    },
    EvalReply {
        query_id: u64,
        sample: RawSample,
    },
    EvalDone {
        query_id: u64,
    },
    Shutdown,
}

struct StoredSample {
    payload: Vec<u8>,
    encoding_flag: u16,
    timestamp: Timestamp,
}

struct StorageEntry {
    path_expr: String,
    /// Full per-path history, ordered by insertion (timestamps ascend because
    /// the transport clock is strictly monotonic).
    history: BTreeMap<String, Vec<StoredSample>>,
}

struct SubscriberEntry {
    path_expr: String,
    callback: SampleCallback,
}

struct EvalEntry {
    path_expr: String,
    handler: QueryHandler,
}

struct PendingQuery {
    on_reply: ReplyCallback,
    outstanding: usize,
}

/// An in-process transport session.
///
/// # Examples
///
/// ```
/// use canopy::transport::{MemoryTransport, Transport};
///
/// let transport = MemoryTransport::new();
/// let _storage = transport.add_storage("/demo/**").unwrap();
/// transport.write_data("/demo/a", b"1", 0x07, 0x00).unwrap();
/// ```
pub struct MemoryTransport {
    tx: Sender<IoMsg>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryTransport {
    /// Starts a session with its own I/O thread and clock.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded::<IoMsg>();
        let loop_tx = tx.clone();
        let join = thread::Builder::new()
            .name("canopy-io".to_string())
            .spawn(move || io_loop(rx, loop_tx, Clock::random()))
            .expect("failed to spawn canopy io thread");

        Self {
            tx,
            join: Mutex::new(Some(join)),
        }
    }

    /// Declares an in-memory storage persisting writes under `path_expr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is shut down.
    pub fn add_storage(&self, path_expr: &str) -> Result<TransportHandle, TransportError> {
        let (ack_tx, ack_rx) = unbounded::<u64>();
        self.send(IoMsg::DeclareStorage {
            path_expr: path_expr.to_string(),
            ack: ack_tx,
        })?;
        let id = ack_rx
            .recv()
            .map_err(|_| TransportError::disconnected("canopy-io"))?;
        Ok(self.handle_for(id))
    }

    fn send(&self, msg: IoMsg) -> Result<(), TransportError> {
        self.tx
            .send(msg)
            .map_err(|_| TransportError::disconnected("canopy-io"))
    }

    fn handle_for(&self, id: u64) -> TransportHandle {
        let tx = self.tx.clone();
        TransportHandle::new(Box::new(move || {
            let _ = tx.send(IoMsg::Undeclare { id });
        }))
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn query(
        &self,
        path_expr: &str,
        predicate: &str,
        on_reply: ReplyCallback,
    ) -> Result<(), TransportError> {
        self.send(IoMsg::Query {
            path_expr: path_expr.to_string(),
            predicate: predicate.to_string(),
            on_reply,
        })
    }

    fn declare_subscriber(
        &self,
        path_expr: &str,
        _mode: SubscriberMode,
        on_sample: SampleCallback,
    ) -> Result<TransportHandle, TransportError> {
        let (ack_tx, ack_rx) = unbounded::<u64>();
        self.send(IoMsg::DeclareSubscriber {
            path_expr: path_expr.to_string(),
            callback: on_sample,
            ack: ack_tx,
        })?;
        let id = ack_rx
            .recv()
            .map_err(|_| TransportError::disconnected("canopy-io"))?;
        Ok(self.handle_for(id))
    }

    fn declare_eval(
        &self,
        path_expr: &str,
        on_query: QueryHandler,
    ) -> Result<TransportHandle, TransportError> {
        let (ack_tx, ack_rx) = unbounded::<u64>();
        self.send(IoMsg::DeclareEval {
            path_expr: path_expr.to_string(),
            handler: on_query,
            ack: ack_tx,
        })?;
        let id = ack_rx
            .recv()
            .map_err(|_| TransportError::disconnected("canopy-io"))?;
        Ok(self.handle_for(id))
    }

    fn write_data(
        &self,
        path: &str,
        payload: &[u8],
        encoding_flag: u16,
        kind_flag: u8,
    ) -> Result<(), TransportError> {
        let (ack_tx, ack_rx) = unbounded::<()>();
        self.send(IoMsg::Write {
            path: path.to_string(),
            payload: payload.to_vec(),
            encoding_flag,
            kind_flag,
            ack: ack_tx,
        })?;
        ack_rx
            .recv()
            .map_err(|_| TransportError::disconnected("canopy-io"))
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        // Queued messages drain first; the I/O thread exits when it reaches
        // this marker. Sends from outstanding handles after that fail
        // silently.
        let _ = self.tx.send(IoMsg::Shutdown);
        let (dummy_tx, _) = unbounded::<IoMsg>();
        drop(std::mem::replace(&mut self.tx, dummy_tx));

        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                // Do not join here. In-flight callbacks may block on whoever
                // is dropping us; detaching lets the thread finish on its
                // own.
                drop(handle);
            }
        }
    }
}

struct IoState {
    clock: Clock,
    storages: HashMap<u64, StorageEntry>,
    subscribers: HashMap<u64, SubscriberEntry>,
    evals: HashMap<u64, EvalEntry>,
    pending: HashMap<u64, PendingQuery>,
    next_id: u64,
}

impl IoState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

fn io_loop(rx: Receiver<IoMsg>, tx: Sender<IoMsg>, clock: Clock) {
    let mut state = IoState {
        clock,
        storages: HashMap::new(),
        subscribers: HashMap::new(),
        evals: HashMap::new(),
        pending: HashMap::new(),
        next_id: 0,
    };

    while let Ok(msg) = rx.recv() {
        match msg {
            IoMsg::Write {
                path,
                payload,
                encoding_flag,
                kind_flag,
                ack,
            } => {
                handle_write(&mut state, &path, payload, encoding_flag, kind_flag);
                let _ = ack.send(());
            }
            IoMsg::Query {
                path_expr,
                predicate,
                on_reply,
            } => {
                handle_query(&mut state, &tx, &path_expr, &predicate, on_reply);
            }
            IoMsg::DeclareStorage { path_expr, ack } => {
                let id = state.next_id();
                state.storages.insert(
                    id,
                    StorageEntry {
                        path_expr,
                        history: BTreeMap::new(),
                    },
                );
                let _ = ack.send(id);
            }
            IoMsg::DeclareSubscriber {
                path_expr,
                callback,
                ack,
            } => {
                let id = state.next_id();
                state
                    .subscribers
                    .insert(id, SubscriberEntry { path_expr, callback });
                let _ = ack.send(id);
            }
            IoMsg::DeclareEval {
                path_expr,
                handler,
                ack,
            } => {
                let id = state.next_id();
                state.evals.insert(id, EvalEntry { path_expr, handler });
                let _ = ack.send(id);
            }
            IoMsg::Undeclare { id } => {
                state.storages.remove(&id);
                state.subscribers.remove(&id);
                state.evals.remove(&id);
            }
            IoMsg::EvalReply { query_id, sample } => {
                if let Some(pending) = state.pending.get_mut(&query_id) {
                    (pending.on_reply)(QueryReply::EvalData(sample));
                }
            }
            IoMsg::EvalDone { query_id } => {
                let finished = if let Some(pending) = state.pending.get_mut(&query_id) {
                    (pending.on_reply)(QueryReply::EvalFinal);
                    pending.outstanding -= 1;
                    pending.outstanding == 0
                } else {
                    false
                };
                if finished {
                    if let Some(mut pending) = state.pending.remove(&query_id) {
                        (pending.on_reply)(QueryReply::ReplyFinal);
                    }
                }
            }
            IoMsg::Shutdown => break,
        }
    }
}

fn handle_write(state: &mut IoState, path: &str, payload: Vec<u8>, encoding_flag: u16, kind_flag: u8) {
    let timestamp = state.clock.now();

    for storage in state.storages.values_mut() {
        if !path_expr_matches(&storage.path_expr, path) {
            continue;
        }
        if kind_flag == ChangeKind::Remove.flag() {
            storage.history.remove(path);
        } else {
            storage.history.entry(path.to_string()).or_default().push(StoredSample {
                payload: payload.clone(),
                encoding_flag,
                timestamp,
            });
        }
    }

    for sub in state.subscribers.values() {
        if path_expr_matches(&sub.path_expr, path) {
            (sub.callback)(RawSample {
                path: path.to_string(),
                payload: payload.clone(),
                encoding_flag,
                timestamp: Some(timestamp),
                kind_flag,
            });
        }
    }
}

fn handle_query(
    state: &mut IoState,
    tx: &Sender<IoMsg>,
    path_expr: &str,
    predicate: &str,
    mut on_reply: ReplyCallback,
) {
    for storage in state.storages.values() {
        if !exprs_may_intersect(&storage.path_expr, path_expr) {
            continue;
        }
        for (path, samples) in &storage.history {
            if !path_expr_matches(path_expr, path) {
                continue;
            }
            for sample in samples {
                on_reply(QueryReply::StorageData(RawSample {
                    path: path.clone(),
                    payload: sample.payload.clone(),
                    encoding_flag: sample.encoding_flag,
                    timestamp: Some(sample.timestamp),
                    kind_flag: ChangeKind::Put.flag(),
                }));
            }
        }
        on_reply(QueryReply::StorageFinal);
    }

    let matching_evals: Vec<u64> = state
        .evals
        .iter()
        .filter(|(_, e)| exprs_may_intersect(&e.path_expr, path_expr))
        .map(|(id, _)| *id)
        .collect();

    if matching_evals.is_empty() {
        on_reply(QueryReply::ReplyFinal);
        return;
    }

    let query_id = state.next_id();
    state.pending.insert(
        query_id,
        PendingQuery {
            on_reply,
            outstanding: matching_evals.len(),
        },
    );

    for id in matching_evals {
        let Some(eval) = state.evals.get(&id) else {
            continue;
        };
        let reply_tx = tx.clone();
        let done_tx = tx.clone();
        let query = IncomingQuery::new(
            path_expr,
            predicate,
            Box::new(move |sample| {
                let _ = reply_tx.send(IoMsg::EvalReply { query_id, sample });
            }),
            Box::new(move || {
                let _ = done_tx.send(IoMsg::EvalDone { query_id });
            }),
        );

        // A panicking handler must not take the I/O thread down; unwinding
        // drops `query`, which still signals this responder as done.
        if catch_unwind(AssertUnwindSafe(|| (eval.handler)(query))).is_err() {
            warn!(path_expr, "eval handler panicked; responder treated as empty");
        }
    }
}

/// True iff `expr` matches the concrete `path`. `*` matches within a single
/// segment, `**` matches any number of segments.
pub(crate) fn path_expr_matches(expr: &str, path: &str) -> bool {
    let expr: Vec<&str> = expr.split('/').collect();
    let path: Vec<&str> = path.split('/').collect();
    match_segments(&expr, &path)
}

fn match_segments(expr: &[&str], path: &[&str]) -> bool {
    match expr.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => (0..=path.len()).any(|i| match_segments(rest, &path[i..])),
        Some((seg_expr, rest)) => match path.split_first() {
            Some((seg, path_rest)) => segment_matches(seg_expr, seg) && match_segments(rest, path_rest),
            None => false,
        },
    }
}

fn segment_matches(pattern: &str, segment: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == segment;
    }
    let chunks: Vec<&str> = pattern.split('*').collect();
    let (first, last) = (chunks[0], chunks[chunks.len() - 1]);
    if !segment.starts_with(first) || segment.len() < first.len() + last.len() || !segment.ends_with(last)
    {
        return false;
    }
    let mut rest = &segment[first.len()..segment.len() - last.len()];
    for chunk in &chunks[1..chunks.len() - 1] {
        match rest.find(chunk) {
            Some(at) => rest = &rest[at + chunk.len()..],
            None => return false,
        }
    }
    true
}

/// Conservative check that a responder's expression can cover paths the query
/// addresses. A responder is consulted whenever either expression matches the
/// other treated as a concrete path; false positives only cost an empty reply.
fn exprs_may_intersect(a: &str, b: &str) -> bool {
    path_expr_matches(a, b) || path_expr_matches(b, a)
}
