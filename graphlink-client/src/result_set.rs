//! Per-request result channel.
//!
//! One `ResultSet` is created per submitted request and lives in the owning
//! connection's active-results map until its terminal frame arrives. The
//! reader task pushes streamed values in; the caller drains them out.

use crate::error::ClientError;
use graphlink_protocol::{MapEntries, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Default queue capacity per request.
const DEFAULT_CAPACITY: usize = 1000;

struct State {
    closed: bool,
    error: Option<ClientError>,
    aggregate_to: Option<String>,
    status_attributes: MapEntries,
}

struct Inner {
    request_id: Uuid,
    state: std::sync::Mutex<State>,
    /// Push side; taken on close so nothing can enqueue past the terminal
    /// state. Held across the send so close serializes behind a blocked push.
    sender: tokio::sync::Mutex<Option<mpsc::Sender<Value>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Value>>,
    queued: AtomicUsize,
    /// One-shot wake-up for every state change; `is_empty` waits on it.
    signal: watch::Sender<()>,
}

/// Buffered stream of a request's results with terminal state.
#[derive(Clone)]
pub struct ResultSet {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("request_id", &self.inner.request_id)
            .finish_non_exhaustive()
    }
}

impl ResultSet {
    pub(crate) fn new(request_id: Uuid) -> ResultSet {
        ResultSet::with_capacity(request_id, DEFAULT_CAPACITY)
    }

    pub(crate) fn with_capacity(request_id: Uuid, capacity: usize) -> ResultSet {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (signal, _) = watch::channel(());
        ResultSet {
            inner: Arc::new(Inner {
                request_id,
                state: std::sync::Mutex::new(State {
                    closed: false,
                    error: None,
                    aggregate_to: None,
                    status_attributes: Vec::new(),
                }),
                sender: tokio::sync::Mutex::new(Some(sender)),
                receiver: tokio::sync::Mutex::new(receiver),
                queued: AtomicUsize::new(0),
                signal,
            }),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.inner.request_id
    }

    /// The server's aggregation hint for this request, if any.
    pub fn aggregate_to(&self) -> Option<String> {
        self.inner.state.lock().unwrap().aggregate_to.clone()
    }

    pub(crate) fn set_aggregate_to(&self, hint: &str) {
        self.inner.state.lock().unwrap().aggregate_to = Some(hint.to_owned());
        self.notify();
    }

    /// Status attributes stamped by the terminal frame.
    pub fn status_attributes(&self) -> MapEntries {
        self.inner.state.lock().unwrap().status_attributes.clone()
    }

    pub(crate) fn set_status_attributes(&self, attributes: MapEntries) {
        self.inner.state.lock().unwrap().status_attributes = attributes;
        self.notify();
    }

    /// The terminal error, if the request failed.
    pub fn error(&self) -> Option<ClientError> {
        self.inner.state.lock().unwrap().error.clone()
    }

    fn is_closed(&self) -> bool {
        self.inner.state.lock().unwrap().closed
    }

    fn notify(&self) {
        self.inner.signal.send_replace(());
    }

    /// Enqueues one result. Blocks the caller (the reader task) while the
    /// queue is at capacity; silently drops the value if the set is closed.
    pub(crate) async fn add_result(&self, value: Value) {
        let sender = self.inner.sender.lock().await;
        if let Some(tx) = sender.as_ref() {
            if tx.send(value).await.is_ok() {
                self.inner.queued.fetch_add(1, Ordering::SeqCst);
                self.notify();
            }
        }
    }

    /// Closes the queue and wakes all waiters. Idempotent. Buffered results
    /// remain drainable; new results are dropped.
    pub async fn close(&self) {
        self.inner.state.lock().unwrap().closed = true;
        self.inner.sender.lock().await.take();
        self.notify();
    }

    /// Closes with a terminal error. The first error sticks.
    pub(crate) async fn fail(&self, error: ClientError) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.error.is_none() {
                state.error = Some(error);
            }
        }
        self.close().await;
    }

    /// Blocks until a value is available or the terminal state is reached.
    pub async fn one(&self) -> Option<Value> {
        let mut receiver = self.inner.receiver.lock().await;
        let value = receiver.recv().await;
        if value.is_some() {
            self.inner.queued.fetch_sub(1, Ordering::SeqCst);
            self.notify();
        }
        value
    }

    /// Drains to completion. Errors if the set terminated with a failure.
    pub async fn all(&self) -> Result<Vec<Value>, ClientError> {
        let mut results = Vec::new();
        while let Some(value) = self.one().await {
            results.push(value);
        }
        match self.error() {
            Some(error) => Err(error),
            None => Ok(results),
        }
    }

    /// Hard emptiness predicate: true iff the queue has no item and no
    /// further item can arrive. While the set is empty but still open this
    /// waits for the next state change and re-evaluates.
    pub async fn is_empty(&self) -> bool {
        let mut signal = self.inner.signal.subscribe();
        loop {
            if self.inner.queued.load(Ordering::SeqCst) > 0 {
                return false;
            }
            if self.is_closed() {
                return true;
            }
            if signal.changed().await.is_err() {
                return self.inner.queued.load(Ordering::SeqCst) == 0;
            }
        }
    }

    /// Stream-style consumer endpoint. Yields values until the stream ends;
    /// a terminal error is yielded once, last.
    pub fn channel(&self) -> ResultChannel<'_> {
        ResultChannel {
            results: self,
            error_emitted: false,
        }
    }
}

/// Consumer endpoint returned by [`ResultSet::channel`].
pub struct ResultChannel<'a> {
    results: &'a ResultSet,
    error_emitted: bool,
}

impl ResultChannel<'_> {
    pub async fn next(&mut self) -> Option<Result<Value, ClientError>> {
        if let Some(value) = self.results.one().await {
            return Some(Ok(value));
        }
        if !self.error_emitted {
            self.error_emitted = true;
            if let Some(error) = self.results.error() {
                return Some(Err(error));
            }
        }
        None
    }
}
