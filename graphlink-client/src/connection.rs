//! Connection management: one transport, one reader task, one results map.

use crate::auth::AuthInfo;
use crate::error::ClientError;
use crate::protocol::{self, MessageSender};
use crate::result_set::ResultSet;
use crate::tls::TlsOptions;
use crate::transport::{self, TransporterType};
use graphlink_protocol::Request;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Default keep-alive ping interval.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Default per-frame write deadline.
pub const DEFAULT_WRITE_DEADLINE: Duration = Duration::from_secs(3);

/// Default websocket handshake timeout.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default transport I/O buffer size (128 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Credentials for the upgrade request and SASL challenges.
    pub auth: Option<AuthInfo>,
    /// TLS options; `None` connects in the clear.
    pub tls: Option<TlsOptions>,
    /// Idle keep-alive ping interval.
    pub keep_alive_interval: Duration,
    /// Deadline applied to each frame write.
    pub write_deadline: Duration,
    /// Websocket handshake timeout.
    pub connection_timeout: Duration,
    /// Transport read buffer size.
    pub read_buffer_size: usize,
    /// Transport write buffer size.
    pub write_buffer_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> ConnectionSettings {
        ConnectionSettings {
            auth: None,
            tls: None,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            write_deadline: DEFAULT_WRITE_DEADLINE,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Connection lifecycle. Transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Established,
    Closed,
    ClosedDueToError,
}

/// Active-results map: one entry per in-flight request id, between write
/// and terminal frame.
pub(crate) struct ActiveResults {
    map: std::sync::Mutex<HashMap<Uuid, ResultSet>>,
}

impl ActiveResults {
    pub(crate) fn new() -> ActiveResults {
        ActiveResults {
            map: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn store(&self, result_set: ResultSet) {
        self.map
            .lock()
            .unwrap()
            .insert(result_set.request_id(), result_set);
    }

    pub(crate) fn load(&self, request_id: &Uuid) -> Option<ResultSet> {
        self.map.lock().unwrap().get(request_id).cloned()
    }

    pub(crate) fn remove(&self, request_id: &Uuid) -> Option<ResultSet> {
        self.map.lock().unwrap().remove(request_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    /// Empties the map and fails every live result set.
    pub(crate) async fn drain_failed(&self, error: ClientError) {
        let drained: Vec<ResultSet> = self.map.lock().unwrap().drain().map(|(_, rs)| rs).collect();
        for result_set in drained {
            result_set.fail(error.clone()).await;
        }
    }
}

struct Shared {
    sender: Arc<MessageSender>,
    results: Arc<ActiveResults>,
    state: std::sync::Mutex<ConnectionState>,
}

impl Shared {
    /// Failure fan-out: flips the state, closes the transport, fails every
    /// pending result set. No-op once the connection is closed.
    async fn fail(&self, error: ClientError) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != ConnectionState::Established {
                return;
            }
            *state = ConnectionState::ClosedDueToError;
        }
        tracing::error!(error = %error, "connection failed; draining in-flight requests");
        self.sender.close().await;
        self.results.drain_failed(error).await;
    }
}

/// One websocket bound to one protocol engine, plus its in-flight requests.
pub(crate) struct Connection {
    shared: Arc<Shared>,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    keep_alive_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Dials the transport and starts the reader and keep-alive tasks.
    pub(crate) async fn connect(
        url: &str,
        transporter: TransporterType,
        settings: &ConnectionSettings,
    ) -> Result<Connection, ClientError> {
        let (writer, reader) = transport::connect_transport(transporter, url, settings).await?;
        let sender = Arc::new(MessageSender::new(writer));
        let results = Arc::new(ActiveResults::new());
        let shared = Arc::new(Shared {
            sender: sender.clone(),
            results: results.clone(),
            state: std::sync::Mutex::new(ConnectionState::Established),
        });

        let reader_task = tokio::spawn({
            let shared = shared.clone();
            let auth = settings.auth.clone();
            async move {
                if let Err(error) =
                    protocol::read_loop(reader, shared.sender.clone(), shared.results.clone(), auth)
                        .await
                {
                    shared.fail(error).await;
                }
            }
        });

        let keep_alive_task = tokio::spawn({
            let sender = sender.clone();
            let interval = settings.keep_alive_interval;
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if sender.ping().await.is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Connection {
            shared,
            reader_task: std::sync::Mutex::new(Some(reader_task)),
            keep_alive_task: std::sync::Mutex::new(Some(keep_alive_task)),
        })
    }

    /// Registers a result set for the request, then writes it. Registration
    /// happens first so a response frame racing the write cannot be dropped.
    pub(crate) async fn write(&self, request: &Request) -> Result<ResultSet, ClientError> {
        if !self.is_healthy() {
            return Err(ClientError::ConnectionClosed);
        }
        let result_set = ResultSet::new(request.request_id);
        self.shared.results.store(result_set.clone());

        match self.shared.sender.send(request).await {
            Ok(()) => Ok(result_set),
            Err(error) => {
                // A failed write fails only this submit; a fatal transport
                // error additionally retires the connection.
                self.shared.results.remove(&request.request_id);
                if error.retires_connection() {
                    self.shared.fail(error.clone()).await;
                }
                Err(error)
            }
        }
    }

    /// Number of in-flight requests; the pool's load metric.
    pub(crate) fn active_results(&self) -> usize {
        self.shared.results.len()
    }

    pub(crate) fn is_healthy(&self) -> bool {
        *self.shared.state.lock().unwrap() == ConnectionState::Established
    }

    /// Graceful close. Idempotent; remaining in-flight requests are failed.
    pub(crate) async fn close(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state != ConnectionState::Established {
                return;
            }
            *state = ConnectionState::Closed;
        }
        tracing::debug!("closing connection");
        if let Some(task) = self.keep_alive_task.lock().unwrap().take() {
            task.abort();
        }
        self.shared.sender.close().await;
        if let Some(task) = self.reader_task.lock().unwrap().take() {
            task.abort();
        }
        self.shared
            .results
            .drain_failed(ClientError::ConnectionClosed)
            .await;
    }
}
