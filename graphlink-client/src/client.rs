//! High-level client API: submission, sessions, transactions.

use crate::auth::AuthInfo;
use crate::connection::{
    ConnectionSettings, DEFAULT_BUFFER_SIZE, DEFAULT_CONNECTION_TIMEOUT,
    DEFAULT_KEEP_ALIVE_INTERVAL, DEFAULT_WRITE_DEADLINE,
};
use crate::error::ClientError;
use crate::pool::{
    LoadBalancingPool, DEFAULT_INITIAL_CONCURRENT_CONNECTIONS, DEFAULT_NEW_CONNECTION_THRESHOLD,
};
use crate::result_set::ResultSet;
use crate::tls::TlsOptions;
use crate::transport::TransporterType;
use graphlink_protocol::{Bytecode, Request, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Traversal source alias carried in request args. Default `"g"`.
    pub traversal_source: String,
    /// Transport protocol. Websocket is the only shipped transport.
    pub transporter_type: TransporterType,
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
    /// Minimum in-flight requests per connection before the pool grows.
    pub new_connection_threshold: usize,
    /// Upper bound on pool size. Default: host parallelism.
    pub maximum_concurrent_connections: usize,
    /// Connections opened eagerly at construction.
    pub initial_concurrent_connections: usize,
    /// Session binding; set through [`Client::create_session`].
    session: Option<Uuid>,
}

impl Default for ClientSettings {
    fn default() -> ClientSettings {
        ClientSettings {
            traversal_source: "g".to_owned(),
            transporter_type: TransporterType::default(),
            auth: None,
            tls: None,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            write_deadline: DEFAULT_WRITE_DEADLINE,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            new_connection_threshold: DEFAULT_NEW_CONNECTION_THRESHOLD,
            maximum_concurrent_connections: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            initial_concurrent_connections: DEFAULT_INITIAL_CONCURRENT_CONNECTIONS,
            session: None,
        }
    }
}

impl ClientSettings {
    pub fn new() -> ClientSettings {
        ClientSettings::default()
    }

    pub fn with_traversal_source(mut self, source: impl Into<String>) -> Self {
        self.traversal_source = source.into();
        self
    }

    pub fn with_auth(mut self, auth: AuthInfo) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_write_deadline(mut self, deadline: Duration) -> Self {
        self.write_deadline = deadline;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_new_connection_threshold(mut self, threshold: usize) -> Self {
        self.new_connection_threshold = threshold;
        self
    }

    pub fn with_maximum_concurrent_connections(mut self, maximum: usize) -> Self {
        self.maximum_concurrent_connections = maximum;
        self
    }

    pub fn with_initial_concurrent_connections(mut self, initial: usize) -> Self {
        self.initial_concurrent_connections = initial;
        self
    }

    fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            auth: self.auth.clone(),
            tls: self.tls.clone(),
            keep_alive_interval: self.keep_alive_interval,
            write_deadline: self.write_deadline,
            connection_timeout: self.connection_timeout,
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
        }
    }
}

struct ClientInner {
    url: String,
    settings: ClientSettings,
    session: Option<Uuid>,
    pool: LoadBalancingPool,
    closed: AtomicBool,
    spawned_sessions: tokio::sync::Mutex<Vec<Client>>,
}

/// A client for a remote graph-query server.
///
/// Cheap to clone; all clones share one connection pool. Session clients
/// spawned through [`Client::create_session`] pin their requests to a
/// single connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.url)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connects with default settings.
    pub async fn connect(url: impl Into<String>) -> Result<Client, ClientError> {
        Client::connect_with(url, ClientSettings::default()).await
    }

    /// Connects with the given settings.
    pub async fn connect_with(
        url: impl Into<String>,
        mut settings: ClientSettings,
    ) -> Result<Client, ClientError> {
        let url = url.into();
        if settings.session.is_some() {
            // A stateful session cannot span connections.
            tracing::debug!("session detected; forcing pool to a single connection");
            settings.maximum_concurrent_connections = 1;
        }
        if settings.maximum_concurrent_connections == 0 {
            settings.maximum_concurrent_connections = 1;
        }
        if settings.initial_concurrent_connections > settings.maximum_concurrent_connections {
            tracing::warn!(
                initial = settings.initial_concurrent_connections,
                maximum = settings.maximum_concurrent_connections,
                "initial connections exceed maximum; clamping"
            );
            settings.initial_concurrent_connections = settings.maximum_concurrent_connections;
        }

        let pool = LoadBalancingPool::connect(
            url.clone(),
            settings.transporter_type,
            settings.connection_settings(),
            settings.new_connection_threshold,
            settings.maximum_concurrent_connections,
            settings.initial_concurrent_connections,
        )
        .await?;

        Ok(Client {
            inner: Arc::new(ClientInner {
                url,
                session: settings.session,
                settings,
                pool,
                closed: AtomicBool::new(false),
                spawned_sessions: tokio::sync::Mutex::new(Vec::new()),
            }),
        })
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ClientClosed);
        }
        Ok(())
    }

    /// Submits a script for evaluation.
    pub async fn submit(&self, script: &str) -> Result<ResultSet, ClientError> {
        self.ensure_open()?;
        tracing::debug!(script, "submitting script");
        let request = Request::eval(script, &self.inner.settings.traversal_source, self.inner.session);
        self.inner.pool.write(&request).await
    }

    /// Submits traversal bytecode for execution.
    pub async fn submit_bytecode(&self, bytecode: Bytecode) -> Result<ResultSet, ClientError> {
        self.ensure_open()?;
        let request = Request::bytecode(
            bytecode,
            &self.inner.settings.traversal_source,
            self.inner.session,
        );
        self.inner.pool.write(&request).await
    }

    /// The bound session id, if this client is a session.
    pub fn session_id(&self) -> Option<Uuid> {
        self.inner.session
    }

    pub fn is_session(&self) -> bool {
        self.inner.session.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of live pooled connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.pool.connection_count().await
    }

    /// Spawns a session-bound client. All requests through the returned
    /// client carry the session id and share one connection. The session is
    /// tracked by this client and closed with it.
    pub async fn create_session(&self, session_id: Option<Uuid>) -> Result<Client, ClientError> {
        self.ensure_open()?;
        if self.is_session() {
            return Err(ClientError::SessionFromSession);
        }
        let session = session_id.unwrap_or_else(Uuid::new_v4);
        tracing::debug!(%session, "creating session client");
        let mut settings = self.inner.settings.clone();
        settings.session = Some(session);
        let child = Client::connect_with(self.inner.url.clone(), settings).await?;
        self.inner.spawned_sessions.lock().await.push(child.clone());
        Ok(child)
    }

    /// Commits the open transaction.
    pub async fn commit(&self) -> Result<ResultSet, ClientError> {
        self.tx("commit").await
    }

    /// Rolls back the open transaction.
    pub async fn rollback(&self) -> Result<ResultSet, ClientError> {
        self.tx("rollback").await
    }

    async fn tx(&self, action: &str) -> Result<ResultSet, ClientError> {
        let mut bytecode = Bytecode::new();
        bytecode.add_source("tx", vec![Value::from(action)]);
        self.submit_bytecode(bytecode).await
    }

    /// Closes the client: spawned sessions first, then (for a session) the
    /// server-side session state, then the pool. Idempotent.
    pub async fn close(&self) -> Result<(), ClientError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let children: Vec<Client> = self.inner.spawned_sessions.lock().await.drain(..).collect();
        for child in children {
            if let Err(error) = Box::pin(child.close()).await {
                tracing::warn!(error = %error, "failed to close spawned session");
            }
        }
        if let Some(session) = self.inner.session {
            // Fire-and-forget; shutdown must not hang on an unresponsive server.
            tracing::debug!(%session, "closing server-side session");
            let request = Request::close_session(session);
            if let Err(error) = self.inner.pool.write(&request).await {
                tracing::debug!(error = %error, "close-session request failed");
            }
        }
        self.inner.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = ClientSettings::default();
        assert_eq!(settings.traversal_source, "g");
        assert_eq!(settings.new_connection_threshold, 4);
        assert_eq!(settings.initial_concurrent_connections, 1);
        assert!(settings.maximum_concurrent_connections >= 1);
        assert!(settings.session.is_none());
    }

    #[test]
    fn test_settings_builders() {
        let settings = ClientSettings::new()
            .with_traversal_source("social")
            .with_auth(AuthInfo::basic("u", "p"))
            .with_new_connection_threshold(8)
            .with_maximum_concurrent_connections(2)
            .with_initial_concurrent_connections(2)
            .with_write_deadline(Duration::from_secs(1));
        assert_eq!(settings.traversal_source, "social");
        assert_eq!(settings.new_connection_threshold, 8);
        assert_eq!(settings.maximum_concurrent_connections, 2);
        assert_eq!(settings.initial_concurrent_connections, 2);
        assert_eq!(settings.write_deadline, Duration::from_secs(1));
        assert!(settings.auth.is_some());
    }
}
