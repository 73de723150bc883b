//! Load-balancing connection pool.
//!
//! Selection is an O(N) scan for the least-loaded connection; N is small and
//! a heap would only complicate retirement. A new connection is admitted
//! only when every live connection is at or above the growth threshold and
//! the pool is below its cap, so an under-loaded connection is never passed
//! over in favor of opening a new one.

use crate::connection::{Connection, ConnectionSettings};
use crate::error::ClientError;
use crate::result_set::ResultSet;
use crate::transport::TransporterType;
use futures_util::future::join_all;
use graphlink_protocol::Request;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-flight requests per connection at which the pool opens another.
pub(crate) const DEFAULT_NEW_CONNECTION_THRESHOLD: usize = 4;

/// Connections opened eagerly at construction.
pub(crate) const DEFAULT_INITIAL_CONCURRENT_CONNECTIONS: usize = 1;

pub(crate) struct LoadBalancingPool {
    url: String,
    transporter: TransporterType,
    settings: ConnectionSettings,
    new_connection_threshold: usize,
    maximum_connections: usize,
    /// Read lock for selection, write lock for admission and retirement.
    connections: RwLock<Vec<Arc<Connection>>>,
    closed: AtomicBool,
}

impl LoadBalancingPool {
    pub(crate) async fn connect(
        url: String,
        transporter: TransporterType,
        settings: ConnectionSettings,
        new_connection_threshold: usize,
        maximum_connections: usize,
        initial_connections: usize,
    ) -> Result<LoadBalancingPool, ClientError> {
        let maximum_connections = maximum_connections.max(1);
        let initial_connections = initial_connections.clamp(1, maximum_connections);

        let mut connections = Vec::with_capacity(initial_connections);
        for _ in 0..initial_connections {
            let connection = Connection::connect(&url, transporter, &settings).await?;
            connections.push(Arc::new(connection));
        }
        tracing::debug!(
            initial = initial_connections,
            maximum = maximum_connections,
            "connection pool ready"
        );

        Ok(LoadBalancingPool {
            url,
            transporter,
            settings,
            new_connection_threshold: new_connection_threshold.max(1),
            maximum_connections,
            connections: RwLock::new(connections),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) async fn write(&self, request: &Request) -> Result<ResultSet, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::PoolClosed);
        }
        let connection = self.select().await?;
        connection.write(request).await
    }

    /// Picks the least-loaded live connection, retiring broken ones and
    /// growing the pool when every survivor is at the threshold.
    async fn select(&self) -> Result<Arc<Connection>, ClientError> {
        let needs_retirement = {
            let connections = self.connections.read().await;
            connections.iter().any(|connection| !connection.is_healthy())
        };
        if needs_retirement {
            let mut connections = self.connections.write().await;
            let before = connections.len();
            connections.retain(|connection| connection.is_healthy());
            let retired = before - connections.len();
            if retired > 0 {
                tracing::warn!(retired, "retired broken connections from pool");
            }
        }

        let least_loaded = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .min_by_key(|connection| connection.active_results())
                .cloned()
        };

        match least_loaded {
            Some(connection)
                if connection.active_results() < self.new_connection_threshold =>
            {
                Ok(connection)
            }
            Some(connection) => {
                let mut connections = self.connections.write().await;
                if connections.len() >= self.maximum_connections {
                    return Ok(connection);
                }
                tracing::debug!("pool saturated; opening another connection");
                match Connection::connect(&self.url, self.transporter, &self.settings).await {
                    Ok(fresh) => {
                        let fresh = Arc::new(fresh);
                        connections.push(fresh.clone());
                        Ok(fresh)
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "pool growth failed; reusing least-loaded connection");
                        Ok(connection)
                    }
                }
            }
            None => {
                let mut connections = self.connections.write().await;
                if let Some(existing) = connections
                    .iter()
                    .min_by_key(|connection| connection.active_results())
                    .cloned()
                {
                    return Ok(existing);
                }
                let fresh = Arc::new(
                    Connection::connect(&self.url, self.transporter, &self.settings).await?,
                );
                connections.push(fresh.clone());
                Ok(fresh)
            }
        }
    }

    /// Number of live connections.
    pub(crate) async fn connection_count(&self) -> usize {
        self.connections
            .read()
            .await
            .iter()
            .filter(|connection| connection.is_healthy())
            .count()
    }

    /// Closes every connection in parallel. Idempotent.
    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let connections: Vec<Arc<Connection>> =
            self.connections.write().await.drain(..).collect();
        tracing::debug!(count = connections.len(), "closing connection pool");
        join_all(connections.iter().map(|connection| connection.close())).await;
    }
}
