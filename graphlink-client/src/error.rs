//! Client error types.

use graphlink_protocol::{CodecError, ProtocolError};
use std::sync::Arc;
use thiserror::Error;

/// Client errors.
///
/// Cloneable so a terminal failure can be handed to every consumer of a
/// result set; non-cloneable sources are carried behind `Arc` or collapsed
/// to their message.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Dial, TLS handshake, read or write failure at the transport layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport reached end of stream or was already closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The websocket handshake did not finish within the connect timeout.
    #[error("connect timeout")]
    ConnectTimeout,

    /// A frame write did not finish within the write deadline.
    #[error("write deadline exceeded")]
    WriteDeadline,

    /// Envelope or codec failure on a frame.
    #[error("protocol error: {0}")]
    Protocol(#[source] Arc<ProtocolError>),

    /// A 4xx/5xx status, surfaced verbatim from the server.
    #[error("server error {code}: {message}")]
    Server { code: i32, message: String },

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Submit on a closed client.
    #[error("client is closed")]
    ClientClosed,

    /// Submit on a closed pool.
    #[error("pool is closed")]
    PoolClosed,

    /// `create_session` called on a client that is already a session.
    #[error("cannot create a session from a session client")]
    SessionFromSession,

    /// The server demanded authentication but no credentials are configured.
    #[error("server requested authentication but no credentials are configured")]
    MissingCredentials,
}

impl ClientError {
    /// Whether this failure poisons the connection it happened on.
    ///
    /// A missed write deadline fails only the originating submit; everything
    /// else on the write path retires the connection.
    pub(crate) fn retires_connection(&self) -> bool {
        !matches!(self, ClientError::WriteDeadline)
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> ClientError {
        ClientError::Protocol(Arc::new(err))
    }
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> ClientError {
        ClientError::Protocol(Arc::new(ProtocolError::Codec(err)))
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> ClientError {
        ClientError::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> ClientError {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed | Error::AlreadyClosed => ClientError::ConnectionClosed,
            other => ClientError::Transport(other.to_string()),
        }
    }
}
