//! Websocket transport: full-duplex binary frame channel.

use crate::connection::ConnectionSettings;
use crate::error::ClientError;
use crate::tls;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{
    connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Valid transport protocols. Websocket is the only shipped transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransporterType {
    #[default]
    WebSocket,
}

/// Resolves a transporter type to a connected transport, split into a
/// shareable write half and a reader-task-owned read half.
pub(crate) async fn connect_transport(
    transporter: TransporterType,
    url: &str,
    settings: &ConnectionSettings,
) -> Result<(TransportWriter, TransportReader), ClientError> {
    match transporter {
        TransporterType::WebSocket => connect_websocket(url, settings).await,
    }
}

async fn connect_websocket(
    url: &str,
    settings: &ConnectionSettings,
) -> Result<(TransportWriter, TransportReader), ClientError> {
    let mut request = url.into_client_request()?;
    if let Some(auth) = &settings.auth {
        let header = HeaderValue::from_str(&auth.header_value())
            .map_err(|e| ClientError::Transport(format!("invalid authorization header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, header);
    }

    let mut config = WebSocketConfig::default();
    config.read_buffer_size = settings.read_buffer_size;
    config.write_buffer_size = settings.write_buffer_size;

    let connector = match &settings.tls {
        Some(options) if options.enabled => {
            Some(Connector::Rustls(tls::build_client_config(options)?))
        }
        _ => None,
    };

    tracing::debug!(url, "opening websocket connection");
    let (stream, _response) = tokio::time::timeout(
        settings.connection_timeout,
        connect_async_tls_with_config(request, Some(config), true, connector),
    )
    .await
    .map_err(|_| ClientError::ConnectTimeout)??;
    tracing::debug!(url, "websocket established");

    let closed = Arc::new(AtomicBool::new(false));
    let (sink, stream) = stream.split();
    let writer = TransportWriter {
        sink: tokio::sync::Mutex::new(sink),
        write_deadline: settings.write_deadline,
        closed: closed.clone(),
    };
    let reader = TransportReader { stream, closed };
    Ok((writer, reader))
}

/// Write half. Concurrent writers serialize on the sink lock; each send is
/// bounded by the write deadline.
pub(crate) struct TransportWriter {
    sink: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    write_deadline: Duration,
    closed: Arc<AtomicBool>,
}

impl TransportWriter {
    /// Sends one binary frame.
    pub(crate) async fn write(&self, frame: Bytes) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.write_deadline, sink.send(Message::Binary(frame))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.closed.store(true, Ordering::SeqCst);
                Err(err.into())
            }
            Err(_) => Err(ClientError::WriteDeadline),
        }
    }

    /// Keep-alive ping.
    pub(crate) async fn ping(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.write_deadline, sink.send(Message::Ping(Bytes::new()))).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.closed.store(true, Ordering::SeqCst);
                Err(err.into())
            }
            Err(_) => Err(ClientError::WriteDeadline),
        }
    }

    /// Starts the websocket close handshake. Idempotent.
    pub(crate) async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let mut sink = self.sink.lock().await;
            let _ = sink.close().await;
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Read half, owned by the connection's reader task.
pub(crate) struct TransportReader {
    stream: SplitStream<WsStream>,
    closed: Arc<AtomicBool>,
}

impl TransportReader {
    /// Blocks for one complete binary frame. `Ok(None)` is end of stream.
    pub(crate) async fn read(&mut self) -> Result<Option<Bytes>, ClientError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Close(_))) => {
                    self.closed.store(true, Ordering::SeqCst);
                    return Ok(None);
                }
                // The websocket queues the pong reply internally.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Text(_))) => {
                    return Err(ClientError::Transport(
                        "unexpected text frame on binary channel".into(),
                    ))
                }
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(err)) => {
                    self.closed.store(true, Ordering::SeqCst);
                    return Err(err.into());
                }
                None => {
                    self.closed.store(true, Ordering::SeqCst);
                    return Ok(None);
                }
            }
        }
    }
}
