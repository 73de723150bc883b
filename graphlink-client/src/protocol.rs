//! Protocol engine: request framing and the per-connection reader loop.
//!
//! One reader task per connection owns the transport's read half and drives
//! all response dispatch for that connection. Frames for a given request id
//! arrive in server order; nothing is guaranteed across ids.

use crate::auth::AuthInfo;
use crate::connection::ActiveResults;
use crate::error::ClientError;
use crate::result_set::ResultSet;
use crate::transport::{TransportReader, TransportWriter};
use bytes::Buf;
use graphlink_protocol::{
    read_response, read_value_bare, write_request, Request, StatusClass, TypeCode, Value,
    PROTOCOL_VERSION,
};
use std::sync::Arc;
use uuid::Uuid;

/// Serializes requests onto the transport's write half.
pub(crate) struct MessageSender {
    writer: TransportWriter,
}

impl MessageSender {
    pub(crate) fn new(writer: TransportWriter) -> MessageSender {
        MessageSender { writer }
    }

    pub(crate) async fn send(&self, request: &Request) -> Result<(), ClientError> {
        tracing::debug!(request_id = %request.request_id, op = %request.op, "writing request");
        let frame = write_request(request)?;
        self.writer.write(frame.freeze()).await
    }

    pub(crate) async fn ping(&self) -> Result<(), ClientError> {
        self.writer.ping().await
    }

    pub(crate) async fn close(&self) {
        self.writer.close().await;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }
}

/// Reads frames until the transport fails or reaches end of stream.
///
/// Returns `Err` on any abnormal end; the caller runs the connection's
/// error fan-out.
pub(crate) async fn read_loop(
    mut reader: TransportReader,
    sender: Arc<MessageSender>,
    results: Arc<ActiveResults>,
    auth: Option<AuthInfo>,
) -> Result<(), ClientError> {
    loop {
        match reader.read().await? {
            Some(frame) => dispatch(&frame, &sender, &results, auth.as_ref()).await,
            None => return Err(ClientError::ConnectionClosed),
        }
    }
}

async fn dispatch(
    frame: &[u8],
    sender: &MessageSender,
    results: &ActiveResults,
    auth: Option<&AuthInfo>,
) {
    let response = match read_response(frame) {
        Ok(response) => response,
        Err(err) => {
            // Attribute the decode failure to the owning request when the
            // header is still readable; the connection stays up either way.
            if let Some(request_id) = peek_request_id(frame) {
                if let Some(result_set) = results.remove(&request_id) {
                    result_set.fail(err.into()).await;
                    return;
                }
            }
            tracing::warn!(error = %err, "dropping undecodable response frame");
            return;
        }
    };

    let Some(request_id) = response.request_id else {
        tracing::warn!("dropping response frame without request id");
        return;
    };

    let class = match response.status.class() {
        Ok(class) => class,
        Err(err) => {
            if let Some(result_set) = results.remove(&request_id) {
                result_set.fail(err.into()).await;
            }
            return;
        }
    };

    match class {
        StatusClass::Challenge => {
            // Reply with SASL PLAIN under the same id; the original request
            // stays pending and the channel stays open.
            let reply = match auth {
                Some(auth) => Request::authenticate(request_id, &auth.username, &auth.password),
                None => {
                    if let Some(result_set) = results.remove(&request_id) {
                        result_set.fail(ClientError::MissingCredentials).await;
                    }
                    return;
                }
            };
            tracing::debug!(%request_id, "answering authenticate challenge");
            if let Err(err) = sender.send(&reply).await {
                if let Some(result_set) = results.remove(&request_id) {
                    result_set.fail(err).await;
                }
            }
        }
        StatusClass::Partial => {
            let Some(result_set) = results.load(&request_id) else {
                orphan(request_id);
                return;
            };
            if let Some(hint) = response.aggregate_to() {
                result_set.set_aggregate_to(hint);
            }
            push_data(&result_set, response.result.data).await;
        }
        StatusClass::TerminalSuccess => {
            let Some(result_set) = results.remove(&request_id) else {
                orphan(request_id);
                return;
            };
            if let Some(hint) = response.aggregate_to() {
                result_set.set_aggregate_to(hint);
            }
            push_data(&result_set, response.result.data).await;
            result_set.set_status_attributes(response.status.attributes);
            result_set.close().await;
        }
        StatusClass::Error => {
            let Some(result_set) = results.remove(&request_id) else {
                orphan(request_id);
                return;
            };
            result_set
                .fail(ClientError::Server {
                    code: response.status.code,
                    message: response.status.message,
                })
                .await;
        }
    }
}

/// Enqueues a frame's data. A list is unwrapped item by item; a traverser
/// contributes its value once per delivery, bulk is not expanded.
async fn push_data(result_set: &ResultSet, data: Value) {
    match data {
        Value::Null => {}
        Value::List(items) => {
            for item in items {
                match item {
                    Value::Traverser { value, .. } => result_set.add_result(*value).await,
                    other => result_set.add_result(other).await,
                }
            }
        }
        other => result_set.add_result(other).await,
    }
}

fn orphan(request_id: Uuid) {
    tracing::warn!(%request_id, "dropping frame for unknown request id");
}

/// Best-effort extraction of the request id from a frame that failed to
/// decode in full.
fn peek_request_id(frame: &[u8]) -> Option<Uuid> {
    let mut buf = frame;
    if !buf.has_remaining() || buf.get_u8() != PROTOCOL_VERSION {
        return None;
    }
    match read_value_bare(&mut buf, TypeCode::Uuid, true) {
        Ok(Value::Uuid(request_id)) => Some(request_id),
        _ => None,
    }
}
