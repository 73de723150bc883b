//! Request and response envelopes and their wire forms.
//!
//! A request payload is `{mime_len:1}{mime}{version:1}{request_id:16}{op}
//! {processor}{args}` where op and processor are bare strings and args is a
//! value-only map whose entries are fully qualified. A response is
//! `{version:1}{request_id: nullable UUID}{status_code:Int32}{status_message:
//! nullable String}{status_attributes: Map}{result_meta: Map}{result_data:
//! fully-qualified}`.

use crate::bytecode::Bytecode;
use crate::error::{CodecError, ProtocolError};
use crate::graphbinary::{
    self, get_string, put_string, read_len, read_value, read_value_bare, write_len, write_value,
    write_value_bare,
};
use crate::value::{MapEntries, TypeCode, Value};
use crate::{GRAPHBINARY_MIME, PROTOCOL_VERSION};
use base64::Engine;
use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

pub const OP_BYTECODE: &str = "bytecode";
pub const OP_EVAL: &str = "eval";
pub const OP_AUTHENTICATION: &str = "authentication";
pub const OP_CLOSE: &str = "close";

pub const PROCESSOR_DEFAULT: &str = "";
pub const PROCESSOR_SESSION: &str = "session";

pub const ARG_GREMLIN: &str = "gremlin";
pub const ARG_ALIASES: &str = "aliases";
pub const ARG_LANGUAGE: &str = "language";
pub const ARG_SESSION: &str = "session";
pub const ARG_SASL: &str = "sasl";
pub const ARG_SASL_MECHANISM: &str = "saslMechanism";

const LANGUAGE_GREMLIN_GROOVY: &str = "gremlin-groovy";
const SASL_MECHANISM_PLAIN: &str = "PLAIN";

/// A client request. One request is answered by one or more response frames
/// sharing its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub request_id: Uuid,
    pub op: String,
    pub processor: String,
    pub args: Vec<(String, Value)>,
}

impl Request {
    pub fn new(op: impl Into<String>, processor: impl Into<String>) -> Request {
        Request {
            request_id: Uuid::new_v4(),
            op: op.into(),
            processor: processor.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Request {
        self.args.push((key.into(), value.into()));
        self
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// A bytecode execution request. Session requests route through the
    /// session processor and carry the session id.
    pub fn bytecode(bytecode: Bytecode, traversal_source: &str, session: Option<Uuid>) -> Request {
        let processor = if session.is_some() {
            PROCESSOR_SESSION
        } else {
            PROCESSOR_DEFAULT
        };
        let mut request = Request::new(OP_BYTECODE, processor)
            .with_arg(ARG_GREMLIN, bytecode)
            .with_arg(ARG_ALIASES, aliases(traversal_source));
        if let Some(session) = session {
            request = request.with_arg(ARG_SESSION, session);
        }
        request
    }

    /// A script evaluation request.
    pub fn eval(script: &str, traversal_source: &str, session: Option<Uuid>) -> Request {
        let processor = if session.is_some() {
            PROCESSOR_SESSION
        } else {
            PROCESSOR_DEFAULT
        };
        let mut request = Request::new(OP_EVAL, processor)
            .with_arg(ARG_GREMLIN, script)
            .with_arg(ARG_LANGUAGE, LANGUAGE_GREMLIN_GROOVY)
            .with_arg(ARG_ALIASES, aliases(traversal_source));
        if let Some(session) = session {
            request = request.with_arg(ARG_SESSION, session);
        }
        request
    }

    /// The SASL PLAIN reply to an authenticate challenge. Reuses the
    /// challenged request's id so the original request stays pending.
    pub fn authenticate(request_id: Uuid, username: &str, password: &str) -> Request {
        let token = format!("\0{username}\0{password}");
        let sasl = base64::engine::general_purpose::STANDARD.encode(token);
        let mut request = Request::new(OP_AUTHENTICATION, PROCESSOR_DEFAULT)
            .with_arg(ARG_SASL_MECHANISM, SASL_MECHANISM_PLAIN)
            .with_arg(ARG_SASL, sasl);
        request.request_id = request_id;
        request
    }

    /// Tells the server to discard a session's state.
    pub fn close_session(session: Uuid) -> Request {
        Request::new(OP_CLOSE, PROCESSOR_SESSION).with_arg(ARG_SESSION, session)
    }
}

fn aliases(traversal_source: &str) -> Value {
    Value::Map(vec![(Value::from("g"), Value::from(traversal_source))])
}

/// Serializes a request, MIME header included.
pub fn write_request(request: &Request) -> Result<BytesMut, CodecError> {
    let mut buf = BytesMut::with_capacity(64 + GRAPHBINARY_MIME.len());
    buf.put_u8(GRAPHBINARY_MIME.len() as u8);
    buf.put_slice(GRAPHBINARY_MIME.as_bytes());
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_slice(request.request_id.as_bytes());
    put_string(&request.op, &mut buf)?;
    put_string(&request.processor, &mut buf)?;
    write_len(request.args.len(), &mut buf, "args length")?;
    for (key, value) in &request.args {
        write_value(&Value::from(key.as_str()), &mut buf)?;
        write_value(value, &mut buf)?;
    }
    Ok(buf)
}

/// Parses a request payload; the server-side half of [`write_request`].
pub fn read_request(frame: &[u8]) -> Result<Request, ProtocolError> {
    let mut buf = frame;
    if buf.remaining() < 1 + GRAPHBINARY_MIME.len() {
        return Err(ProtocolError::InvalidMimeHeader);
    }
    let mime_len = buf.get_u8() as usize;
    if mime_len != GRAPHBINARY_MIME.len() || &buf[..mime_len] != GRAPHBINARY_MIME.as_bytes() {
        return Err(ProtocolError::InvalidMimeHeader);
    }
    buf.advance(mime_len);
    if !buf.has_remaining() {
        return Err(ProtocolError::MalformedEnvelope("missing version byte"));
    }
    let version = buf.get_u8();
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let request_id = read_uuid(&mut buf)?;
    let op = get_string(&mut buf)?;
    let processor = get_string(&mut buf)?;
    let argc = read_len(&mut buf)?;
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        let key = match read_value(&mut buf)? {
            Value::String(key) => key,
            _ => return Err(ProtocolError::MalformedEnvelope("non-string arg key")),
        };
        args.push((key, read_value(&mut buf)?));
    }
    Ok(Request {
        request_id,
        op,
        processor,
        args,
    })
}

fn read_uuid(buf: &mut impl Buf) -> Result<Uuid, CodecError> {
    if buf.remaining() < 16 {
        return Err(CodecError::BufferExhausted {
            needed: 16 - buf.remaining(),
            remaining: buf.remaining(),
        });
    }
    let mut raw = [0u8; 16];
    buf.copy_to_slice(&mut raw);
    Ok(Uuid::from_bytes(raw))
}

/// Status codes a server may answer with.
pub mod status {
    pub const SUCCESS: i32 = 200;
    pub const NO_CONTENT: i32 = 204;
    pub const PARTIAL_CONTENT: i32 = 206;
    pub const UNAUTHORIZED: i32 = 401;
    pub const AUTHENTICATE: i32 = 407;
    pub const SERVER_ERROR: i32 = 500;
}

/// Dispatch class of a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 200/204: the request is complete.
    TerminalSuccess,
    /// 206: more frames follow for this request id.
    Partial,
    /// 407: the server wants a SASL reply before proceeding.
    Challenge,
    /// Any other 4xx/5xx: terminal failure, surfaced verbatim.
    Error,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseStatus {
    pub code: i32,
    pub message: String,
    pub attributes: MapEntries,
}

impl ResponseStatus {
    /// Classifies the code for dispatch; codes outside the known and
    /// HTTP-style error spaces are a protocol error.
    pub fn class(&self) -> Result<StatusClass, ProtocolError> {
        match self.code {
            status::SUCCESS | status::NO_CONTENT => Ok(StatusClass::TerminalSuccess),
            status::PARTIAL_CONTENT => Ok(StatusClass::Partial),
            status::AUTHENTICATE => Ok(StatusClass::Challenge),
            code if (400..600).contains(&code) => Ok(StatusClass::Error),
            code => Err(ProtocolError::UnknownStatusCode(code)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseResult {
    pub meta: MapEntries,
    pub data: Value,
}

/// One response frame. A request sees zero or more partial frames followed
/// by exactly one terminal frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub request_id: Option<Uuid>,
    pub status: ResponseStatus,
    pub result: ResponseResult,
}

impl Response {
    /// The `aggregateTo` hint carried in result metadata, if any.
    pub fn aggregate_to(&self) -> Option<&str> {
        self.result
            .meta
            .iter()
            .find(|(k, _)| k.as_str() == Some("aggregateTo"))
            .and_then(|(_, v)| v.as_str())
    }
}

/// Parses one response frame.
pub fn read_response(frame: &[u8]) -> Result<Response, ProtocolError> {
    let mut buf = frame;
    if !buf.has_remaining() {
        return Err(CodecError::MissingBuffer.into());
    }
    let version = buf.get_u8();
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let request_id = match read_value_bare(&mut buf, TypeCode::Uuid, true)? {
        Value::Uuid(id) => Some(id),
        _ => None,
    };
    let code = read_value_bare(&mut buf, TypeCode::Int, false)?
        .as_i32()
        .ok_or(ProtocolError::MalformedEnvelope("status code"))?;
    let message = match read_value_bare(&mut buf, TypeCode::String, true)? {
        Value::String(message) => message,
        _ => String::new(),
    };
    let attributes = read_map_bare(&mut buf)?;
    let meta = read_map_bare(&mut buf)?;
    let data = read_value(&mut buf)?;
    Ok(Response {
        request_id,
        status: ResponseStatus {
            code,
            message,
            attributes,
        },
        result: ResponseResult { meta, data },
    })
}

/// Serializes one response frame; the server-side half of
/// [`read_response`].
pub fn write_response(response: &Response) -> Result<BytesMut, CodecError> {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u8(PROTOCOL_VERSION);
    match response.request_id {
        Some(id) => write_value_bare(&Value::Uuid(id), &mut buf, true)?,
        None => write_value_bare(&Value::Null, &mut buf, true)?,
    }
    write_value_bare(&Value::Int(response.status.code), &mut buf, false)?;
    if response.status.message.is_empty() {
        write_value_bare(&Value::Null, &mut buf, true)?;
    } else {
        write_value_bare(&Value::from(response.status.message.as_str()), &mut buf, true)?;
    }
    write_map_bare(&response.status.attributes, &mut buf)?;
    write_map_bare(&response.result.meta, &mut buf)?;
    write_value(&response.result.data, &mut buf)?;
    Ok(buf)
}

fn read_map_bare(buf: &mut impl Buf) -> Result<MapEntries, CodecError> {
    match graphbinary::read_value_bare(buf, TypeCode::Map, false)? {
        Value::Map(entries) => Ok(entries),
        _ => Ok(Vec::new()),
    }
}

fn write_map_bare(entries: &MapEntries, buf: &mut BytesMut) -> Result<(), CodecError> {
    write_len(entries.len(), buf, "map length")?;
    for (key, value) in entries {
        write_value(key, buf)?;
        write_value(value, buf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_prefix() {
        let request = Request::eval("g.V()", "g", None);
        let wire = write_request(&request).unwrap();
        assert_eq!(wire[0], 0x20);
        assert_eq!(&wire[1..33], GRAPHBINARY_MIME.as_bytes());
        assert_eq!(wire[33], 0x81);
        assert_eq!(&wire[34..50], request.request_id.as_bytes());
        // op follows as a bare string.
        assert_eq!(&wire[50..54], &[0x00, 0x00, 0x00, 0x04]);
        assert_eq!(&wire[54..58], b"eval");
    }

    #[test]
    fn test_request_roundtrip() {
        let request = Request::eval("g.V().count()", "g", None);
        let wire = write_request(&request).unwrap();
        let parsed = read_request(&wire).unwrap();
        assert_eq!(parsed, request);
        assert_eq!(parsed.arg(ARG_LANGUAGE), Some(&Value::from("gremlin-groovy")));
    }

    #[test]
    fn test_bytecode_request_args() {
        let mut bc = Bytecode::new();
        bc.add_step("V", vec![]);
        let session = Uuid::new_v4();
        let request = Request::bytecode(bc.clone(), "g", Some(session));
        assert_eq!(request.op, OP_BYTECODE);
        assert_eq!(request.processor, PROCESSOR_SESSION);
        assert_eq!(request.arg(ARG_GREMLIN), Some(&Value::Bytecode(bc)));
        assert_eq!(request.arg(ARG_SESSION), Some(&Value::Uuid(session)));
        assert_eq!(
            request.arg(ARG_ALIASES).and_then(|v| v.get("g")),
            Some(&Value::from("g"))
        );

        let plain = Request::bytecode(Bytecode::new(), "g", None);
        assert_eq!(plain.processor, PROCESSOR_DEFAULT);
        assert!(plain.arg(ARG_SESSION).is_none());

        let wire = write_request(&request).unwrap();
        assert_eq!(read_request(&wire).unwrap(), request);
    }

    #[test]
    fn test_authenticate_request() {
        let id = Uuid::new_v4();
        let request = Request::authenticate(id, "stephen", "password");
        assert_eq!(request.request_id, id);
        assert_eq!(request.op, OP_AUTHENTICATION);
        assert_eq!(request.arg(ARG_SASL_MECHANISM), Some(&Value::from("PLAIN")));
        // base64("\0stephen\0password")
        assert_eq!(
            request.arg(ARG_SASL),
            Some(&Value::from("AHN0ZXBoZW4AcGFzc3dvcmQ="))
        );
    }

    #[test]
    fn test_close_session_request() {
        let session = Uuid::new_v4();
        let request = Request::close_session(session);
        assert_eq!(request.op, OP_CLOSE);
        assert_eq!(request.processor, PROCESSOR_SESSION);
        assert_eq!(request.arg(ARG_SESSION), Some(&Value::Uuid(session)));
    }

    #[test]
    fn test_bad_mime_rejected() {
        let request = Request::eval("g.V()", "g", None);
        let mut wire = write_request(&request).unwrap();
        wire[5] ^= 0xff;
        assert!(matches!(
            read_request(&wire).unwrap_err(),
            ProtocolError::InvalidMimeHeader
        ));
    }

    fn frame(response: &Response) -> BytesMut {
        write_response(response).unwrap()
    }

    #[test]
    fn test_response_roundtrip_partial() {
        let response = Response {
            request_id: Some(Uuid::new_v4()),
            status: ResponseStatus {
                code: status::PARTIAL_CONTENT,
                message: String::new(),
                attributes: vec![],
            },
            result: ResponseResult {
                meta: vec![(Value::from("aggregateTo"), Value::from("list"))],
                data: Value::List(vec![Value::Int(1), Value::Int(2)]),
            },
        };
        let parsed = read_response(&frame(&response)).unwrap();
        assert_eq!(parsed, response);
        assert_eq!(parsed.status.class().unwrap(), StatusClass::Partial);
        assert_eq!(parsed.aggregate_to(), Some("list"));
    }

    #[test]
    fn test_response_error_class() {
        let response = Response {
            request_id: Some(Uuid::new_v4()),
            status: ResponseStatus {
                code: 500,
                message: "boom".into(),
                attributes: vec![],
            },
            result: ResponseResult::default(),
        };
        let parsed = read_response(&frame(&response)).unwrap();
        assert_eq!(parsed.status.class().unwrap(), StatusClass::Error);
        assert_eq!(parsed.status.message, "boom");
    }

    #[test]
    fn test_response_null_request_id() {
        let response = Response {
            request_id: None,
            status: ResponseStatus {
                code: status::NO_CONTENT,
                ..Default::default()
            },
            result: ResponseResult::default(),
        };
        let parsed = read_response(&frame(&response)).unwrap();
        assert_eq!(parsed.request_id, None);
        assert_eq!(
            parsed.status.class().unwrap(),
            StatusClass::TerminalSuccess
        );
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut wire = frame(&Response {
            request_id: None,
            status: ResponseStatus::default(),
            result: ResponseResult::default(),
        });
        wire[0] = 0x55;
        assert!(matches!(
            read_response(&wire).unwrap_err(),
            ProtocolError::UnsupportedVersion(0x55)
        ));
    }

    #[test]
    fn test_unknown_status_code_is_protocol_error() {
        let status = ResponseStatus {
            code: 302,
            ..Default::default()
        };
        assert!(matches!(
            status.class().unwrap_err(),
            ProtocolError::UnknownStatusCode(302)
        ));
    }

    #[test]
    fn test_challenge_class() {
        let status = ResponseStatus {
            code: status::AUTHENTICATE,
            ..Default::default()
        };
        assert_eq!(status.class().unwrap(), StatusClass::Challenge);
    }
}
