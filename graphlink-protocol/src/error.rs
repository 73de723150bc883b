//! Protocol and codec error types.

use thiserror::Error;

/// Errors produced while encoding or decoding GraphBinary values.
///
/// Decode failures are recoverable at the frame level: they fail the value
/// being read (and therefore the enclosing frame), never the connection.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input had no bytes at all.
    #[error("missing input buffer")]
    MissingBuffer,

    /// The buffer ran out while at least one more byte was required.
    #[error("buffer exhausted: needed {needed} more byte(s), {remaining} remaining")]
    BufferExhausted { needed: usize, remaining: usize },

    /// A fully-qualified read found a type code that is not in the registry.
    #[error("unknown type code {0:#04x}")]
    UnknownTypeCode(u8),

    /// The type code on the wire does not match the reader's expectation.
    #[error("unexpected type code: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedTypeCode { expected: u8, actual: u8 },

    /// The type code was read but the buffer ended before the value flag.
    #[error("value flag missing after type code")]
    ValueFlagMissing,

    /// The value flag had bits set other than the null bit.
    #[error("unexpected value flag {0:#04x}")]
    UnexpectedValueFlag(u8),

    /// A declared length was negative or exceeds the remaining bytes.
    #[error("unexpected value length {declared} with {remaining} byte(s) remaining")]
    UnexpectedValueLength { declared: i64, remaining: usize },

    /// A string body was not valid UTF-8.
    #[error("invalid UTF-8 in string value")]
    InvalidUtf8,

    /// A null value was supplied for a slot that does not admit null.
    #[error("unexpected null value in non-nullable position")]
    UnexpectedNull,

    /// A value was out of range for the width the caller requested.
    #[error("value {value} out of range for {target}")]
    SerializeRange { value: i64, target: &'static str },

    /// The value variant cannot be serialized in the requested position.
    #[error("cannot serialize {0} here")]
    SerializeUnsupported(&'static str),
}

/// Errors in the request/response envelope layer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The response began with a version byte this implementation does not speak.
    #[error("unsupported protocol version {0:#04x}")]
    UnsupportedVersion(u8),

    /// A response carried a status code outside the known and HTTP-style error spaces.
    #[error("unknown status code {0}")]
    UnknownStatusCode(i32),

    /// The request payload did not start with the expected MIME type header.
    #[error("invalid MIME header on request envelope")]
    InvalidMimeHeader,

    /// A response frame was structurally valid but semantically malformed.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(&'static str),
}
