//! # graphlink-protocol
//!
//! GraphBinary wire protocol for graph-query servers.
//!
//! This crate provides:
//! - The tagged [`Value`] universe and its type-code registry
//! - A GraphBinary encoder/decoder over `bytes` buffers
//! - Traversal [`Bytecode`] (step and source instruction lists)
//! - Request/response envelopes for both peers of the protocol

pub mod bytecode;
pub mod error;
pub mod graphbinary;
pub mod message;
pub mod value;

pub use bytecode::{Binding, Bytecode, Instruction};
pub use error::{CodecError, ProtocolError};
pub use graphbinary::{
    read_fq_expecting, read_value, read_value_bare, write_null_of, write_value, write_value_bare,
};
pub use message::{
    read_request, read_response, write_request, write_response, Request, Response,
    ResponseResult, ResponseStatus, StatusClass,
};
pub use value::{MapEntries, TypeCode, Value};

/// MIME type identifier sent length-prefixed at the front of every request.
pub const GRAPHBINARY_MIME: &str = "application/vnd.graphbinary-v1.0";

/// Protocol version byte leading every request body and response frame.
pub const PROTOCOL_VERSION: u8 = 0x81;
