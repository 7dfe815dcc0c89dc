//! Protocol layer - serialization of typed values onto a transport.
//!
//! Three interchangeable wire encodings implement the same read/write
//! contract:
//!
//! - [`BinaryProtocol`] - fixed-width big-endian encoding, the semantic
//!   baseline.
//! - [`CompactProtocol`] - varint/zigzag encoding with delta-compressed field
//!   ids and header-packed booleans.
//! - [`JsonProtocol`] - tree-shaped text encoding with type-tagged field
//!   wrappers.
//!
//! A caller drives a protocol through a strict write sequence
//! (`write_message_begin` .. `write_message_end`, then `flush`) to serialize
//! a call; the peer reconstructs it through the symmetric read sequence.
//! Protocol instances exclusively own their transient encode/decode state and
//! must not be shared across simultaneously-decoding messages.

mod binary;
mod compact;
mod json;

pub use binary::BinaryProtocol;
pub use compact::CompactProtocol;
pub use json::JsonProtocol;

use bytes::Bytes;

use crate::error::{Result, ThriftError};
use crate::transport::MemoryTransport;
use crate::types::{FieldHeader, ListHeader, MapHeader, MessageHeader, MessageType, TType};

/// Maximum nesting depth `skip` will descend through.
pub const MAX_SKIP_DEPTH: usize = 64;

/// Write half of the protocol contract.
///
/// Struct/field framing is driven by the caller in the fixed Thrift order:
/// `write_struct_begin`, then per field `write_field_begin` / value /
/// `write_field_end`, then `write_field_stop`, then `write_struct_end`.
pub trait ProtocolWrite {
    fn write_message_begin(&mut self, header: &MessageHeader) -> Result<()>;
    fn write_message_end(&mut self) -> Result<()>;

    fn write_struct_begin(&mut self, name: &str) -> Result<()>;
    fn write_struct_end(&mut self) -> Result<()>;

    fn write_field_begin(&mut self, field_type: TType, id: i16) -> Result<()>;
    fn write_field_end(&mut self) -> Result<()>;
    fn write_field_stop(&mut self) -> Result<()>;

    fn write_map_begin(&mut self, key_type: TType, value_type: TType, size: usize) -> Result<()>;
    fn write_map_end(&mut self) -> Result<()>;
    fn write_list_begin(&mut self, element_type: TType, size: usize) -> Result<()>;
    fn write_list_end(&mut self) -> Result<()>;
    fn write_set_begin(&mut self, element_type: TType, size: usize) -> Result<()>;
    fn write_set_end(&mut self) -> Result<()>;

    fn write_bool(&mut self, value: bool) -> Result<()>;
    fn write_byte(&mut self, value: i8) -> Result<()>;
    fn write_i16(&mut self, value: i16) -> Result<()>;
    fn write_i32(&mut self, value: i32) -> Result<()>;
    fn write_i64(&mut self, value: i64) -> Result<()>;
    fn write_double(&mut self, value: f64) -> Result<()>;
    fn write_string(&mut self, value: &str) -> Result<()>;
    fn write_binary(&mut self, value: &[u8]) -> Result<()>;

    /// Send any buffered bytes to the end point.
    fn flush(&mut self) -> Result<()>;
}

/// Read half of the protocol contract, mirroring [`ProtocolWrite`] exactly.
pub trait ProtocolRead {
    fn read_message_begin(&mut self) -> Result<MessageHeader>;
    fn read_message_end(&mut self) -> Result<()>;

    fn read_struct_begin(&mut self) -> Result<()>;
    fn read_struct_end(&mut self) -> Result<()>;

    /// Read the next field header; [`FieldHeader::is_stop`] signals the end
    /// of the enclosing struct.
    fn read_field_begin(&mut self) -> Result<FieldHeader>;
    fn read_field_end(&mut self) -> Result<()>;

    fn read_map_begin(&mut self) -> Result<MapHeader>;
    fn read_map_end(&mut self) -> Result<()>;
    fn read_list_begin(&mut self) -> Result<ListHeader>;
    fn read_list_end(&mut self) -> Result<()>;
    fn read_set_begin(&mut self) -> Result<ListHeader>;
    fn read_set_end(&mut self) -> Result<()>;

    fn read_bool(&mut self) -> Result<bool>;
    fn read_byte(&mut self) -> Result<i8>;
    fn read_i16(&mut self) -> Result<i16>;
    fn read_i32(&mut self) -> Result<i32>;
    fn read_i64(&mut self) -> Result<i64>;
    fn read_double(&mut self) -> Result<f64>;
    fn read_string(&mut self) -> Result<String>;
    fn read_binary(&mut self) -> Result<Bytes>;

    /// Consume an unknown value of the declared type without schema
    /// knowledge. Required for forward compatibility with unknown fields;
    /// recursive for STRUCT/MAP/SET/LIST. The JSON protocol does not support
    /// this and fails with `NotImplemented`.
    fn skip(&mut self, field_type: TType) -> Result<()>;
}

/// Recursive-descent skip shared by the Binary and Compact protocols.
///
/// Depth is bounded by [`MAX_SKIP_DEPTH`]; exceeding it is a `DepthLimit`
/// error rather than a stack overflow on adversarial input.
pub(crate) fn skip_value<P: ProtocolRead + ?Sized>(
    protocol: &mut P,
    field_type: TType,
    depth: usize,
) -> Result<()> {
    if depth >= MAX_SKIP_DEPTH {
        return Err(ThriftError::DepthLimit(format!(
            "skip nesting exceeds {} levels",
            MAX_SKIP_DEPTH
        )));
    }
    match field_type {
        TType::Stop => Ok(()),
        TType::Bool => protocol.read_bool().map(|_| ()),
        TType::Byte => protocol.read_byte().map(|_| ()),
        TType::I16 => protocol.read_i16().map(|_| ()),
        TType::I32 => protocol.read_i32().map(|_| ()),
        TType::I64 => protocol.read_i64().map(|_| ()),
        TType::Double => protocol.read_double().map(|_| ()),
        TType::String => protocol.read_binary().map(|_| ()),
        TType::Struct => {
            protocol.read_struct_begin()?;
            loop {
                let field = protocol.read_field_begin()?;
                if field.is_stop() {
                    break;
                }
                skip_value(protocol, field.field_type, depth + 1)?;
                protocol.read_field_end()?;
            }
            protocol.read_struct_end()
        }
        TType::Map => {
            let header = protocol.read_map_begin()?;
            for _ in 0..header.size {
                skip_value(protocol, header.key_type, depth + 1)?;
                skip_value(protocol, header.value_type, depth + 1)?;
            }
            protocol.read_map_end()
        }
        TType::Set => {
            let header = protocol.read_set_begin()?;
            for _ in 0..header.size {
                skip_value(protocol, header.element_type, depth + 1)?;
            }
            protocol.read_set_end()
        }
        TType::List => {
            let header = protocol.read_list_begin()?;
            for _ in 0..header.size {
                skip_value(protocol, header.element_type, depth + 1)?;
            }
            protocol.read_list_end()
        }
    }
}

/// Selects which wire encoding a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Binary,
    Compact,
    Json,
}

impl ProtocolKind {
    /// Decode only the message header from an assembled inbound buffer.
    ///
    /// Used by the connection layer to route a reply by sequence id without
    /// consuming the body; the untouched buffer is handed to whoever owns the
    /// pending call.
    pub fn read_message_header(&self, buffer: Bytes) -> Result<MessageHeader> {
        let transport = MemoryTransport::with_input(buffer);
        match self {
            ProtocolKind::Binary => BinaryProtocol::new(transport).read_message_begin(),
            ProtocolKind::Compact => CompactProtocol::new(transport).read_message_begin(),
            ProtocolKind::Json => JsonProtocol::new(transport).read_message_begin(),
        }
    }
}

/// Kinds of application-level exception carried in an EXCEPTION reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ApplicationErrorKind {
    Unknown = 0,
    UnknownMethod = 1,
    InvalidMessageType = 2,
    WrongMethodName = 3,
    BadSequenceId = 4,
    MissingResult = 5,
    InternalError = 6,
    ProtocolError = 7,
}

impl From<i32> for ApplicationErrorKind {
    fn from(v: i32) -> Self {
        match v {
            1 => ApplicationErrorKind::UnknownMethod,
            2 => ApplicationErrorKind::InvalidMessageType,
            3 => ApplicationErrorKind::WrongMethodName,
            4 => ApplicationErrorKind::BadSequenceId,
            5 => ApplicationErrorKind::MissingResult,
            6 => ApplicationErrorKind::InternalError,
            7 => ApplicationErrorKind::ProtocolError,
            _ => ApplicationErrorKind::Unknown,
        }
    }
}

/// Application-level exception struct: field 1 is the message, field 2 the
/// kind. This is what dispatch failures (unknown method, unknown multiplexed
/// service) report back to the caller instead of faulting the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationError {
    pub kind: ApplicationErrorKind,
    pub message: String,
}

impl ApplicationError {
    pub fn new(kind: ApplicationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Serialize as the exception payload struct.
    pub fn write(&self, protocol: &mut dyn ProtocolWrite) -> Result<()> {
        protocol.write_struct_begin("TApplicationException")?;
        protocol.write_field_begin(TType::String, 1)?;
        protocol.write_string(&self.message)?;
        protocol.write_field_end()?;
        protocol.write_field_begin(TType::I32, 2)?;
        protocol.write_i32(self.kind as i32)?;
        protocol.write_field_end()?;
        protocol.write_field_stop()?;
        protocol.write_struct_end()
    }

    /// Deserialize the exception payload struct, skipping unknown fields.
    pub fn read(protocol: &mut dyn ProtocolRead) -> Result<Self> {
        let mut message = String::new();
        let mut kind = ApplicationErrorKind::Unknown;

        protocol.read_struct_begin()?;
        loop {
            let field = protocol.read_field_begin()?;
            if field.is_stop() {
                break;
            }
            match (field.id, field.field_type) {
                (1, TType::String) => message = protocol.read_string()?,
                (2, TType::I32) => kind = protocol.read_i32()?.into(),
                (_, other) => protocol.skip(other)?,
            }
            protocol.read_field_end()?;
        }
        protocol.read_struct_end()?;

        Ok(Self { kind, message })
    }

    /// Write a complete EXCEPTION reply for the given method and sequence id.
    pub fn write_reply(
        &self,
        protocol: &mut dyn ProtocolWrite,
        method_name: &str,
        sequence_id: i32,
    ) -> Result<()> {
        let header = MessageHeader::new(method_name, MessageType::Exception, sequence_id);
        protocol.write_message_begin(&header)?;
        self.write(protocol)?;
        protocol.write_message_end()?;
        protocol.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    #[test]
    fn test_application_error_roundtrip_binary() {
        let (transport, rx) = MemoryTransport::channel();
        let mut out = BinaryProtocol::new(transport);

        let error = ApplicationError::new(ApplicationErrorKind::UnknownMethod, "no such method");
        error
            .write_reply(&mut out, "frobnicate", 7)
            .expect("write exception reply");

        let buffer = rx.try_recv().unwrap();
        let mut input = BinaryProtocol::new(MemoryTransport::with_input(buffer));
        let header = input.read_message_begin().unwrap();
        assert_eq!(header.name, "frobnicate");
        assert_eq!(header.message_type, MessageType::Exception);
        assert_eq!(header.sequence_id, 7);

        let decoded = ApplicationError::read(&mut input).unwrap();
        assert_eq!(decoded, error);
    }

    #[test]
    fn test_application_error_kind_from_i32() {
        assert_eq!(
            ApplicationErrorKind::from(1),
            ApplicationErrorKind::UnknownMethod
        );
        assert_eq!(ApplicationErrorKind::from(42), ApplicationErrorKind::Unknown);
    }
}
