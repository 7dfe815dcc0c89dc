//! Core wire types shared by all protocols.
//!
//! A [`TType`] identifies a value's shape on the wire independent of any
//! language type; [`MessageType`] classifies the RPC envelope. The header
//! structs are what the `read_*_begin` operations hand back to generated
//! serializer code.

use crate::error::{Result, ThriftError};

/// Wire-type tag for a Thrift value.
///
/// `Stop` is a sentinel terminating a field sequence, not a value type.
/// `String` is used for both text and raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TType {
    Stop = 0,
    Bool = 2,
    Byte = 3,
    Double = 4,
    I16 = 6,
    I32 = 8,
    I64 = 10,
    String = 11,
    Struct = 12,
    Map = 13,
    Set = 14,
    List = 15,
}

impl TryFrom<u8> for TType {
    type Error = ThriftError;

    fn try_from(b: u8) -> Result<Self> {
        match b {
            0 => Ok(TType::Stop),
            2 => Ok(TType::Bool),
            3 => Ok(TType::Byte),
            4 => Ok(TType::Double),
            6 => Ok(TType::I16),
            8 => Ok(TType::I32),
            10 => Ok(TType::I64),
            11 => Ok(TType::String),
            12 => Ok(TType::Struct),
            13 => Ok(TType::Map),
            14 => Ok(TType::Set),
            15 => Ok(TType::List),
            _ => Err(ThriftError::InvalidData(format!("unknown type tag: {}", b))),
        }
    }
}

/// Type of an RPC message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Call = 1,
    Reply = 2,
    Exception = 3,
    Oneway = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = ThriftError;

    fn try_from(b: u8) -> Result<Self> {
        match b {
            1 => Ok(MessageType::Call),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::Exception),
            4 => Ok(MessageType::Oneway),
            _ => Err(ThriftError::InvalidData(format!(
                "unknown message type: {}",
                b
            ))),
        }
    }
}

/// Decoded RPC message header.
///
/// The sequence id is caller-assigned and echoed verbatim in the reply; it is
/// the sole correlation key between request and response on a shared
/// connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    /// Method name; in multiplexed traffic this carries the
    /// `"service:method"` composite form.
    pub name: String,
    /// Message kind (CALL, REPLY, EXCEPTION, ONEWAY).
    pub message_type: MessageType,
    /// Caller-assigned correlation number.
    pub sequence_id: i32,
}

impl MessageHeader {
    pub fn new(name: impl Into<String>, message_type: MessageType, sequence_id: i32) -> Self {
        Self {
            name: name.into(),
            message_type,
            sequence_id,
        }
    }
}

/// Decoded struct field header. A `field_type` of [`TType::Stop`] signals the
/// end of the enclosing struct's field sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldHeader {
    pub field_type: TType,
    pub id: i16,
}

impl FieldHeader {
    pub fn new(field_type: TType, id: i16) -> Self {
        Self { field_type, id }
    }

    /// The terminating sentinel header.
    pub fn stop() -> Self {
        Self {
            field_type: TType::Stop,
            id: 0,
        }
    }

    #[inline]
    pub fn is_stop(&self) -> bool {
        self.field_type == TType::Stop
    }
}

/// Decoded list or set header. Size has already been validated non-negative
/// and against the configured container limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListHeader {
    pub element_type: TType,
    pub size: usize,
}

/// Decoded map header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapHeader {
    pub key_type: TType,
    pub value_type: TType,
    pub size: usize,
}
