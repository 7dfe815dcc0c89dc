//! Compact protocol - space-optimized encoding.
//!
//! Uses base-128 varints with zigzag sign handling for all signed integers,
//! delta-compressed field identifiers relative to the previous sibling field,
//! and boolean values packed into the field-type nibble so a boolean field
//! costs one byte total. Collection headers pack small sizes into the high
//! nibble of the element-type byte.
//!
//! The field-id delta is scoped per struct: `*_struct_begin` pushes the
//! current "last field id" and resets it, `*_struct_end` pops it back.
//! Mis-scoping corrupts every field id below the first bad level, so the
//! push/pop must bracket exactly.

use bytes::Bytes;

use super::{skip_value, ProtocolRead, ProtocolWrite};
use crate::error::{Result, ThriftError};
use crate::transport::Transport;
use crate::types::{FieldHeader, ListHeader, MapHeader, MessageHeader, MessageType, TType};

/// Protocol identifier byte, first on the wire.
const PROTOCOL_ID: u8 = 0x82;
/// 5-bit version number.
const VERSION: u8 = 1;
/// Mask selecting the version bits of the second header byte.
const VERSION_MASK: u8 = 0x1f;
/// Mask selecting the message-type bits of the second header byte.
const TYPE_MASK: u8 = 0xe0;
/// Message type occupies the 3 bits above the version.
const TYPE_SHIFT_AMOUNT: u8 = 5;
const TYPE_BITS: u8 = 0x07;

/// Largest collection size that packs into the header nibble.
const MAX_NIBBLE_SIZE: usize = 14;

/// Compact type codes, kept within one nibble.
mod ct {
    pub const STOP: u8 = 0x00;
    pub const BOOLEAN_TRUE: u8 = 0x01;
    pub const BOOLEAN_FALSE: u8 = 0x02;
    pub const BYTE: u8 = 0x03;
    pub const I16: u8 = 0x04;
    pub const I32: u8 = 0x05;
    pub const I64: u8 = 0x06;
    pub const DOUBLE: u8 = 0x07;
    pub const BINARY: u8 = 0x08;
    pub const LIST: u8 = 0x09;
    pub const SET: u8 = 0x0a;
    pub const MAP: u8 = 0x0b;
    pub const STRUCT: u8 = 0x0c;
}

/// Map a wire type to its compact nibble. Booleans map to BOOLEAN_TRUE as the
/// generic placeholder; field headers override with the value-bearing code.
fn compact_type(field_type: TType) -> u8 {
    match field_type {
        TType::Stop => ct::STOP,
        TType::Bool => ct::BOOLEAN_TRUE,
        TType::Byte => ct::BYTE,
        TType::I16 => ct::I16,
        TType::I32 => ct::I32,
        TType::I64 => ct::I64,
        TType::Double => ct::DOUBLE,
        TType::String => ct::BINARY,
        TType::List => ct::LIST,
        TType::Set => ct::SET,
        TType::Map => ct::MAP,
        TType::Struct => ct::STRUCT,
    }
}

/// Invert [`compact_type`] for decode.
fn wire_type(compact: u8) -> Result<TType> {
    match compact {
        ct::STOP => Ok(TType::Stop),
        ct::BOOLEAN_TRUE | ct::BOOLEAN_FALSE => Ok(TType::Bool),
        ct::BYTE => Ok(TType::Byte),
        ct::I16 => Ok(TType::I16),
        ct::I32 => Ok(TType::I32),
        ct::I64 => Ok(TType::I64),
        ct::DOUBLE => Ok(TType::Double),
        ct::BINARY => Ok(TType::String),
        ct::LIST => Ok(TType::List),
        ct::SET => Ok(TType::Set),
        ct::MAP => Ok(TType::Map),
        ct::STRUCT => Ok(TType::Struct),
        other => Err(ThriftError::InvalidData(format!(
            "unknown compact type: {:#04x}",
            other
        ))),
    }
}

#[inline]
fn i32_to_zigzag(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

#[inline]
fn i64_to_zigzag(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[inline]
fn zigzag_to_i32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

#[inline]
fn zigzag_to_i64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Compact protocol over a transport.
pub struct CompactProtocol<T: Transport> {
    transport: T,
    /// "Last field id" values for enclosing structs; pushed on struct entry,
    /// popped on exit.
    last_field_stack: Vec<i16>,
    /// Previous sibling field id within the current struct.
    last_field_id: i16,
    /// Field id whose boolean header is deferred until the value is known.
    pending_bool_field: Option<i16>,
    /// Boolean decoded from a value-bearing field header, consumed by the
    /// next `read_bool`.
    pending_bool_value: Option<bool>,
    string_limit: usize,
    container_limit: usize,
}

impl<T: Transport> CompactProtocol<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            last_field_stack: Vec::new(),
            last_field_id: 0,
            pending_bool_field: None,
            pending_bool_value: None,
            string_limit: 0,
            container_limit: 0,
        }
    }

    /// Set decode-time size caps; 0 disables a cap.
    pub fn with_limits(mut self, string_limit: usize, container_limit: usize) -> Self {
        self.string_limit = string_limit;
        self.container_limit = container_limit;
        self
    }

    /// Access the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the protocol, returning the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn write_raw_byte(&mut self, b: u8) {
        self.transport.write(&[b]);
    }

    fn read_raw_byte(&mut self) -> Result<u8> {
        Ok(self.transport.read_bytes(1)?[0])
    }

    fn write_varint32(&mut self, mut n: u32) {
        loop {
            if n & !0x7f == 0 {
                self.write_raw_byte(n as u8);
                return;
            }
            self.write_raw_byte((n as u8 & 0x7f) | 0x80);
            n >>= 7;
        }
    }

    fn write_varint64(&mut self, mut n: u64) {
        loop {
            if n & !0x7f == 0 {
                self.write_raw_byte(n as u8);
                return;
            }
            self.write_raw_byte((n as u8 & 0x7f) | 0x80);
            n >>= 7;
        }
    }

    fn read_varint32(&mut self) -> Result<u32> {
        let mut result: u32 = 0;
        let mut shift = 0;
        // 5 bytes carry up to 35 bits; a longer run is corruption.
        for _ in 0..5 {
            let b = self.read_raw_byte()?;
            result |= ((b & 0x7f) as u32) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(ThriftError::InvalidData(
            "varint32 longer than 5 bytes".to_string(),
        ))
    }

    fn read_varint64(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        for _ in 0..10 {
            let b = self.read_raw_byte()?;
            result |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(ThriftError::InvalidData(
            "varint64 longer than 10 bytes".to_string(),
        ))
    }

    /// Emit a field header, delta-compressed when the id gap allows it.
    fn write_field_header(&mut self, type_nibble: u8, id: i16) -> Result<()> {
        let delta = id.wrapping_sub(self.last_field_id);
        if id > self.last_field_id && delta <= 15 {
            self.write_raw_byte(((delta as u8) << 4) | type_nibble);
        } else {
            self.write_raw_byte(type_nibble);
            self.write_i16(id)?;
        }
        self.last_field_id = id;
        Ok(())
    }

    fn write_collection_header(&mut self, element_type: TType, size: usize) -> Result<()> {
        if size <= MAX_NIBBLE_SIZE {
            self.write_raw_byte(((size as u8) << 4) | compact_type(element_type));
        } else {
            self.write_raw_byte(0xf0 | compact_type(element_type));
            self.write_varint32(size as u32);
        }
        Ok(())
    }

    fn check_size(&self, raw: u32, limit: usize, what: &str) -> Result<usize> {
        if raw > i32::MAX as u32 {
            return Err(ThriftError::NegativeSize(format!("{} size {}", what, raw as i32)));
        }
        let size = raw as usize;
        if limit != 0 && size > limit {
            return Err(ThriftError::SizeLimit(format!(
                "{} size {} exceeds limit {}",
                what, size, limit
            )));
        }
        Ok(size)
    }
}

impl<T: Transport> ProtocolWrite for CompactProtocol<T> {
    fn write_message_begin(&mut self, header: &MessageHeader) -> Result<()> {
        self.write_raw_byte(PROTOCOL_ID);
        self.write_raw_byte(
            (VERSION & VERSION_MASK)
                | (((header.message_type as u8) << TYPE_SHIFT_AMOUNT) & TYPE_MASK),
        );
        self.write_varint32(header.sequence_id as u32);
        self.write_string(&header.name)
    }

    fn write_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_struct_begin(&mut self, _name: &str) -> Result<()> {
        self.last_field_stack.push(self.last_field_id);
        self.last_field_id = 0;
        Ok(())
    }

    fn write_struct_end(&mut self) -> Result<()> {
        self.last_field_id = self.last_field_stack.pop().unwrap_or(0);
        Ok(())
    }

    fn write_field_begin(&mut self, field_type: TType, id: i16) -> Result<()> {
        if field_type == TType::Bool {
            // Header is deferred: the value is packed into its low nibble.
            self.pending_bool_field = Some(id);
            Ok(())
        } else {
            self.write_field_header(compact_type(field_type), id)
        }
    }

    fn write_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_stop(&mut self) -> Result<()> {
        self.write_raw_byte(ct::STOP);
        Ok(())
    }

    fn write_map_begin(&mut self, key_type: TType, value_type: TType, size: usize) -> Result<()> {
        if size == 0 {
            self.write_raw_byte(0);
        } else {
            self.write_varint32(size as u32);
            self.write_raw_byte((compact_type(key_type) << 4) | compact_type(value_type));
        }
        Ok(())
    }

    fn write_map_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_list_begin(&mut self, element_type: TType, size: usize) -> Result<()> {
        self.write_collection_header(element_type, size)
    }

    fn write_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_set_begin(&mut self, element_type: TType, size: usize) -> Result<()> {
        self.write_collection_header(element_type, size)
    }

    fn write_set_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_bool(&mut self, value: bool) -> Result<()> {
        let nibble = if value {
            ct::BOOLEAN_TRUE
        } else {
            ct::BOOLEAN_FALSE
        };
        match self.pending_bool_field.take() {
            // Field header not yet written: fold the value into it.
            Some(id) => self.write_field_header(nibble, id),
            // Not part of a field (e.g. collection element): bare value byte.
            None => {
                self.write_raw_byte(nibble);
                Ok(())
            }
        }
    }

    fn write_byte(&mut self, value: i8) -> Result<()> {
        self.write_raw_byte(value as u8);
        Ok(())
    }

    fn write_i16(&mut self, value: i16) -> Result<()> {
        self.write_varint32(i32_to_zigzag(value as i32));
        Ok(())
    }

    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_varint32(i32_to_zigzag(value));
        Ok(())
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_varint64(i64_to_zigzag(value));
        Ok(())
    }

    fn write_double(&mut self, value: f64) -> Result<()> {
        self.transport.write(&value.to_bits().to_le_bytes());
        Ok(())
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_binary(value.as_bytes())
    }

    fn write_binary(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint32(value.len() as u32);
        self.transport.write(value);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.transport.flush()
    }
}

impl<T: Transport> ProtocolRead for CompactProtocol<T> {
    fn read_message_begin(&mut self) -> Result<MessageHeader> {
        let protocol_id = self.read_raw_byte()?;
        if protocol_id != PROTOCOL_ID {
            return Err(ThriftError::BadVersion(format!(
                "bad protocol identifier: {:#04x}",
                protocol_id
            )));
        }
        let version_and_type = self.read_raw_byte()?;
        let version = version_and_type & VERSION_MASK;
        if version != VERSION {
            return Err(ThriftError::BadVersion(format!(
                "bad protocol version: {}",
                version
            )));
        }
        let message_type =
            MessageType::try_from((version_and_type >> TYPE_SHIFT_AMOUNT) & TYPE_BITS)?;
        let sequence_id = self.read_varint32()? as i32;
        let name = self.read_string()?;
        Ok(MessageHeader::new(name, message_type, sequence_id))
    }

    fn read_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_struct_begin(&mut self) -> Result<()> {
        self.last_field_stack.push(self.last_field_id);
        self.last_field_id = 0;
        Ok(())
    }

    fn read_struct_end(&mut self) -> Result<()> {
        self.last_field_id = self.last_field_stack.pop().unwrap_or(0);
        Ok(())
    }

    fn read_field_begin(&mut self) -> Result<FieldHeader> {
        let b = self.read_raw_byte()?;
        let type_nibble = b & 0x0f;
        if type_nibble == ct::STOP {
            return Ok(FieldHeader::stop());
        }

        // High nibble carries the delta from the previous sibling, or zero
        // when the raw 16-bit id follows.
        let modifier = (b >> 4) & 0x0f;
        let id = if modifier == 0 {
            self.read_i16()?
        } else {
            self.last_field_id
                .checked_add(modifier as i16)
                .ok_or_else(|| {
                    ThriftError::InvalidData(format!(
                        "field id delta {} overflows past {}",
                        modifier, self.last_field_id
                    ))
                })?
        };
        let field_type = wire_type(type_nibble)?;

        if type_nibble == ct::BOOLEAN_TRUE || type_nibble == ct::BOOLEAN_FALSE {
            self.pending_bool_value = Some(type_nibble == ct::BOOLEAN_TRUE);
        }

        self.last_field_id = id;
        Ok(FieldHeader::new(field_type, id))
    }

    fn read_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_map_begin(&mut self) -> Result<MapHeader> {
        let raw_size = self.read_varint32()?;
        let size = self.check_size(raw_size, self.container_limit, "map")?;
        if size == 0 {
            // Degenerate case: no key/value type byte at all.
            return Ok(MapHeader {
                key_type: TType::Stop,
                value_type: TType::Stop,
                size: 0,
            });
        }
        let kv = self.read_raw_byte()?;
        Ok(MapHeader {
            key_type: wire_type((kv >> 4) & 0x0f)?,
            value_type: wire_type(kv & 0x0f)?,
            size,
        })
    }

    fn read_map_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_list_begin(&mut self) -> Result<ListHeader> {
        let size_and_type = self.read_raw_byte()?;
        let nibble_size = ((size_and_type >> 4) & 0x0f) as usize;
        let raw_size = if nibble_size == 15 {
            self.read_varint32()?
        } else {
            nibble_size as u32
        };
        Ok(ListHeader {
            element_type: wire_type(size_and_type & 0x0f)?,
            size: self.check_size(raw_size, self.container_limit, "list")?,
        })
    }

    fn read_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_set_begin(&mut self) -> Result<ListHeader> {
        self.read_list_begin()
    }

    fn read_set_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_bool(&mut self) -> Result<bool> {
        match self.pending_bool_value.take() {
            // Value was packed into the field header; no payload byte.
            Some(value) => Ok(value),
            None => Ok(self.read_raw_byte()? == ct::BOOLEAN_TRUE),
        }
    }

    fn read_byte(&mut self) -> Result<i8> {
        Ok(self.read_raw_byte()? as i8)
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(zigzag_to_i32(self.read_varint32()?) as i16)
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(zigzag_to_i32(self.read_varint32()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(zigzag_to_i64(self.read_varint64()?))
    }

    fn read_double(&mut self) -> Result<f64> {
        let bytes = self.transport.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        Ok(f64::from_bits(u64::from_le_bytes(raw)))
    }

    fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_binary()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ThriftError::InvalidData(format!("invalid UTF-8 in string: {}", e)))
    }

    fn read_binary(&mut self) -> Result<Bytes> {
        let raw_size = self.read_varint32()?;
        let size = self.check_size(raw_size, self.string_limit, "string")?;
        self.transport.read_bytes(size)
    }

    fn skip(&mut self, field_type: TType) -> Result<()> {
        skip_value(self, field_type, 0)
    }
}
