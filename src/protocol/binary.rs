//! Binary protocol - fixed-width big-endian encoding.
//!
//! Every integer is big-endian fixed-width, doubles are 8-byte IEEE 754,
//! strings and binary are 4-byte-length-prefixed raw bytes. Struct framing
//! has no over-the-wire markers beyond the per-field type+id header and the
//! terminating STOP byte. This is the most straightforward of the three
//! protocols and serves as the semantic baseline for type identifiers.

use bytes::Bytes;

use super::{skip_value, ProtocolRead, ProtocolWrite};
use crate::error::{Result, ThriftError};
use crate::transport::Transport;
use crate::types::{FieldHeader, ListHeader, MapHeader, MessageHeader, MessageType, TType};

/// Version marker OR-ed with the message type in strict mode.
const VERSION_1: u32 = 0x8001_0000;
/// Mask selecting the version field of a strict message header.
const VERSION_MASK: u32 = 0xffff_0000;
/// Mask selecting the message type in the low byte.
const TYPE_MASK: u32 = 0x0000_00ff;

/// Binary protocol over a transport.
///
/// `strict_write` defaults to on (versioned message headers), `strict_read`
/// defaults to off (legacy unversioned headers are tolerated), matching the
/// historical defaults of the wire format.
pub struct BinaryProtocol<T: Transport> {
    transport: T,
    strict_read: bool,
    strict_write: bool,
    /// Longest accepted string/binary during decode; 0 means unlimited.
    string_limit: usize,
    /// Largest accepted container size during decode; 0 means unlimited.
    container_limit: usize,
}

impl<T: Transport> BinaryProtocol<T> {
    /// Create a protocol with default strictness (strict write, lenient read).
    pub fn new(transport: T) -> Self {
        Self::with_strictness(transport, false, true)
    }

    /// Create a protocol with explicit strictness flags.
    pub fn with_strictness(transport: T, strict_read: bool, strict_write: bool) -> Self {
        Self {
            transport,
            strict_read,
            strict_write,
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

    fn read_raw_byte(&mut self) -> Result<u8> {
        Ok(self.transport.read_bytes(1)?[0])
    }

    fn check_string_size(&self, size: i32) -> Result<usize> {
        if size < 0 {
            return Err(ThriftError::NegativeSize(format!(
                "string length {}",
                size
            )));
        }
        let size = size as usize;
        if self.string_limit != 0 && size > self.string_limit {
            return Err(ThriftError::SizeLimit(format!(
                "string length {} exceeds limit {}",
                size, self.string_limit
            )));
        }
        Ok(size)
    }

    fn check_container_size(&self, size: i32) -> Result<usize> {
        if size < 0 {
            return Err(ThriftError::NegativeSize(format!(
                "container size {}",
                size
            )));
        }
        let size = size as usize;
        if self.container_limit != 0 && size > self.container_limit {
            return Err(ThriftError::SizeLimit(format!(
                "container size {} exceeds limit {}",
                size, self.container_limit
            )));
        }
        Ok(size)
    }

    /// Read a string whose length was already consumed (legacy message
    /// headers put the name length where the version marker would be).
    fn read_string_body(&mut self, size: usize) -> Result<String> {
        let bytes = self.transport.read_bytes(size)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ThriftError::InvalidData(format!("invalid UTF-8 in string: {}", e)))
    }
}

impl<T: Transport> ProtocolWrite for BinaryProtocol<T> {
    fn write_message_begin(&mut self, header: &MessageHeader) -> Result<()> {
        if self.strict_write {
            let versioned = (VERSION_1 | header.message_type as u32) as i32;
            self.write_i32(versioned)?;
            self.write_string(&header.name)?;
            self.write_i32(header.sequence_id)
        } else {
            self.write_string(&header.name)?;
            self.write_byte(header.message_type as u8 as i8)?;
            self.write_i32(header.sequence_id)
        }
    }

    fn write_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_struct_begin(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn write_struct_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_begin(&mut self, field_type: TType, id: i16) -> Result<()> {
        self.write_byte(field_type as u8 as i8)?;
        self.write_i16(id)
    }

    fn write_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_stop(&mut self) -> Result<()> {
        self.write_byte(TType::Stop as u8 as i8)
    }

    fn write_map_begin(&mut self, key_type: TType, value_type: TType, size: usize) -> Result<()> {
        self.write_byte(key_type as u8 as i8)?;
        self.write_byte(value_type as u8 as i8)?;
        self.write_i32(size as i32)
    }

    fn write_map_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_list_begin(&mut self, element_type: TType, size: usize) -> Result<()> {
        self.write_byte(element_type as u8 as i8)?;
        self.write_i32(size as i32)
    }

    fn write_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_set_begin(&mut self, element_type: TType, size: usize) -> Result<()> {
        self.write_list_begin(element_type, size)
    }

    fn write_set_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_byte(if value { 1 } else { 0 })
    }

    fn write_byte(&mut self, value: i8) -> Result<()> {
        self.transport.write(&[value as u8]);
        Ok(())
    }

    fn write_i16(&mut self, value: i16) -> Result<()> {
        self.transport.write(&value.to_be_bytes());
        Ok(())
    }

    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.transport.write(&value.to_be_bytes());
        Ok(())
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        self.transport.write(&value.to_be_bytes());
        Ok(())
    }

    fn write_double(&mut self, value: f64) -> Result<()> {
        self.transport.write(&value.to_bits().to_be_bytes());
        Ok(())
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_binary(value.as_bytes())
    }

    fn write_binary(&mut self, value: &[u8]) -> Result<()> {
        self.write_i32(value.len() as i32)?;
        self.transport.write(value);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.transport.flush()
    }
}

impl<T: Transport> ProtocolRead for BinaryProtocol<T> {
    fn read_message_begin(&mut self) -> Result<MessageHeader> {
        let size = self.read_i32()?;
        if size < 0 {
            let version = (size as u32) & VERSION_MASK;
            if version != VERSION_1 {
                return Err(ThriftError::BadVersion(format!(
                    "bad version in message header: {:#010x}",
                    size as u32
                )));
            }
            let message_type = MessageType::try_from(((size as u32) & TYPE_MASK) as u8)?;
            let name = self.read_string()?;
            let sequence_id = self.read_i32()?;
            Ok(MessageHeader::new(name, message_type, sequence_id))
        } else {
            if self.strict_read {
                return Err(ThriftError::BadVersion(
                    "no protocol version header".to_string(),
                ));
            }
            let size = self.check_string_size(size)?;
            let name = self.read_string_body(size)?;
            let message_type = MessageType::try_from(self.read_byte()? as u8)?;
            let sequence_id = self.read_i32()?;
            Ok(MessageHeader::new(name, message_type, sequence_id))
        }
    }

    fn read_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_struct_begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_struct_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_field_begin(&mut self) -> Result<FieldHeader> {
        let field_type = TType::try_from(self.read_byte()? as u8)?;
        if field_type == TType::Stop {
            return Ok(FieldHeader::stop());
        }
        let id = self.read_i16()?;
        Ok(FieldHeader::new(field_type, id))
    }

    fn read_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_map_begin(&mut self) -> Result<MapHeader> {
        let key_type = TType::try_from(self.read_byte()? as u8)?;
        let value_type = TType::try_from(self.read_byte()? as u8)?;
        let size = self.read_i32()?;
        Ok(MapHeader {
            key_type,
            value_type,
            size: self.check_container_size(size)?,
        })
    }

    fn read_map_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_list_begin(&mut self) -> Result<ListHeader> {
        let element_type = TType::try_from(self.read_byte()? as u8)?;
        let size = self.read_i32()?;
        Ok(ListHeader {
            element_type,
            size: self.check_container_size(size)?,
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
        Ok(self.read_byte()? != 0)
    }

    fn read_byte(&mut self) -> Result<i8> {
        Ok(self.read_raw_byte()? as i8)
    }

    fn read_i16(&mut self) -> Result<i16> {
        let bytes = self.transport.read_bytes(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.transport.read_bytes(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.transport.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        Ok(i64::from_be_bytes(raw))
    }

    fn read_double(&mut self) -> Result<f64> {
        let bytes = self.transport.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        Ok(f64::from_bits(u64::from_be_bytes(raw)))
    }

    fn read_string(&mut self) -> Result<String> {
        let size = self.read_i32()?;
        let size = self.check_string_size(size)?;
        self.read_string_body(size)
    }

    fn read_binary(&mut self) -> Result<Bytes> {
        let size = self.read_i32()?;
        let size = self.check_string_size(size)?;
        self.transport.read_bytes(size)
    }

    fn skip(&mut self, field_type: TType) -> Result<()> {
        skip_value(self, field_type, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn write_capture() -> (
        BinaryProtocol<MemoryTransport>,
        std::sync::mpsc::Receiver<Bytes>,
    ) {
        let (transport, rx) = MemoryTransport::channel();
        (BinaryProtocol::new(transport), rx)
    }

    fn reader(buffer: Bytes) -> BinaryProtocol<MemoryTransport> {
        BinaryProtocol::new(MemoryTransport::with_input(buffer))
    }

    #[test]
    fn test_strict_message_header_roundtrip() {
        let (mut out, rx) = write_capture();
        let header = MessageHeader::new("ping", MessageType::Call, 17);
        out.write_message_begin(&header).unwrap();
        out.write_message_end().unwrap();
        out.flush().unwrap();

        let buffer = rx.try_recv().unwrap();
        // First 4 bytes carry version|type: 0x80 0x01 0x00 0x01 for CALL.
        assert_eq!(&buffer[..4], &[0x80, 0x01, 0x00, 0x01]);

        let mut input = reader(buffer);
        let decoded = input.read_message_begin().unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_strict_decoder_rejects_legacy_header() {
        let (transport, rx) = MemoryTransport::channel();
        let mut out = BinaryProtocol::with_strictness(transport, false, false);
        out.write_message_begin(&MessageHeader::new("ping", MessageType::Call, 1))
            .unwrap();
        out.flush().unwrap();

        let buffer = rx.try_recv().unwrap();
        let mut strict =
            BinaryProtocol::with_strictness(MemoryTransport::with_input(buffer), true, true);
        let err = strict.read_message_begin().unwrap_err();
        assert!(matches!(err, ThriftError::BadVersion(_)));
    }

    #[test]
    fn test_legacy_header_accepted_when_lenient() {
        let (transport, rx) = MemoryTransport::channel();
        let mut out = BinaryProtocol::with_strictness(transport, false, false);
        let header = MessageHeader::new("legacy", MessageType::Oneway, 9);
        out.write_message_begin(&header).unwrap();
        out.flush().unwrap();

        let mut input = reader(rx.try_recv().unwrap());
        assert_eq!(input.read_message_begin().unwrap(), header);
    }

    #[test]
    fn test_bad_version_marker_rejected() {
        // Negative header word with the wrong version field.
        let mut input = reader(Bytes::from_static(&[0xde, 0xad, 0x00, 0x01]));
        let err = input.read_message_begin().unwrap_err();
        assert!(matches!(err, ThriftError::BadVersion(_)));
    }

    #[test]
    fn test_primitive_roundtrip() {
        let (mut out, rx) = write_capture();
        out.write_bool(true).unwrap();
        out.write_byte(-5).unwrap();
        out.write_i16(-300).unwrap();
        out.write_i32(1 << 20).unwrap();
        out.write_i64(-(1_i64 << 40)).unwrap();
        out.write_double(6.5).unwrap();
        out.write_string("héllo").unwrap();
        out.write_binary(&[0, 255, 127]).unwrap();
        out.flush().unwrap();

        let mut input = reader(rx.try_recv().unwrap());
        assert!(input.read_bool().unwrap());
        assert_eq!(input.read_byte().unwrap(), -5);
        assert_eq!(input.read_i16().unwrap(), -300);
        assert_eq!(input.read_i32().unwrap(), 1 << 20);
        assert_eq!(input.read_i64().unwrap(), -(1_i64 << 40));
        assert_eq!(input.read_double().unwrap(), 6.5);
        assert_eq!(input.read_string().unwrap(), "héllo");
        assert_eq!(&input.read_binary().unwrap()[..], &[0, 255, 127]);
    }

    #[test]
    fn test_struct_fields_and_stop() {
        let (mut out, rx) = write_capture();
        out.write_struct_begin("Pair").unwrap();
        out.write_field_begin(TType::I32, 1).unwrap();
        out.write_i32(42).unwrap();
        out.write_field_end().unwrap();
        out.write_field_begin(TType::String, 2).unwrap();
        out.write_string("value").unwrap();
        out.write_field_end().unwrap();
        out.write_field_stop().unwrap();
        out.write_struct_end().unwrap();
        out.flush().unwrap();

        let mut input = reader(rx.try_recv().unwrap());
        input.read_struct_begin().unwrap();
        let f1 = input.read_field_begin().unwrap();
        assert_eq!(f1, FieldHeader::new(TType::I32, 1));
        assert_eq!(input.read_i32().unwrap(), 42);
        input.read_field_end().unwrap();
        let f2 = input.read_field_begin().unwrap();
        assert_eq!(f2, FieldHeader::new(TType::String, 2));
        assert_eq!(input.read_string().unwrap(), "value");
        input.read_field_end().unwrap();
        assert!(input.read_field_begin().unwrap().is_stop());
        input.read_struct_end().unwrap();
    }

    #[test]
    fn test_container_headers_roundtrip() {
        let (mut out, rx) = write_capture();
        out.write_list_begin(TType::I64, 3).unwrap();
        out.write_map_begin(TType::String, TType::Bool, 2).unwrap();
        out.write_set_begin(TType::Byte, 0).unwrap();
        out.flush().unwrap();

        let mut input = reader(rx.try_recv().unwrap());
        let list = input.read_list_begin().unwrap();
        assert_eq!(list.element_type, TType::I64);
        assert_eq!(list.size, 3);
        let map = input.read_map_begin().unwrap();
        assert_eq!(map.key_type, TType::String);
        assert_eq!(map.value_type, TType::Bool);
        assert_eq!(map.size, 2);
        let set = input.read_set_begin().unwrap();
        assert_eq!(set.element_type, TType::Byte);
        assert_eq!(set.size, 0);
    }

    #[test]
    fn test_negative_container_size_rejected() {
        let (mut out, rx) = write_capture();
        out.write_byte(TType::I32 as u8 as i8).unwrap();
        out.write_i32(-4).unwrap();
        out.flush().unwrap();

        let mut input = reader(rx.try_recv().unwrap());
        let err = input.read_list_begin().unwrap_err();
        assert!(matches!(err, ThriftError::NegativeSize(_)));
    }

    #[test]
    fn test_string_limit_enforced() {
        let (mut out, rx) = write_capture();
        out.write_string("this string is too long").unwrap();
        out.flush().unwrap();

        let mut input = reader(rx.try_recv().unwrap()).with_limits(4, 0);
        let err = input.read_string().unwrap_err();
        assert!(matches!(err, ThriftError::SizeLimit(_)));
    }

    #[test]
    fn test_skip_nested_unknown_value() {
        let (mut out, rx) = write_capture();
        // struct { 1: list<i32>, 2: map<string,struct{1:bool}>, 3: i64 }
        out.write_struct_begin("Unknown").unwrap();
        out.write_field_begin(TType::List, 1).unwrap();
        out.write_list_begin(TType::I32, 2).unwrap();
        out.write_i32(1).unwrap();
        out.write_i32(2).unwrap();
        out.write_list_end().unwrap();
        out.write_field_end().unwrap();
        out.write_field_begin(TType::Map, 2).unwrap();
        out.write_map_begin(TType::String, TType::Struct, 1).unwrap();
        out.write_string("k").unwrap();
        out.write_struct_begin("Inner").unwrap();
        out.write_field_begin(TType::Bool, 1).unwrap();
        out.write_bool(true).unwrap();
        out.write_field_end().unwrap();
        out.write_field_stop().unwrap();
        out.write_struct_end().unwrap();
        out.write_map_end().unwrap();
        out.write_field_end().unwrap();
        out.write_field_begin(TType::I64, 3).unwrap();
        out.write_i64(99).unwrap();
        out.write_field_end().unwrap();
        out.write_field_stop().unwrap();
        out.write_struct_end().unwrap();
        // Trailing sentinel value to prove skip consumed exactly the struct.
        out.write_i32(123_456).unwrap();
        out.flush().unwrap();

        let mut input = reader(rx.try_recv().unwrap());
        input.skip(TType::Struct).unwrap();
        assert_eq!(input.read_i32().unwrap(), 123_456);
    }
}
