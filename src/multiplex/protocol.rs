//! Protocol wrappers used by the multiplexing layer.

use bytes::Bytes;

use super::multiplexed_name;
use crate::error::Result;
use crate::protocol::{ProtocolRead, ProtocolWrite};
use crate::types::{FieldHeader, ListHeader, MapHeader, MessageHeader, TType};

/// Write-side wrapper that prefixes every message name with a service name.
///
/// Everything except `write_message_begin` passes straight through, so the
/// wire encoding is untouched; only the composite name marks the message as
/// multiplexed.
pub struct MultiplexedProtocol<P: ProtocolWrite> {
    inner: P,
    service: String,
}

impl<P: ProtocolWrite> MultiplexedProtocol<P> {
    pub fn new(inner: P, service: impl Into<String>) -> Self {
        Self {
            inner,
            service: service.into(),
        }
    }

    /// The service this wrapper targets.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Consume the wrapper, returning the wrapped protocol.
    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: ProtocolWrite> ProtocolWrite for MultiplexedProtocol<P> {
    fn write_message_begin(&mut self, header: &MessageHeader) -> Result<()> {
        let composite = MessageHeader::new(
            multiplexed_name(&self.service, &header.name),
            header.message_type,
            header.sequence_id,
        );
        self.inner.write_message_begin(&composite)
    }

    fn write_message_end(&mut self) -> Result<()> {
        self.inner.write_message_end()
    }

    fn write_struct_begin(&mut self, name: &str) -> Result<()> {
        self.inner.write_struct_begin(name)
    }

    fn write_struct_end(&mut self) -> Result<()> {
        self.inner.write_struct_end()
    }

    fn write_field_begin(&mut self, field_type: TType, id: i16) -> Result<()> {
        self.inner.write_field_begin(field_type, id)
    }

    fn write_field_end(&mut self) -> Result<()> {
        self.inner.write_field_end()
    }

    fn write_field_stop(&mut self) -> Result<()> {
        self.inner.write_field_stop()
    }

    fn write_map_begin(&mut self, key_type: TType, value_type: TType, size: usize) -> Result<()> {
        self.inner.write_map_begin(key_type, value_type, size)
    }

    fn write_map_end(&mut self) -> Result<()> {
        self.inner.write_map_end()
    }

    fn write_list_begin(&mut self, element_type: TType, size: usize) -> Result<()> {
        self.inner.write_list_begin(element_type, size)
    }

    fn write_list_end(&mut self) -> Result<()> {
        self.inner.write_list_end()
    }

    fn write_set_begin(&mut self, element_type: TType, size: usize) -> Result<()> {
        self.inner.write_set_begin(element_type, size)
    }

    fn write_set_end(&mut self) -> Result<()> {
        self.inner.write_set_end()
    }

    fn write_bool(&mut self, value: bool) -> Result<()> {
        self.inner.write_bool(value)
    }

    fn write_byte(&mut self, value: i8) -> Result<()> {
        self.inner.write_byte(value)
    }

    fn write_i16(&mut self, value: i16) -> Result<()> {
        self.inner.write_i16(value)
    }

    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.inner.write_i32(value)
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        self.inner.write_i64(value)
    }

    fn write_double(&mut self, value: f64) -> Result<()> {
        self.inner.write_double(value)
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        self.inner.write_string(value)
    }

    fn write_binary(&mut self, value: &[u8]) -> Result<()> {
        self.inner.write_binary(value)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

/// Read-side wrapper that replays an already-consumed message header.
///
/// The dispatcher reads the header once to learn the target service, then
/// hands the per-service processor this wrapper with the header rewritten to
/// the bare method name. The processor's own `read_message_begin` sees the
/// stored header; every other read continues from the live protocol.
pub struct StoredMessageProtocol<'a> {
    inner: &'a mut dyn ProtocolRead,
    stored: Option<MessageHeader>,
}

impl<'a> StoredMessageProtocol<'a> {
    pub fn new(inner: &'a mut dyn ProtocolRead, header: MessageHeader) -> Self {
        Self {
            inner,
            stored: Some(header),
        }
    }
}

impl ProtocolRead for StoredMessageProtocol<'_> {
    fn read_message_begin(&mut self) -> Result<MessageHeader> {
        match self.stored.take() {
            Some(header) => Ok(header),
            // Replay is single-shot; later calls fall through to the wire.
            None => self.inner.read_message_begin(),
        }
    }

    fn read_message_end(&mut self) -> Result<()> {
        self.inner.read_message_end()
    }

    fn read_struct_begin(&mut self) -> Result<()> {
        self.inner.read_struct_begin()
    }

    fn read_struct_end(&mut self) -> Result<()> {
        self.inner.read_struct_end()
    }

    fn read_field_begin(&mut self) -> Result<FieldHeader> {
        self.inner.read_field_begin()
    }

    fn read_field_end(&mut self) -> Result<()> {
        self.inner.read_field_end()
    }

    fn read_map_begin(&mut self) -> Result<MapHeader> {
        self.inner.read_map_begin()
    }

    fn read_map_end(&mut self) -> Result<()> {
        self.inner.read_map_end()
    }

    fn read_list_begin(&mut self) -> Result<ListHeader> {
        self.inner.read_list_begin()
    }

    fn read_list_end(&mut self) -> Result<()> {
        self.inner.read_list_end()
    }

    fn read_set_begin(&mut self) -> Result<ListHeader> {
        self.inner.read_set_begin()
    }

    fn read_set_end(&mut self) -> Result<()> {
        self.inner.read_set_end()
    }

    fn read_bool(&mut self) -> Result<bool> {
        self.inner.read_bool()
    }

    fn read_byte(&mut self) -> Result<i8> {
        self.inner.read_byte()
    }

    fn read_i16(&mut self) -> Result<i16> {
        self.inner.read_i16()
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.inner.read_i32()
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.inner.read_i64()
    }

    fn read_double(&mut self) -> Result<f64> {
        self.inner.read_double()
    }

    fn read_string(&mut self) -> Result<String> {
        self.inner.read_string()
    }

    fn read_binary(&mut self) -> Result<Bytes> {
        self.inner.read_binary()
    }

    fn skip(&mut self, field_type: TType) -> Result<()> {
        self.inner.skip(field_type)
    }
}
