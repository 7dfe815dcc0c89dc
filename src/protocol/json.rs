//! JSON protocol - tree-shaped text encoding.
//!
//! A message is the array `[1, "name", type, seqid, payload]`. A struct is an
//! object keyed by the decimal field id, each value wrapped in a single-key
//! object naming the wire type (`{"i32": 42}`). Lists and sets are
//! `[tag, size, elements...]`; maps are `[keyTag, valueTag, size, object]`
//! with keys coerced to JSON strings and re-typed on decode. Booleans encode
//! as `1`/`0`.
//!
//! Unlike the binary encodings this protocol is not streamable: the write
//! side accumulates a tree of [`serde_json::Value`] fragments and serializes
//! at `write_message_end` (or `flush` for a bare root value); the read side
//! parses the entire message up front and consumes the tree destructively.
//! `skip` is unsupported and fails with `NotImplemented`, so decoders cannot
//! tolerate unknown fields under this encoding.

use bytes::Bytes;
use serde_json::{json, Map, Value};

use super::{ProtocolRead, ProtocolWrite};
use crate::error::{Result, ThriftError};
use crate::transport::Transport;
use crate::types::{FieldHeader, ListHeader, MapHeader, MessageHeader, MessageType, TType};

/// Envelope version number, first element of the message array.
const VERSION: i64 = 1;

/// Short type code used in field wrappers and collection headers.
fn type_tag(field_type: TType) -> Result<&'static str> {
    match field_type {
        TType::Bool => Ok("tf"),
        TType::Byte => Ok("i8"),
        TType::I16 => Ok("i16"),
        TType::I32 => Ok("i32"),
        TType::I64 => Ok("i64"),
        TType::Double => Ok("dbl"),
        TType::Struct => Ok("rec"),
        TType::String => Ok("str"),
        TType::Map => Ok("map"),
        TType::List => Ok("lst"),
        TType::Set => Ok("set"),
        TType::Stop => Err(ThriftError::InvalidData(
            "stop has no type tag".to_string(),
        )),
    }
}

fn tag_type(tag: &str) -> Result<TType> {
    match tag {
        "tf" => Ok(TType::Bool),
        "i8" => Ok(TType::Byte),
        "i16" => Ok(TType::I16),
        "i32" => Ok(TType::I32),
        "i64" => Ok(TType::I64),
        "dbl" => Ok(TType::Double),
        "rec" => Ok(TType::Struct),
        "str" => Ok(TType::String),
        "map" => Ok(TType::Map),
        "lst" => Ok(TType::List),
        "set" => Ok(TType::Set),
        other => Err(ThriftError::InvalidData(format!(
            "unknown type tag: {:?}",
            other
        ))),
    }
}

/// Partially-built output fragment.
enum WriteFrame {
    Message {
        name: String,
        message_type: MessageType,
        sequence_id: i32,
        payload: Option<Value>,
    },
    Struct(Map<String, Value>),
    /// Field header awaiting its single value.
    Field { tag: &'static str, id: i16 },
    Collection {
        tag: &'static str,
        size: usize,
        items: Vec<Value>,
    },
    Map {
        key_tag: &'static str,
        value_tag: &'static str,
        size: usize,
        entries: Vec<Value>,
    },
}

/// Remaining portion of the parsed input tree.
enum ReadFrame {
    /// A single value awaiting consumption.
    Value(Value),
    /// Struct fields not yet visited.
    Struct(Map<String, Value>),
    /// List/set elements in order.
    List(std::vec::IntoIter<Value>),
    /// Map entries; the value half of the current entry is parked until the
    /// key has been read.
    Map {
        entries: std::vec::IntoIter<(String, Value)>,
        pending_value: Option<Value>,
    },
}

/// JSON protocol over a transport.
pub struct JsonProtocol<T: Transport> {
    transport: T,
    wstack: Vec<WriteFrame>,
    /// Completed value written outside any message envelope, serialized at
    /// flush.
    root: Option<Value>,
    rstack: Vec<ReadFrame>,
}

impl<T: Transport> JsonProtocol<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            wstack: Vec::new(),
            root: None,
            rstack: Vec::new(),
        }
    }

    /// Access the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the protocol, returning the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Attach a completed value to the innermost open container.
    fn push_value(&mut self, value: Value) -> Result<()> {
        match self.wstack.last_mut() {
            Some(WriteFrame::Field { .. }) => {
                let (tag, id) = match self.wstack.pop() {
                    Some(WriteFrame::Field { tag, id }) => (tag, id),
                    _ => unreachable!(),
                };
                match self.wstack.last_mut() {
                    Some(WriteFrame::Struct(fields)) => {
                        fields.insert(id.to_string(), json!({ tag: value }));
                        Ok(())
                    }
                    _ => Err(ThriftError::InvalidData(
                        "field written outside a struct".to_string(),
                    )),
                }
            }
            Some(WriteFrame::Collection { items, .. }) => {
                items.push(value);
                Ok(())
            }
            Some(WriteFrame::Map { entries, .. }) => {
                entries.push(value);
                Ok(())
            }
            Some(WriteFrame::Message { payload, .. }) => {
                *payload = Some(value);
                Ok(())
            }
            Some(WriteFrame::Struct(_)) => Err(ThriftError::InvalidData(
                "value written outside a field".to_string(),
            )),
            None => {
                self.root = Some(value);
                Ok(())
            }
        }
    }

    /// Coerce a map key to its JSON string form.
    fn map_key(value: Value) -> Result<String> {
        match value {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(ThriftError::InvalidData(format!(
                "unsupported map key: {}",
                other
            ))),
        }
    }

    fn finite_number(value: f64) -> Result<Value> {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .ok_or_else(|| {
                ThriftError::InvalidData(format!("non-finite double not representable: {}", value))
            })
    }

    /// Take the next unconsumed value from the parse tree.
    ///
    /// With no tree in progress, parses the transport's remaining input; this
    /// lets bare values (no message envelope) round-trip.
    fn next_value(&mut self) -> Result<Value> {
        match self.rstack.last_mut() {
            None => {
                let len = self.transport.remaining();
                if len == 0 {
                    return Err(ThriftError::InvalidData(
                        "no value available to read".to_string(),
                    ));
                }
                let bytes = self.transport.read_bytes(len)?;
                Ok(serde_json::from_slice(&bytes)?)
            }
            Some(ReadFrame::Value(_)) => match self.rstack.pop() {
                Some(ReadFrame::Value(v)) => Ok(v),
                _ => unreachable!(),
            },
            Some(ReadFrame::List(iter)) => iter.next().ok_or_else(|| {
                ThriftError::InvalidData("read past the end of a list".to_string())
            }),
            Some(ReadFrame::Map {
                entries,
                pending_value,
            }) => {
                if let Some(v) = pending_value.take() {
                    return Ok(v);
                }
                let (key, value) = entries.next().ok_or_else(|| {
                    ThriftError::InvalidData("read past the end of a map".to_string())
                })?;
                *pending_value = Some(value);
                Ok(Value::String(key))
            }
            Some(ReadFrame::Struct(_)) => Err(ThriftError::InvalidData(
                "value read outside a field".to_string(),
            )),
        }
    }

    /// Read a value that may arrive as a typed-key string.
    fn next_i64(&mut self) -> Result<i64> {
        match self.next_value()? {
            Value::Number(n) => n.as_i64().ok_or_else(|| {
                ThriftError::InvalidData(format!("not an integer: {}", n))
            }),
            Value::String(s) => s.parse::<i64>().map_err(|_| {
                ThriftError::InvalidData(format!("not an integer: {:?}", s))
            }),
            other => Err(ThriftError::InvalidData(format!(
                "expected integer, got {}",
                other
            ))),
        }
    }
}

impl<T: Transport> ProtocolWrite for JsonProtocol<T> {
    fn write_message_begin(&mut self, header: &MessageHeader) -> Result<()> {
        self.wstack.push(WriteFrame::Message {
            name: header.name.clone(),
            message_type: header.message_type,
            sequence_id: header.sequence_id,
            payload: None,
        });
        Ok(())
    }

    fn write_message_end(&mut self) -> Result<()> {
        match self.wstack.pop() {
            Some(WriteFrame::Message {
                name,
                message_type,
                sequence_id,
                payload,
            }) => {
                let mut envelope = vec![
                    Value::from(VERSION),
                    Value::from(name),
                    Value::from(message_type as u8),
                    Value::from(sequence_id),
                ];
                if let Some(payload) = payload {
                    envelope.push(payload);
                }
                let text = serde_json::to_string(&Value::Array(envelope))?;
                self.transport.write(text.as_bytes());
                Ok(())
            }
            _ => Err(ThriftError::InvalidData(
                "message end without message begin".to_string(),
            )),
        }
    }

    fn write_struct_begin(&mut self, _name: &str) -> Result<()> {
        self.wstack.push(WriteFrame::Struct(Map::new()));
        Ok(())
    }

    fn write_struct_end(&mut self) -> Result<()> {
        match self.wstack.pop() {
            Some(WriteFrame::Struct(fields)) => self.push_value(Value::Object(fields)),
            _ => Err(ThriftError::InvalidData(
                "struct end without struct begin".to_string(),
            )),
        }
    }

    fn write_field_begin(&mut self, field_type: TType, id: i16) -> Result<()> {
        self.wstack.push(WriteFrame::Field {
            tag: type_tag(field_type)?,
            id,
        });
        Ok(())
    }

    fn write_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_map_begin(&mut self, key_type: TType, value_type: TType, size: usize) -> Result<()> {
        self.wstack.push(WriteFrame::Map {
            key_tag: type_tag(key_type)?,
            value_tag: type_tag(value_type)?,
            size,
            entries: Vec::with_capacity(size * 2),
        });
        Ok(())
    }

    fn write_map_end(&mut self) -> Result<()> {
        match self.wstack.pop() {
            Some(WriteFrame::Map {
                key_tag,
                value_tag,
                size,
                entries,
            }) => {
                let mut object = Map::new();
                let mut iter = entries.into_iter();
                while let Some(key) = iter.next() {
                    let value = iter.next().ok_or_else(|| {
                        ThriftError::InvalidData("map entry missing its value".to_string())
                    })?;
                    object.insert(Self::map_key(key)?, value);
                }
                self.push_value(Value::Array(vec![
                    Value::from(key_tag),
                    Value::from(value_tag),
                    Value::from(size),
                    Value::Object(object),
                ]))
            }
            _ => Err(ThriftError::InvalidData(
                "map end without map begin".to_string(),
            )),
        }
    }

    fn write_list_begin(&mut self, element_type: TType, size: usize) -> Result<()> {
        self.wstack.push(WriteFrame::Collection {
            tag: type_tag(element_type)?,
            size,
            items: Vec::with_capacity(size),
        });
        Ok(())
    }

    fn write_list_end(&mut self) -> Result<()> {
        match self.wstack.pop() {
            Some(WriteFrame::Collection { tag, size, items }) => {
                let mut array = Vec::with_capacity(items.len() + 2);
                array.push(Value::from(tag));
                array.push(Value::from(size));
                array.extend(items);
                self.push_value(Value::Array(array))
            }
            _ => Err(ThriftError::InvalidData(
                "list end without list begin".to_string(),
            )),
        }
    }

    fn write_set_begin(&mut self, element_type: TType, size: usize) -> Result<()> {
        self.write_list_begin(element_type, size)
    }

    fn write_set_end(&mut self) -> Result<()> {
        self.write_list_end()
    }

    fn write_bool(&mut self, value: bool) -> Result<()> {
        self.push_value(Value::from(if value { 1 } else { 0 }))
    }

    fn write_byte(&mut self, value: i8) -> Result<()> {
        self.push_value(Value::from(value))
    }

    fn write_i16(&mut self, value: i16) -> Result<()> {
        self.push_value(Value::from(value))
    }

    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.push_value(Value::from(value))
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        self.push_value(Value::from(value))
    }

    fn write_double(&mut self, value: f64) -> Result<()> {
        let number = Self::finite_number(value)?;
        self.push_value(number)
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        self.push_value(Value::from(value))
    }

    fn write_binary(&mut self, value: &[u8]) -> Result<()> {
        // Binary shares the string representation; non-UTF-8 payloads are not
        // expressible under this encoding.
        let text = std::str::from_utf8(value).map_err(|e| {
            ThriftError::InvalidData(format!("binary is not valid UTF-8: {}", e))
        })?;
        self.write_string(text)
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(root) = self.root.take() {
            let text = serde_json::to_string(&root)?;
            self.transport.write(text.as_bytes());
        }
        self.transport.flush()
    }
}

impl<T: Transport> ProtocolRead for JsonProtocol<T> {
    fn read_message_begin(&mut self) -> Result<MessageHeader> {
        let parsed = self.next_value()?;
        let mut envelope = match parsed {
            Value::Array(items) if items.len() >= 4 => items.into_iter(),
            other => {
                return Err(ThriftError::InvalidData(format!(
                    "malformed message envelope: {}",
                    other
                )))
            }
        };

        // Element order: version, name, type, seqid, optional payload.
        let version = envelope
            .next()
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ThriftError::InvalidData("missing envelope version".to_string()))?;
        if version != VERSION {
            return Err(ThriftError::BadVersion(format!(
                "bad envelope version: {}",
                version
            )));
        }
        let name = match envelope.next() {
            Some(Value::String(s)) => s,
            other => {
                return Err(ThriftError::InvalidData(format!(
                    "message name is not a string: {:?}",
                    other
                )))
            }
        };
        let raw_type = envelope
            .next()
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ThriftError::InvalidData("missing message type".to_string()))?;
        let message_type = MessageType::try_from(u8::try_from(raw_type).map_err(|_| {
            ThriftError::InvalidData(format!("message type out of range: {}", raw_type))
        })?)?;
        let raw_sequence_id = envelope
            .next()
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ThriftError::InvalidData("missing sequence id".to_string()))?;
        let sequence_id = i32::try_from(raw_sequence_id).map_err(|_| {
            ThriftError::InvalidData(format!("sequence id out of range: {}", raw_sequence_id))
        })?;

        if let Some(payload) = envelope.next() {
            self.rstack.push(ReadFrame::Value(payload));
        }
        Ok(MessageHeader::new(name, message_type, sequence_id))
    }

    fn read_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_struct_begin(&mut self) -> Result<()> {
        match self.next_value()? {
            Value::Object(fields) => {
                self.rstack.push(ReadFrame::Struct(fields));
                Ok(())
            }
            other => Err(ThriftError::InvalidData(format!(
                "struct is not an object: {}",
                other
            ))),
        }
    }

    fn read_struct_end(&mut self) -> Result<()> {
        match self.rstack.pop() {
            Some(ReadFrame::Struct(_)) => Ok(()),
            _ => Err(ThriftError::InvalidData(
                "struct end without struct begin".to_string(),
            )),
        }
    }

    fn read_field_begin(&mut self) -> Result<FieldHeader> {
        let (key, wrapper) = match self.rstack.last_mut() {
            Some(ReadFrame::Struct(fields)) => {
                let key = match fields.keys().next().cloned() {
                    Some(key) => key,
                    None => return Ok(FieldHeader::stop()),
                };
                let wrapper = fields
                    .remove(&key)
                    .ok_or_else(|| ThriftError::InvalidData("field vanished".to_string()))?;
                (key, wrapper)
            }
            _ => {
                return Err(ThriftError::InvalidData(
                    "field read outside a struct".to_string(),
                ))
            }
        };

        let id = key.parse::<i16>().map_err(|_| {
            ThriftError::InvalidData(format!("field id is not a number: {:?}", key))
        })?;
        let (tag, value) = match wrapper {
            Value::Object(wrap) if wrap.len() == 1 => match wrap.into_iter().next() {
                Some(entry) => entry,
                None => unreachable!(),
            },
            other => {
                return Err(ThriftError::InvalidData(format!(
                    "field {} is not a typed wrapper: {}",
                    id, other
                )))
            }
        };
        self.rstack.push(ReadFrame::Value(value));
        Ok(FieldHeader::new(tag_type(&tag)?, id))
    }

    fn read_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_map_begin(&mut self) -> Result<MapHeader> {
        let items = match self.next_value()? {
            Value::Array(items) if items.len() == 4 => items,
            other => {
                return Err(ThriftError::InvalidData(format!(
                    "malformed map header: {}",
                    other
                )))
            }
        };
        let mut iter = items.into_iter();
        let key_tag = match iter.next() {
            Some(Value::String(s)) => s,
            other => {
                return Err(ThriftError::InvalidData(format!(
                    "map key tag is not a string: {:?}",
                    other
                )))
            }
        };
        let value_tag = match iter.next() {
            Some(Value::String(s)) => s,
            other => {
                return Err(ThriftError::InvalidData(format!(
                    "map value tag is not a string: {:?}",
                    other
                )))
            }
        };
        let size = iter
            .next()
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ThriftError::InvalidData("map size is not a number".to_string()))?
            as usize;
        let entries = match iter.next() {
            Some(Value::Object(object)) => object,
            other => {
                return Err(ThriftError::InvalidData(format!(
                    "map body is not an object: {:?}",
                    other
                )))
            }
        };

        self.rstack.push(ReadFrame::Map {
            entries: entries.into_iter().collect::<Vec<_>>().into_iter(),
            pending_value: None,
        });
        Ok(MapHeader {
            key_type: tag_type(&key_tag)?,
            value_type: tag_type(&value_tag)?,
            size,
        })
    }

    fn read_map_end(&mut self) -> Result<()> {
        match self.rstack.pop() {
            Some(ReadFrame::Map { .. }) => Ok(()),
            _ => Err(ThriftError::InvalidData(
                "map end without map begin".to_string(),
            )),
        }
    }

    fn read_list_begin(&mut self) -> Result<ListHeader> {
        let items = match self.next_value()? {
            Value::Array(items) if items.len() >= 2 => items,
            other => {
                return Err(ThriftError::InvalidData(format!(
                    "malformed list header: {}",
                    other
                )))
            }
        };
        let mut iter = items.into_iter();
        let tag = match iter.next() {
            Some(Value::String(s)) => s,
            other => {
                return Err(ThriftError::InvalidData(format!(
                    "list element tag is not a string: {:?}",
                    other
                )))
            }
        };
        let size = iter
            .next()
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ThriftError::InvalidData("list size is not a number".to_string()))?
            as usize;

        self.rstack
            .push(ReadFrame::List(iter.collect::<Vec<_>>().into_iter()));
        Ok(ListHeader {
            element_type: tag_type(&tag)?,
            size,
        })
    }

    fn read_list_end(&mut self) -> Result<()> {
        match self.rstack.pop() {
            Some(ReadFrame::List(_)) => Ok(()),
            _ => Err(ThriftError::InvalidData(
                "list end without list begin".to_string(),
            )),
        }
    }

    fn read_set_begin(&mut self) -> Result<ListHeader> {
        self.read_list_begin()
    }

    fn read_set_end(&mut self) -> Result<()> {
        self.read_list_end()
    }

    fn read_bool(&mut self) -> Result<bool> {
        match self.next_value()? {
            Value::Bool(b) => Ok(b),
            Value::Number(n) => Ok(n.as_i64() != Some(0)),
            Value::String(s) => Ok(s != "0"),
            other => Err(ThriftError::InvalidData(format!(
                "expected boolean, got {}",
                other
            ))),
        }
    }

    fn read_byte(&mut self) -> Result<i8> {
        Ok(self.next_i64()? as i8)
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(self.next_i64()? as i16)
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.next_i64()? as i32)
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.next_i64()
    }

    fn read_double(&mut self) -> Result<f64> {
        match self.next_value()? {
            Value::Number(n) => n.as_f64().ok_or_else(|| {
                ThriftError::InvalidData(format!("not a double: {}", n))
            }),
            Value::String(s) => s.parse::<f64>().map_err(|_| {
                ThriftError::InvalidData(format!("not a double: {:?}", s))
            }),
            other => Err(ThriftError::InvalidData(format!(
                "expected double, got {}",
                other
            ))),
        }
    }

    fn read_string(&mut self) -> Result<String> {
        match self.next_value()? {
            Value::String(s) => Ok(s),
            other => Err(ThriftError::InvalidData(format!(
                "expected string, got {}",
                other
            ))),
        }
    }

    fn read_binary(&mut self) -> Result<Bytes> {
        Ok(Bytes::from(self.read_string()?.into_bytes()))
    }

    fn skip(&mut self, field_type: TType) -> Result<()> {
        Err(ThriftError::NotImplemented(format!(
            "skip({:?}) is not supported by the JSON protocol",
            field_type
        )))
    }
}
