//! # thriftwire
//!
//! Thrift wire encoding layer: three interchangeable RPC message encodings
//! over a pluggable transport abstraction, plus service multiplexing and
//! client-side reply correlation.
//!
//! ## Layers
//!
//! - **Transport** ([`transport`]): buffered write-then-flush byte buffers.
//!   One assembled buffer per inbound message; outbound bytes accumulate
//!   until `flush()` hands a complete message downstream. No framing here.
//! - **Protocol** ([`protocol`]): [`BinaryProtocol`] (fixed-width
//!   big-endian), [`CompactProtocol`] (varint/zigzag with delta field ids)
//!   and [`JsonProtocol`] (type-tagged text trees) all implement the same
//!   [`ProtocolWrite`]/[`ProtocolRead`] contract, so serializer code is
//!   encoding-agnostic.
//! - **Multiplex** ([`multiplex`]): many services on one connection via
//!   `"service:method"` composite names, with server-side dispatch and a
//!   client-side sequence-id routing table.
//! - **Connection** ([`connection`]): sequence assignment, pending-call map
//!   and timeout eviction for a shared client channel.
//!
//! ## Example
//!
//! ```
//! use thriftwire::{
//!     BinaryProtocol, MemoryTransport, MessageHeader, MessageType, ProtocolRead,
//!     ProtocolWrite,
//! };
//!
//! # fn main() -> thriftwire::Result<()> {
//! let (transport, messages) = MemoryTransport::channel();
//! let mut out = BinaryProtocol::new(transport);
//!
//! out.write_message_begin(&MessageHeader::new("ping", MessageType::Call, 1))?;
//! out.write_struct_begin("args")?;
//! out.write_field_stop()?;
//! out.write_struct_end()?;
//! out.write_message_end()?;
//! out.flush()?;
//!
//! let buffer = messages.recv().map_err(|_| thriftwire::ThriftError::ConnectionClosed)?;
//! let mut input = BinaryProtocol::new(MemoryTransport::with_input(buffer));
//! let header = input.read_message_begin()?;
//! assert_eq!(header.name, "ping");
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod multiplex;
pub mod protocol;
pub mod transport;
pub mod types;

pub use connection::{Connection, ReplyEnvelope};
pub use error::{Result, ThriftError};
pub use multiplex::{
    multiplexed_name, split_service_name, MultiplexedProcessor, MultiplexedProtocol, Processor,
    SequenceRouter, StoredMessageProtocol, SERVICE_SEPARATOR,
};
pub use protocol::{
    ApplicationError, ApplicationErrorKind, BinaryProtocol, CompactProtocol, JsonProtocol,
    ProtocolKind, ProtocolRead, ProtocolWrite,
};
pub use transport::{receiver, FlushSink, MemoryTransport, Transport};
pub use types::{FieldHeader, ListHeader, MapHeader, MessageHeader, MessageType, TType};
