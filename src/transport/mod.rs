//! Transport abstraction - buffered write-then-flush byte buffers.
//!
//! A [`Transport`] performs no framing of its own: it accumulates outbound
//! bytes until `flush()` hands the complete message to the underlying channel,
//! and it holds exactly one fully-assembled inbound buffer for a protocol
//! decoder to consume. Partial-read assembly (length-prefixed framing, HTTP
//! bodies, WebSocket frames) belongs to the network glue outside this crate;
//! the glue invokes a [`receiver`] callback once per complete inbound message.

mod memory;

pub use memory::{receiver, FlushSink, MemoryTransport};

use bytes::Bytes;

use crate::error::Result;

/// Byte-buffer contract between a protocol and the network layer.
///
/// `write` never sends immediately; a complete outbound message is handed
/// downstream only by `flush`, after which the output buffer is reset so a new
/// message can be composed.
pub trait Transport {
    /// Append bytes to the internal output buffer.
    fn write(&mut self, bytes: &[u8]);

    /// Hand the accumulated output buffer to the underlying channel and reset
    /// it. Flushing an empty buffer is legal and is a no-op downstream.
    ///
    /// # Errors
    ///
    /// Fails with [`ThriftError::Transport`](crate::ThriftError::Transport)
    /// when no destination channel is attached (e.g. a closed connection);
    /// the loss is surfaced to the caller, never silently dropped.
    fn flush(&mut self) -> Result<()>;

    /// Consume exactly `len` bytes from the assembled input buffer.
    ///
    /// # Errors
    ///
    /// Fails with [`ThriftError::InvalidData`](crate::ThriftError::InvalidData)
    /// if fewer than `len` bytes remain; truncation is a corruption signal for
    /// the current message only.
    fn read_bytes(&mut self, len: usize) -> Result<Bytes>;

    /// Bytes left unconsumed in the input buffer.
    fn remaining(&self) -> usize;
}
