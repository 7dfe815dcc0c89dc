//! In-memory transport over one assembled inbound buffer.
//!
//! This is the concrete transport every protocol in this crate runs on. The
//! network glue assembles one complete message, wraps it in a
//! [`MemoryTransport`] (usually through [`receiver`]) and lets a protocol
//! decode it; outbound messages accumulate in a `BytesMut` until `flush()`
//! hands them to the registered [`FlushSink`].

use bytes::{Bytes, BytesMut};

use super::Transport;
use crate::error::{Result, ThriftError};

/// Destination for flushed output buffers.
pub type FlushSink = Box<dyn FnMut(Bytes) + Send>;

/// Transport backed by in-memory buffers.
///
/// Owns the byte buffer for one in-flight message in each direction. Not
/// shareable across simultaneously-decoding messages; construct a new
/// instance per inbound message for server-side processing.
pub struct MemoryTransport {
    /// Assembled inbound message, consumed front-to-back by `read_bytes`.
    input: Bytes,
    /// Outbound message under composition.
    output: BytesMut,
    /// Where `flush` delivers complete outbound messages.
    sink: Option<FlushSink>,
}

impl MemoryTransport {
    /// Create a transport with no input and no flush destination.
    pub fn new() -> Self {
        Self {
            input: Bytes::new(),
            output: BytesMut::new(),
            sink: None,
        }
    }

    /// Create a transport holding one assembled inbound buffer.
    pub fn with_input(input: Bytes) -> Self {
        Self {
            input,
            output: BytesMut::new(),
            sink: None,
        }
    }

    /// Register the destination channel for flushed output.
    pub fn set_sink(&mut self, sink: FlushSink) {
        self.sink = Some(sink);
    }

    /// Builder-style variant of [`set_sink`](Self::set_sink).
    pub fn with_sink(mut self, sink: FlushSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Create a transport whose flushed messages are captured on a channel.
    ///
    /// Each `flush()` of a non-empty output buffer delivers one `Bytes`
    /// message to the receiver.
    pub fn channel() -> (Self, std::sync::mpsc::Receiver<Bytes>) {
        let (tx, rx) = std::sync::mpsc::channel();
        let transport = Self::new().with_sink(Box::new(move |buf| {
            // Receiver may be gone in teardown; nothing useful to do then.
            let _ = tx.send(buf);
        }));
        (transport, rx)
    }

    /// Replace the inbound buffer, e.g. to reuse a client-side transport for
    /// the next sequential response.
    pub fn set_input(&mut self, input: Bytes) {
        self.input = input;
    }

    /// Number of bytes composed but not yet flushed.
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn write(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    fn flush(&mut self) -> Result<()> {
        if self.output.is_empty() {
            // Legal no-op: never emit a zero-length network message.
            return Ok(());
        }
        match self.sink.as_mut() {
            Some(sink) => {
                let message = self.output.split().freeze();
                sink(message);
                Ok(())
            }
            None => Err(ThriftError::Transport(
                "flush with no destination channel".to_string(),
            )),
        }
    }

    fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        if self.input.len() < len {
            return Err(ThriftError::InvalidData(format!(
                "unexpected end of input: need {} bytes, have {}",
                len,
                self.input.len()
            )));
        }
        Ok(self.input.split_to(len))
    }

    fn remaining(&self) -> usize {
        self.input.len()
    }
}

/// Adapt a per-message callback into a receiver of assembled input buffers.
///
/// The network glue registers the returned closure with its channel layer and
/// invokes it once per complete inbound message; a fresh transport is
/// constructed for every message so decode state is never shared.
pub fn receiver<F>(mut callback: F) -> impl FnMut(Bytes)
where
    F: FnMut(MemoryTransport),
{
    move |buffer| callback(MemoryTransport::with_input(buffer))
}
