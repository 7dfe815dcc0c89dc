//! Client-side connection state: sequence assignment and reply correlation.
//!
//! A [`Connection`] owns the bookkeeping for one shared bidirectional channel.
//! Callers encode their message themselves (any protocol over a
//! [`MemoryTransport`](crate::transport::MemoryTransport)) and hand the
//! assembled bytes to [`call_with_timeout`](Connection::call_with_timeout);
//! the network glue drains the outbound receiver into its socket and feeds
//! assembled inbound buffers to [`handle_inbound`](Connection::handle_inbound).
//!
//! Correlation is purely by sequence id, never FIFO: replies may arrive in
//! any order, and each completes exactly the oneshot registered for its id.
//! The reply header is decoded here only far enough to route; the untouched
//! buffer is handed to the waiting caller for full decoding.
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//! use thriftwire::{
//!     BinaryProtocol, Connection, MemoryTransport, MessageHeader, MessageType,
//!     ProtocolKind, ProtocolWrite,
//! };
//!
//! # async fn demo() -> thriftwire::Result<()> {
//! let (connection, mut outbound) = Connection::new(ProtocolKind::Binary);
//! // Network glue: forward `outbound` to the socket, feed received buffers
//! // to `connection.handle_inbound`.
//!
//! let sequence_id = connection.next_sequence_id();
//! let (transport, messages) = MemoryTransport::channel();
//! let mut protocol = BinaryProtocol::new(transport);
//! protocol.write_message_begin(&MessageHeader::new("ping", MessageType::Call, sequence_id))?;
//! protocol.write_struct_begin("ping_args")?;
//! protocol.write_field_stop()?;
//! protocol.write_struct_end()?;
//! protocol.write_message_end()?;
//! protocol.flush()?;
//!
//! let message = messages.recv().map_err(|_| thriftwire::ThriftError::ConnectionClosed)?;
//! let reply = connection
//!     .call_with_timeout(sequence_id, None, message, Duration::from_secs(5))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Result, ThriftError};
use crate::multiplex::SequenceRouter;
use crate::protocol::ProtocolKind;
use crate::types::MessageHeader;

/// A routed inbound reply, handed to the caller that owns the sequence id.
#[derive(Debug)]
pub struct ReplyEnvelope {
    /// Decoded message header (REPLY or EXCEPTION).
    pub header: MessageHeader,
    /// The complete message buffer, unconsumed; the caller decodes the body
    /// with its own protocol instance.
    pub body: Bytes,
    /// Service recorded for this sequence id at send time, for multiplexed
    /// clients.
    pub service: Option<String>,
}

/// Per-channel client state: sequence counter, pending-call map and
/// service routing table.
pub struct Connection {
    protocol: ProtocolKind,
    next_sequence_id: AtomicI32,
    pending: Mutex<HashMap<i32, oneshot::Sender<ReplyEnvelope>>>,
    router: SequenceRouter,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl Connection {
    /// Create a connection speaking the given wire encoding.
    ///
    /// Returns the connection and the outbound message stream; the caller is
    /// responsible for draining the stream into its transport.
    pub fn new(protocol: ProtocolKind) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                protocol,
                next_sequence_id: AtomicI32::new(0),
                pending: Mutex::new(HashMap::new()),
                router: SequenceRouter::new(),
                outbound,
            },
            rx,
        )
    }

    /// Wire encoding this connection speaks.
    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    /// Allocate the next sequence id. Safe to call from concurrent senders;
    /// ids start at 1 and are unique per connection.
    pub fn next_sequence_id(&self) -> i32 {
        self.next_sequence_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of calls awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.lock_pending().len()
    }

    /// Send an assembled message without expecting a reply.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` when the outbound stream has been dropped.
    pub fn send_oneway(&self, message: Bytes) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| ThriftError::ConnectionClosed)
    }

    /// Send an assembled CALL and wait for its reply, at most `timeout`.
    ///
    /// `sequence_id` must be the id encoded in `message` (normally from
    /// [`next_sequence_id`](Self::next_sequence_id)); `service` is recorded
    /// in the routing table for multiplexed traffic.
    ///
    /// # Errors
    ///
    /// `Timeout` when the reply misses the deadline; the call's bookkeeping
    /// is evicted and a reply arriving later is dropped. `ConnectionClosed`
    /// when the channel fails while the call is pending.
    pub async fn call_with_timeout(
        &self,
        sequence_id: i32,
        service: Option<&str>,
        message: Bytes,
        timeout: Duration,
    ) -> Result<ReplyEnvelope> {
        let rx = self.register(sequence_id, service);

        if let Err(e) = self.send_oneway(message) {
            self.evict(sequence_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(envelope)) => Ok(envelope),
            // Sender dropped: fail_all ran or the connection was torn down.
            Ok(Err(_)) => Err(ThriftError::ConnectionClosed),
            Err(_) => {
                self.evict(sequence_id);
                Err(ThriftError::Timeout(format!(
                    "no reply for sequence id {} within {:?}",
                    sequence_id, timeout
                )))
            }
        }
    }

    /// Register a pending call without sending anything.
    ///
    /// Building block for callers that manage their own deadlines; the
    /// returned receiver completes when a reply with `sequence_id` arrives.
    pub fn register(
        &self,
        sequence_id: i32,
        service: Option<&str>,
    ) -> oneshot::Receiver<ReplyEnvelope> {
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(sequence_id, tx);
        if let Some(service) = service {
            self.router.insert(sequence_id, service);
        }
        rx
    }

    /// Forget a pending call, e.g. after a timeout. A reply arriving after
    /// eviction is dropped by [`handle_inbound`](Self::handle_inbound).
    pub fn evict(&self, sequence_id: i32) {
        self.lock_pending().remove(&sequence_id);
        self.router.evict(sequence_id);
    }

    /// Route one assembled inbound message to the caller awaiting it.
    ///
    /// Decodes only the message header; the full buffer travels to the waiter
    /// inside the [`ReplyEnvelope`]. A reply with no matching pending call
    /// (late after eviction, or unsolicited) is dropped with a diagnostic.
    ///
    /// # Errors
    ///
    /// Header decode failures propagate; they are fatal to this message only.
    pub fn handle_inbound(&self, buffer: Bytes) -> Result<()> {
        let header = self.protocol.read_message_header(buffer.clone())?;
        let sequence_id = header.sequence_id;
        let service = self.router.take(sequence_id);

        let waiter = self.lock_pending().remove(&sequence_id);
        match waiter {
            Some(tx) => {
                let envelope = ReplyEnvelope {
                    header,
                    body: buffer,
                    service,
                };
                if tx.send(envelope).is_err() {
                    debug!(sequence_id, "reply waiter gone, dropping reply");
                }
            }
            None => {
                debug!(
                    sequence_id,
                    name = %header.name,
                    "no pending call for reply, dropping"
                );
            }
        }
        Ok(())
    }

    /// Fail every pending call with `ConnectionClosed` and clear the routing
    /// table. Called by the network glue when the underlying channel dies.
    pub fn fail_all(&self) {
        let dropped = {
            let mut pending = self.lock_pending();
            let count = pending.len();
            pending.clear();
            count
        };
        self.router.clear();
        if dropped > 0 {
            warn!(dropped, "connection closed with calls pending");
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<i32, oneshot::Sender<ReplyEnvelope>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BinaryProtocol, ProtocolWrite};
    use crate::transport::MemoryTransport;
    use crate::types::MessageType;

    fn reply_message(name: &str, sequence_id: i32) -> Bytes {
        let (transport, rx) = MemoryTransport::channel();
        let mut out = BinaryProtocol::new(transport);
        out.write_message_begin(&MessageHeader::new(name, MessageType::Reply, sequence_id))
            .unwrap();
        out.write_message_end().unwrap();
        out.flush().unwrap();
        rx.try_recv().unwrap()
    }

    #[test]
    fn test_sequence_ids_start_at_one_and_increment() {
        let (connection, _rx) = Connection::new(ProtocolKind::Binary);
        assert_eq!(connection.next_sequence_id(), 1);
        assert_eq!(connection.next_sequence_id(), 2);
        assert_eq!(connection.next_sequence_id(), 3);
    }

    #[tokio::test]
    async fn test_out_of_order_replies_route_by_sequence_id() {
        let (connection, _outbound) = Connection::new(ProtocolKind::Binary);

        let rx1 = connection.register(1, None);
        let rx2 = connection.register(2, None);

        // Second call's reply lands first.
        connection.handle_inbound(reply_message("b", 2)).unwrap();
        connection.handle_inbound(reply_message("a", 1)).unwrap();

        let envelope2 = rx2.await.unwrap();
        let envelope1 = rx1.await.unwrap();
        assert_eq!(envelope2.header.name, "b");
        assert_eq!(envelope1.header.name, "a");
    }

    #[tokio::test]
    async fn test_call_with_timeout_completes() {
        let (connection, mut outbound) = Connection::new(ProtocolKind::Binary);
        let message = reply_message("noop", 1);

        let call = connection.call_with_timeout(1, Some("Svc"), message, Duration::from_secs(5));
        let inbound = async {
            let sent = outbound.recv().await.unwrap();
            // Loop the message straight back as its own reply.
            connection.handle_inbound(sent).unwrap();
        };
        let (result, ()) = tokio::join!(call, inbound);

        let envelope = result.unwrap();
        assert_eq!(envelope.header.sequence_id, 1);
        assert_eq!(envelope.service.as_deref(), Some("Svc"));
        assert_eq!(connection.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_timeout_evicts_and_late_reply_is_dropped() {
        let (connection, mut outbound) = Connection::new(ProtocolKind::Binary);
        let message = reply_message("slow", 1);

        let err = connection
            .call_with_timeout(1, Some("Svc"), message, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ThriftError::Timeout(_)));
        assert_eq!(connection.pending_calls(), 0);

        // The message did go out.
        let sent = outbound.recv().await.unwrap();
        // The late reply arrives after eviction: dropped, no error, and other
        // pending calls are untouched.
        let survivor = connection.register(2, None);
        connection.handle_inbound(sent).unwrap();
        connection.handle_inbound(reply_message("other", 2)).unwrap();
        assert_eq!(survivor.await.unwrap().header.name, "other");
    }

    #[tokio::test]
    async fn test_fail_all_closes_pending_calls() {
        let (connection, _outbound) = Connection::new(ProtocolKind::Binary);
        let rx = connection.register(1, Some("Svc"));
        connection.fail_all();
        assert!(rx.await.is_err());
        assert_eq!(connection.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_send_after_outbound_dropped_is_connection_closed() {
        let (connection, outbound) = Connection::new(ProtocolKind::Binary);
        drop(outbound);
        let err = connection.send_oneway(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, ThriftError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_corrupt_inbound_header_is_message_local() {
        let (connection, _outbound) = Connection::new(ProtocolKind::Binary);
        let rx = connection.register(1, None);

        assert!(connection
            .handle_inbound(Bytes::from_static(&[0xde, 0xad]))
            .is_err());
        // A good message still routes afterwards.
        connection.handle_inbound(reply_message("ok", 1)).unwrap();
        assert_eq!(rx.await.unwrap().header.name, "ok");
    }
}
