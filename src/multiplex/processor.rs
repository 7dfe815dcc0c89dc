//! Server-side dispatch for multiplexed connections.

use std::collections::HashMap;

use tracing::warn;

use super::{split_service_name, StoredMessageProtocol};
use crate::error::{Result, ThriftError};
use crate::protocol::{ApplicationError, ApplicationErrorKind, ProtocolRead, ProtocolWrite};
use crate::types::{MessageHeader, MessageType};

/// A service implementation that consumes one inbound message and, for CALL
/// messages, produces one outbound reply.
pub trait Processor {
    /// Handle one message: read the header and arguments from `input`, write
    /// the reply (if any) to `output` and flush it.
    fn process(&self, input: &mut dyn ProtocolRead, output: &mut dyn ProtocolWrite) -> Result<()>;
}

impl<F> Processor for F
where
    F: Fn(&mut dyn ProtocolRead, &mut dyn ProtocolWrite) -> Result<()>,
{
    fn process(&self, input: &mut dyn ProtocolRead, output: &mut dyn ProtocolWrite) -> Result<()> {
        self(input, output)
    }
}

/// Registry dispatching composite `"service:method"` messages to per-service
/// processors.
///
/// A dispatch failure (missing separator, unregistered service) is answered
/// with an EXCEPTION reply instead of faulting the connection, so one bad
/// request never takes down the other services sharing the channel. ONEWAY
/// messages get no reply by definition; their dispatch failures are only
/// logged.
#[derive(Default)]
pub struct MultiplexedProcessor {
    services: HashMap<String, Box<dyn Processor + Send + Sync>>,
}

impl MultiplexedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under a service name, replacing any previous
    /// registration for that name.
    pub fn register(
        &mut self,
        service: impl Into<String>,
        processor: Box<dyn Processor + Send + Sync>,
    ) {
        self.services.insert(service.into(), processor);
    }

    /// Names of the registered services.
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Dispatch one inbound message.
    ///
    /// Reads the message header from `input`, resolves the target service and
    /// re-dispatches with the header rewritten to the bare method name.
    ///
    /// # Errors
    ///
    /// Wire-level decode failures and processor errors propagate. Dispatch
    /// failures on a CALL are reported to the peer and return `Ok`; the same
    /// failures on a ONEWAY return the routing error to the local caller
    /// since no reply may be sent.
    pub fn process(
        &self,
        input: &mut dyn ProtocolRead,
        output: &mut dyn ProtocolWrite,
    ) -> Result<()> {
        let header = input.read_message_begin()?;
        if header.message_type != MessageType::Call && header.message_type != MessageType::Oneway {
            return Err(ThriftError::InvalidData(format!(
                "cannot dispatch message type {:?}",
                header.message_type
            )));
        }

        let (service, method) = match split_service_name(&header.name) {
            Some(parts) => parts,
            None => {
                return self.reject(
                    output,
                    &header,
                    ThriftError::UnknownService(format!(
                        "message name {:?} carries no service prefix",
                        header.name
                    )),
                )
            }
        };

        let processor = match self.services.get(service) {
            Some(processor) => processor,
            None => {
                return self.reject(
                    output,
                    &header,
                    ThriftError::UnknownService(format!(
                        "no processor registered for service {:?}",
                        service
                    )),
                )
            }
        };

        let bare = MessageHeader::new(method, header.message_type, header.sequence_id);
        let mut replayed = StoredMessageProtocol::new(input, bare);
        processor.process(&mut replayed, output)
    }

    /// Report a dispatch failure: EXCEPTION reply for CALL, log-only for
    /// ONEWAY.
    fn reject(
        &self,
        output: &mut dyn ProtocolWrite,
        header: &MessageHeader,
        error: ThriftError,
    ) -> Result<()> {
        warn!(
            name = %header.name,
            sequence_id = header.sequence_id,
            %error,
            "multiplexed dispatch failed"
        );
        match header.message_type {
            MessageType::Call => {
                let reply =
                    ApplicationError::new(ApplicationErrorKind::UnknownMethod, error.to_string());
                reply.write_reply(output, &header.name, header.sequence_id)
            }
            _ => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BinaryProtocol;
    use crate::transport::MemoryTransport;
    use crate::types::TType;

    fn call_message(name: &str, sequence_id: i32, arg: i32) -> bytes::Bytes {
        let (transport, rx) = MemoryTransport::channel();
        let mut out = BinaryProtocol::new(transport);
        out.write_message_begin(&MessageHeader::new(name, MessageType::Call, sequence_id))
            .unwrap();
        out.write_struct_begin("args").unwrap();
        out.write_field_begin(TType::I32, 1).unwrap();
        out.write_i32(arg).unwrap();
        out.write_field_end().unwrap();
        out.write_field_stop().unwrap();
        out.write_struct_end().unwrap();
        out.write_message_end().unwrap();
        out.flush().unwrap();
        rx.try_recv().unwrap()
    }

    /// Echo service: replies with the single i32 argument doubled.
    fn doubler(input: &mut dyn ProtocolRead, output: &mut dyn ProtocolWrite) -> Result<()> {
        let header = input.read_message_begin()?;
        input.read_struct_begin()?;
        let field = input.read_field_begin()?;
        assert_eq!(field.field_type, TType::I32);
        let arg = input.read_i32()?;
        input.read_field_end()?;
        assert!(input.read_field_begin()?.is_stop());
        input.read_struct_end()?;
        input.read_message_end()?;

        let reply = MessageHeader::new(header.name, MessageType::Reply, header.sequence_id);
        output.write_message_begin(&reply)?;
        output.write_struct_begin("result")?;
        output.write_field_begin(TType::I32, 0)?;
        output.write_i32(arg * 2)?;
        output.write_field_end()?;
        output.write_field_stop()?;
        output.write_struct_end()?;
        output.write_message_end()?;
        output.flush()
    }

    fn registry() -> MultiplexedProcessor {
        let mut processor = MultiplexedProcessor::new();
        processor.register("Calculator", Box::new(doubler));
        processor
    }

    #[test]
    fn test_dispatch_strips_service_prefix() {
        let processor = registry();
        let message = call_message("Calculator:double", 11, 21);

        let mut input = BinaryProtocol::new(MemoryTransport::with_input(message));
        let (out_transport, rx) = MemoryTransport::channel();
        let mut output = BinaryProtocol::new(out_transport);
        processor.process(&mut input, &mut output).unwrap();

        let mut reply = BinaryProtocol::new(MemoryTransport::with_input(rx.try_recv().unwrap()));
        let header = reply.read_message_begin().unwrap();
        // The processor saw and echoed the bare method name.
        assert_eq!(header.name, "double");
        assert_eq!(header.message_type, MessageType::Reply);
        assert_eq!(header.sequence_id, 11);
        reply.read_struct_begin().unwrap();
        reply.read_field_begin().unwrap();
        assert_eq!(reply.read_i32().unwrap(), 42);
    }

    #[test]
    fn test_unknown_service_gets_exception_reply() {
        let processor = registry();
        let message = call_message("Missing:double", 4, 1);

        let mut input = BinaryProtocol::new(MemoryTransport::with_input(message));
        let (out_transport, rx) = MemoryTransport::channel();
        let mut output = BinaryProtocol::new(out_transport);
        processor.process(&mut input, &mut output).unwrap();

        let mut reply = BinaryProtocol::new(MemoryTransport::with_input(rx.try_recv().unwrap()));
        let header = reply.read_message_begin().unwrap();
        assert_eq!(header.message_type, MessageType::Exception);
        assert_eq!(header.sequence_id, 4);
        let error = ApplicationError::read(&mut reply).unwrap();
        assert_eq!(error.kind, ApplicationErrorKind::UnknownMethod);
        assert!(error.message.contains("Missing"));
    }

    #[test]
    fn test_unprefixed_name_gets_exception_reply() {
        let processor = registry();
        let message = call_message("double", 8, 1);

        let mut input = BinaryProtocol::new(MemoryTransport::with_input(message));
        let (out_transport, rx) = MemoryTransport::channel();
        let mut output = BinaryProtocol::new(out_transport);
        processor.process(&mut input, &mut output).unwrap();

        let mut reply = BinaryProtocol::new(MemoryTransport::with_input(rx.try_recv().unwrap()));
        assert_eq!(
            reply.read_message_begin().unwrap().message_type,
            MessageType::Exception
        );
    }

    #[test]
    fn test_oneway_dispatch_failure_is_local_error() {
        let processor = registry();
        let (transport, rx) = MemoryTransport::channel();
        let mut out = BinaryProtocol::new(transport);
        out.write_message_begin(&MessageHeader::new(
            "Missing:fire",
            MessageType::Oneway,
            2,
        ))
        .unwrap();
        out.write_message_end().unwrap();
        out.flush().unwrap();

        let mut input = BinaryProtocol::new(MemoryTransport::with_input(rx.try_recv().unwrap()));
        let (out_transport, reply_rx) = MemoryTransport::channel();
        let mut output = BinaryProtocol::new(out_transport);

        let err = processor.process(&mut input, &mut output).unwrap_err();
        assert!(matches!(err, ThriftError::UnknownService(_)));
        assert!(reply_rx.try_recv().is_err(), "oneway must never be replied to");
    }

    #[test]
    fn test_reply_message_cannot_be_dispatched() {
        let processor = registry();
        let (transport, rx) = MemoryTransport::channel();
        let mut out = BinaryProtocol::new(transport);
        out.write_message_begin(&MessageHeader::new(
            "Calculator:double",
            MessageType::Reply,
            1,
        ))
        .unwrap();
        out.write_message_end().unwrap();
        out.flush().unwrap();

        let mut input = BinaryProtocol::new(MemoryTransport::with_input(rx.try_recv().unwrap()));
        let (out_transport, _reply_rx) = MemoryTransport::channel();
        let mut output = BinaryProtocol::new(out_transport);
        assert!(processor.process(&mut input, &mut output).is_err());
    }
}
