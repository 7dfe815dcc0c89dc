//! Service multiplexing - many services on one connection.
//!
//! Multiplexing happens entirely inside the message name: a client wraps its
//! outgoing protocol in a [`MultiplexedProtocol`] that prefixes every method
//! name with `"service:"`, and the server side dispatches through a
//! [`MultiplexedProcessor`] that splits the composite name back apart and
//! replays the header to the registered per-service processor. No framing or
//! transport change is involved.
//!
//! On the client side a [`SequenceRouter`] remembers which service each
//! outstanding sequence id belongs to, since reply headers echo the method
//! name the *server* used, not necessarily the composite form.

mod processor;
mod protocol;

pub use processor::{MultiplexedProcessor, Processor};
pub use protocol::{MultiplexedProtocol, StoredMessageProtocol};

use std::collections::HashMap;
use std::sync::Mutex;

/// Separator between service and method in a composite message name.
pub const SERVICE_SEPARATOR: char = ':';

/// Compose the multiplexed form `"service:method"`.
pub fn multiplexed_name(service: &str, method: &str) -> String {
    let mut name = String::with_capacity(service.len() + 1 + method.len());
    name.push_str(service);
    name.push(SERVICE_SEPARATOR);
    name.push_str(method);
    name
}

/// Split a composite name at the first separator.
///
/// Returns `None` when no separator is present (non-multiplexed traffic).
/// Only the first occurrence splits, so method names containing the
/// separator survive: `"svc:a:b"` is service `"svc"`, method `"a:b"`.
pub fn split_service_name(name: &str) -> Option<(&str, &str)> {
    name.split_once(SERVICE_SEPARATOR)
}

/// Sequence-id to service routing table for a multiplexed client.
///
/// Entries are consumed on lookup: a sequence id resolves at most once, so a
/// duplicate or stale reply cannot route twice.
#[derive(Default)]
pub struct SequenceRouter {
    entries: Mutex<HashMap<i32, String>>,
}

impl SequenceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the service an outgoing call belongs to.
    pub fn insert(&self, sequence_id: i32, service: impl Into<String>) {
        self.lock().insert(sequence_id, service.into());
    }

    /// Resolve and remove the service for a reply's sequence id.
    pub fn take(&self, sequence_id: i32) -> Option<String> {
        self.lock().remove(&sequence_id)
    }

    /// Drop an entry without resolving it, e.g. on call timeout.
    pub fn evict(&self, sequence_id: i32) {
        self.lock().remove(&sequence_id);
    }

    /// Forget every outstanding entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i32, String>> {
        // A poisoned map is still structurally sound; keep routing.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
