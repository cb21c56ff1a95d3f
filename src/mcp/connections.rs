use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use actix::prelude::*;
use actix_web_actors::ws::CloseReason;
use serde_json::Value;

/// Outbound buffer ceiling per connection. Writes above this are dropped
/// rather than queued, so a stalled reader cannot grow memory unbounded.
pub const MAX_BUFFERED_BYTES: usize = 5 * 1024 * 1024;

/// One serialized frame bound for a connection actor. Carries its own byte
/// count so the actor can settle the backpressure counter when it writes.
#[derive(Message)]
#[rtype(result = "()")]
pub struct WriteFrame {
    pub payload: String,
}

/// Instructs a connection actor to close with the given reason and stop.
#[derive(Message)]
#[rtype(result = "()")]
pub struct CloseConnection(pub Option<CloseReason>);

pub struct ConnectionEntry {
    pub writer: Recipient<WriteFrame>,
    pub closer: Recipient<CloseConnection>,
    pub session_id: Option<String>,
    pub buffered: Arc<AtomicUsize>,
}

/// Connection arena owned by one WebSocket carrier instance, keyed by
/// connection id. Actors register themselves on start and deregister on
/// stop; all sends funnel through here so the backpressure check applies
/// to every outbound frame.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<HashMap<String, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: String, entry: ConnectionEntry) {
        let mut inner = self.lock();
        inner.insert(connection_id, entry);
    }

    pub fn deregister(&self, connection_id: &str) -> bool {
        let mut inner = self.lock();
        inner.remove(connection_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sends a JSON message to one connection. Returns false when the
    /// connection is unknown or the frame was dropped for backpressure.
    pub fn send_json(&self, connection_id: &str, message: &Value) -> bool {
        let payload = message.to_string();
        let inner = self.lock();
        match inner.get(connection_id) {
            Some(entry) => Self::send_frame(connection_id, entry, payload),
            None => false,
        }
    }

    /// Writes to every open connection.
    pub fn broadcast(&self, message: &Value) -> usize {
        let payload = message.to_string();
        let inner = self.lock();
        let mut delivered = 0;
        for (id, entry) in inner.iter() {
            if Self::send_frame(id, entry, payload.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Writes only to connections bound to the given session. Reports
    /// whether any recipient existed, delivered or not.
    pub fn send_to_session(&self, session_id: &str, message: &Value) -> bool {
        let payload = message.to_string();
        let inner = self.lock();
        let mut found = false;
        for (id, entry) in inner.iter() {
            if entry.session_id.as_deref() == Some(session_id) {
                found = true;
                Self::send_frame(id, entry, payload.clone());
            }
        }
        found
    }

    /// Closes every connection bound to a session and returns their ids.
    /// Entries stay registered until each actor stops and deregisters.
    pub fn close_session(&self, session_id: &str, reason: CloseReason) -> Vec<String> {
        let inner = self.lock();
        let mut closed = Vec::new();
        for (id, entry) in inner.iter() {
            if entry.session_id.as_deref() == Some(session_id) {
                entry.closer.do_send(CloseConnection(Some(reason.clone())));
                closed.push(id.clone());
            }
        }
        closed
    }

    /// Closes every open connection (carrier shutdown) and returns all ids.
    pub fn close_all(&self, reason: CloseReason) -> Vec<String> {
        let inner = self.lock();
        let mut closed = Vec::new();
        for (id, entry) in inner.iter() {
            entry.closer.do_send(CloseConnection(Some(reason.clone())));
            closed.push(id.clone());
        }
        closed
    }

    fn send_frame(connection_id: &str, entry: &ConnectionEntry, payload: String) -> bool {
        let buffered = entry.buffered.load(Ordering::Relaxed);
        if buffered + payload.len() > MAX_BUFFERED_BYTES {
            tracing::warn!(
                %connection_id,
                buffered,
                "Backpressure: dropping message to slow connection"
            );
            return false;
        }
        entry.buffered.fetch_add(payload.len(), Ordering::Relaxed);
        entry.writer.do_send(WriteFrame { payload });
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ConnectionEntry>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
