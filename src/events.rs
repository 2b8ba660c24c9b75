//! Typed event delivery for collections, subscriptions and the client.
//!
//! Every listener owns a bounded channel. Emitting never blocks and never
//! runs listener code: events are queued and the listener drains them at
//! its own pace. A listener whose buffer overflows is dropped, as is one
//! whose receiving side has gone away.
//!
//! # Example
//!
//! ```ignore
//! let stream = collection.listen();
//! while let Ok(event) = stream.try_recv() {
//!     match event {
//!         CollectionEvent::Added(doc) => println!("added {:?}", doc),
//!         CollectionEvent::Cleared => break,
//!         _ => {}
//!     }
//! }
//! collection.unlisten(stream.id);
//! ```

use crossbeam_channel::{bounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default per-listener buffer before the listener is dropped.
pub const DEFAULT_EVENT_BUFFER: usize = 1000;

/// Identifies one registered listener so it can be removed individually.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

impl fmt::Debug for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerId({})", self.0)
    }
}

/// Receiving end of a listener registration.
pub struct EventStream<E> {
    pub id: ListenerId,
    receiver: Receiver<E>,
}

impl<E> EventStream<E> {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<E, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<E, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<E, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Take every event queued so far.
    pub fn drain(&self) -> Vec<E> {
        self.receiver.try_iter().collect()
    }
}

/// Fan-out of one event type to any number of listeners.
pub struct EventHub<E> {
    listeners: RwLock<HashMap<ListenerId, Sender<E>>>,
    next_id: AtomicU64,
    buffer_size: usize,
}

impl<E: Clone> EventHub<E> {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Register a listener.
    pub fn listen(&self) -> EventStream<E> {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.buffer_size);
        self.listeners.write().insert(id, sender);
        EventStream { id, receiver }
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.listeners.write().remove(&id).is_some()
    }

    /// Remove every listener.
    pub fn unlisten_all(&self) {
        self.listeners.write().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Queue `event` for every listener, dropping those that cannot take it.
    pub fn emit(&self, event: E) {
        let mut to_remove = Vec::new();

        {
            let listeners = self.listeners.read();
            for (id, sender) in listeners.iter() {
                match sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(crossbeam_channel::TrySendError::Full(_)) => {
                        tracing::warn!(listener = id.0, "event buffer overflowed, dropping listener");
                        to_remove.push(*id);
                    }
                    Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                        to_remove.push(*id);
                    }
                }
            }
        }

        if !to_remove.is_empty() {
            let mut listeners = self.listeners.write();
            for id in to_remove {
                listeners.remove(&id);
            }
        }
    }
}

impl<E: Clone> Default for EventHub<E> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}
