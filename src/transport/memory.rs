//! In-process transport.
//!
//! Outbound messages are queued on a channel for the owner to read, and the
//! owner plays the provider by pushing inbound messages and lifecycle
//! signals into the most recently opened connection. Used by the test
//! suite, and by embedders that move the bytes themselves.

use crate::config::ReconnectPolicy;
use crate::error::{ClientError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{Connector, EventSink, Transport};

struct Connection {
    address: String,
    sink: EventSink,
    ended: Arc<AtomicBool>,
}

struct Shared {
    outbound_tx: Sender<Value>,
    outbound_rx: Receiver<Value>,
    connections: Mutex<Vec<Connection>>,
}

/// Connector whose connections live in memory.
///
/// Clones share state: hand one clone to the client and keep another to
/// drive the provider side.
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        let (outbound_tx, outbound_rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                outbound_tx,
                outbound_rx,
                connections: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Every message sent since the last call, across all connections.
    pub fn sent(&self) -> Vec<Value> {
        self.shared.outbound_rx.try_iter().collect()
    }

    /// Deliver an inbound message on the current connection.
    pub fn deliver(&self, message: Value) -> Result<()> {
        self.current_sink()?.data(message)
    }

    /// Signal that the current connection came back.
    pub fn reconnected(&self) -> Result<()> {
        self.current_sink()?.reconnected()
    }

    /// Signal that the current connection dropped and will be retried.
    pub fn reconnecting(&self) -> Result<()> {
        self.current_sink()?.reconnecting();
        Ok(())
    }

    /// Sink of connection `index` (0 = first opened).
    pub fn sink(&self, index: usize) -> Option<EventSink> {
        self.shared
            .connections
            .lock()
            .get(index)
            .map(|c| c.sink.clone())
    }

    /// Number of connections opened so far.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    /// Whether connection `index` has been ended by the client.
    pub fn is_ended(&self, index: usize) -> bool {
        self.shared
            .connections
            .lock()
            .get(index)
            .is_some_and(|c| c.ended.load(Ordering::SeqCst))
    }

    /// Address connection `index` was opened for.
    pub fn address(&self, index: usize) -> Option<String> {
        self.shared
            .connections
            .lock()
            .get(index)
            .map(|c| c.address.clone())
    }

    fn current_sink(&self) -> Result<EventSink> {
        self.shared
            .connections
            .lock()
            .last()
            .map(|c| c.sink.clone())
            .ok_or_else(|| ClientError::Transport("no connection opened".to_string()))
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MemoryConnector {
    fn open(
        &self,
        address: &str,
        _policy: &ReconnectPolicy,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>> {
        let ended = Arc::new(AtomicBool::new(false));
        self.shared.connections.lock().push(Connection {
            address: address.to_string(),
            sink,
            ended: Arc::clone(&ended),
        });

        tracing::debug!(address, "memory transport opened");
        Ok(Box::new(MemoryTransport {
            outbound: self.shared.outbound_tx.clone(),
            ended,
        }))
    }
}

struct MemoryTransport {
    outbound: Sender<Value>,
    ended: Arc<AtomicBool>,
}

impl Transport for MemoryTransport {
    fn send(&mut self, message: Value) -> Result<()> {
        if self.ended.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("connection ended".to_string()));
        }
        self.outbound
            .send(message)
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    fn end(&mut self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}
