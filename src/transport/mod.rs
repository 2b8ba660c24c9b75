//! The duplex transport the client runs over.
//!
//! The client does not own any I/O. A [`Connector`] opens a [`Transport`]
//! for an address and is handed an [`EventSink`] through which the
//! transport reports inbound messages and its reconnect lifecycle:
//!
//! - [`EventSink::data`] for every inbound message
//! - [`EventSink::reconnecting`] when the link dropped and a retry is pending
//! - [`EventSink::reconnected`] once the link is back
//!
//! Retry timing is the transport's business; [`ReconnectPolicy`] is passed
//! through untouched.
//!
//! Transports must not call into the sink from inside [`Transport::send`].

pub mod memory;

use crate::client::ClientShared;
pub use crate::config::ReconnectPolicy;
use crate::error::Result;
use serde_json::Value;
use std::sync::Weak;

pub use memory::MemoryConnector;

/// An open connection to the provider.
pub trait Transport: Send {
    /// Queue a message mapping for delivery.
    fn send(&mut self, message: Value) -> Result<()>;

    /// Close the connection. Events arriving afterwards are ignored.
    fn end(&mut self);
}

/// Opens transports.
pub trait Connector: Send + Sync {
    fn open(
        &self,
        address: &str,
        policy: &ReconnectPolicy,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>>;
}

/// Where a transport delivers inbound traffic and lifecycle signals.
///
/// Each sink is bound to the connection it was issued for. Once the client
/// replaces that connection, or is dropped, the sink goes inert.
#[derive(Clone)]
pub struct EventSink {
    client: Weak<ClientShared>,
    generation: u64,
}

impl EventSink {
    pub(crate) fn new(client: Weak<ClientShared>, generation: u64) -> Self {
        Self { client, generation }
    }

    /// Deliver an inbound message.
    pub fn data(&self, message: Value) -> Result<()> {
        match self.client.upgrade() {
            Some(client) => client.on_transport_data(self.generation, message),
            None => Ok(()),
        }
    }

    /// The connection was re-established.
    pub fn reconnected(&self) -> Result<()> {
        match self.client.upgrade() {
            Some(client) => client.on_transport_reconnected(self.generation),
            None => Ok(()),
        }
    }

    /// The connection dropped and the transport is about to retry.
    pub fn reconnecting(&self) {
        if let Some(client) = self.client.upgrade() {
            client.on_transport_reconnecting(self.generation);
        }
    }

    /// Whether events delivered here still reach a client.
    pub fn is_attached(&self) -> bool {
        self.client
            .upgrade()
            .is_some_and(|client| client.generation() == self.generation)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
