//! Publication client.
//!
//! [`PublicationClient`] owns one transport at a time, routes inbound deltas
//! into [`LocalCollection`]s, keeps a registry of [`Subscription`]s keyed by
//! name and parameters, and resynchronizes everything from scratch whenever
//! the connection is re-established.
//!
//! Every entry point (transport events, `subscribe`, `reconnect_if_idle`,
//! `stop`) runs under one re-entrant dispatch gate, so messages are applied
//! one at a time in delivery order. Events reach listeners over channels;
//! no listener code runs inside the client.
//!
//! # Example
//!
//! ```ignore
//! let connector = MemoryConnector::new();
//! let client = PublicationClient::connect("wss://provider", ClientConfig::default(), connector)?;
//!
//! let sub = client.subscribe("orgs", vec![json!({"active": true})])?;
//! sub.ready().await?;
//!
//! for org in client.get_collection("orgs").list() {
//!     println!("{:?}", org);
//! }
//! ```

use crate::clock::{Clock, SystemClock};
use crate::collection::{CollectionOptions, LocalCollection};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{EventHub, EventStream, ListenerId};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::subscription::Subscription;
use crate::transport::{Connector, EventSink, Transport};
use crate::types::SubscriptionKey;
use crate::watchdog::IdleWatchdog;
use futures_channel::oneshot;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Reason reported when the watchdog's own timer forces a reconnect.
pub const IDLE_TIMEOUT_REASON: &str = "Idle timeout";

/// The watchdog re-checks at this multiple of the idle threshold.
const WATCHDOG_BACKSTOP_FACTOR: u32 = 3;

fn backstop(timeout: Duration) -> Duration {
    timeout.saturating_mul(WATCHDOG_BACKSTOP_FACTOR)
}

/// Events emitted by the client.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// The provider acknowledged the handshake.
    Connected,
    /// The connection dropped. Emitted once per connected period.
    Disconnected,
    /// The provider reported these subscription ids ready.
    Ready { subs: Vec<String> },
    /// The idle watchdog replaced a silent connection.
    ProactivelyReconnected { reason: String },
    /// Any message this client does not handle itself, plus every `nosub`.
    Message { kind: String, payload: Value },
}

struct ConnectionState {
    transport: Option<Box<dyn Transport>>,
    connected: bool,
    stopped: bool,
    last_data: Instant,
    connect_waiters: Vec<oneshot::Sender<()>>,
}

pub(crate) struct ClientShared {
    address: String,
    config: ClientConfig,
    connector: Box<dyn Connector>,
    clock: Arc<dyn Clock>,
    weak_self: Weak<ClientShared>,
    gate: ReentrantMutex<()>,
    generation: AtomicU64,
    state: Mutex<ConnectionState>,
    collections: RwLock<HashMap<String, LocalCollection>>,
    subscriptions: Mutex<HashMap<SubscriptionKey, Subscription>>,
    next_subscription_id: AtomicU64,
    events: EventHub<ClientEvent>,
    watchdog: Mutex<Option<IdleWatchdog>>,
}

/// Client for a publication provider. Clones share one connection.
#[derive(Clone)]
pub struct PublicationClient {
    shared: Arc<ClientShared>,
}

impl PublicationClient {
    /// Open a connection to `address` and send the handshake.
    pub fn connect(
        address: impl Into<String>,
        config: ClientConfig,
        connector: impl Connector + 'static,
    ) -> Result<Self> {
        Self::with_clock(address, config, connector, Arc::new(SystemClock))
    }

    /// Like [`connect`](Self::connect), measuring idleness with `clock`.
    pub fn with_clock(
        address: impl Into<String>,
        config: ClientConfig,
        connector: impl Connector + 'static,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let address = address.into();
        let now = clock.now();
        let event_buffer = config.event_buffer_size;

        let shared = Arc::new_cyclic(|weak_self| ClientShared {
            address,
            config,
            connector: Box::new(connector),
            clock,
            weak_self: weak_self.clone(),
            gate: ReentrantMutex::new(()),
            generation: AtomicU64::new(0),
            state: Mutex::new(ConnectionState {
                transport: None,
                connected: false,
                stopped: false,
                last_data: now,
                connect_waiters: Vec::new(),
            }),
            collections: RwLock::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription_id: AtomicU64::new(0),
            events: EventHub::new(event_buffer),
            watchdog: Mutex::new(None),
        });

        {
            let _gate = shared.gate();
            shared.open_transport()?;
            shared.send(ClientMessage::Connect {
                version: shared.config.protocol_version.clone(),
            })?;
        }

        if let Some(timeout) = shared.config.idle_timeout() {
            let client = Arc::downgrade(&shared);
            let watchdog = IdleWatchdog::spawn(move || match client.upgrade() {
                Some(client) => {
                    if let Err(e) = client.reconnect_if_idle(IDLE_TIMEOUT_REASON) {
                        tracing::warn!(error = %e, "idle check failed");
                    }
                    true
                }
                None => false,
            })?;
            watchdog.arm(backstop(timeout));
            *shared.watchdog.lock() = Some(watchdog);
        }

        tracing::info!(address = %shared.address, paranoid = shared.config.paranoid, "client started");
        Ok(Self { shared })
    }

    // --- Subscriptions ---

    /// Subscribe to publication `name` with `params`.
    ///
    /// Returns the existing subscription when one with the same name and
    /// structurally equal parameters is registered.
    pub fn subscribe(&self, name: &str, params: Vec<Value>) -> Result<Subscription> {
        let _gate = self.shared.gate();
        self.shared.subscribe(name, params)
    }

    /// Subscribe with an options object, sent as the last parameter.
    ///
    /// `subscribe_with_options(n, opts, [a])` is the same subscription as
    /// `subscribe(n, [a, opts])`.
    pub fn subscribe_with_options(
        &self,
        name: &str,
        options: Value,
        mut params: Vec<Value>,
    ) -> Result<Subscription> {
        params.push(options);
        self.subscribe(name, params)
    }

    pub fn get_subscription_by_id(&self, id: &str) -> Option<Subscription> {
        self.shared
            .subscriptions
            .lock()
            .values()
            .find(|sub| sub.id() == id)
            .cloned()
    }

    /// Every registered subscription.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.shared.subscription_snapshot()
    }

    // --- Collections ---

    /// The collection called `name`, created on first use.
    pub fn get_collection(&self, name: &str) -> LocalCollection {
        self.shared.collection(name, CollectionOptions::default())
    }

    /// Like [`get_collection`](Self::get_collection). `options` only apply
    /// if the collection does not exist yet.
    pub fn get_collection_with_options(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> LocalCollection {
        self.shared.collection(name, options)
    }

    // --- Connection ---

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// A future that resolves once the provider has acknowledged the
    /// handshake. Fails if the client is stopped first.
    pub fn when_connected(&self) -> ConnectedFuture {
        let mut state = self.shared.state.lock();
        if state.connected {
            ConnectedFuture::settled(Ok(()))
        } else if state.stopped {
            ConnectedFuture::settled(Err(ClientError::Disconnected))
        } else {
            let (tx, rx) = oneshot::channel();
            state.connect_waiters.push(tx);
            ConnectedFuture::pending(rx)
        }
    }

    /// Replace the connection if nothing has arrived for longer than the
    /// idle threshold. Only active when the watchdog is enabled.
    ///
    /// Returns true if the connection was replaced.
    pub fn reconnect_if_idle(&self, reason: &str) -> Result<bool> {
        self.shared.reconnect_if_idle(reason)
    }

    /// Close the connection and stop the watchdog.
    ///
    /// Subscriptions and collections are left as they are; later transport
    /// events are ignored.
    pub fn stop(&self) {
        self.shared.stop();
    }

    // --- Events ---

    pub fn listen(&self) -> EventStream<ClientEvent> {
        self.shared.events.listen()
    }

    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.shared.events.unlisten(id)
    }
}

impl fmt::Debug for PublicationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicationClient")
            .field("address", &self.shared.address)
            .field("connected", &self.is_connected())
            .field("subscriptions", &self.shared.subscriptions.lock().len())
            .finish()
    }
}

impl ClientShared {
    pub(crate) fn gate(&self) -> ReentrantMutexGuard<'_, ()> {
        self.gate.lock()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Hand `message` to the current transport.
    pub(crate) fn send(&self, message: ClientMessage) -> Result<()> {
        let kind = message.kind();
        let value = message.to_value()?;

        let mut state = self.state.lock();
        let transport = state.transport.as_mut().ok_or(ClientError::Disconnected)?;
        tracing::trace!(kind, "send");
        transport.send(value)
    }

    /// Drop `subscription` from the registry if it is still the one
    /// registered under its key.
    pub(crate) fn remove_subscription(&self, subscription: &Subscription) {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions
            .get(subscription.key())
            .is_some_and(|registered| registered.ptr_eq(subscription))
        {
            subscriptions.remove(subscription.key());
        }
    }

    // --- Transport events ---

    pub(crate) fn on_transport_data(&self, generation: u64, message: Value) -> Result<()> {
        let _gate = self.gate();
        if !self.is_current(generation) {
            tracing::trace!(generation, "ignoring data from a replaced transport");
            return Ok(());
        }
        self.handle_data(message)
    }

    pub(crate) fn on_transport_reconnected(&self, generation: u64) -> Result<()> {
        let _gate = self.gate();
        if !self.is_current(generation) {
            return Ok(());
        }

        self.touch();
        tracing::info!(address = %self.address, "transport reconnected, resynchronizing");
        self.reset_collections_and_connect()
    }

    pub(crate) fn on_transport_reconnecting(&self, generation: u64) {
        let _gate = self.gate();
        if !self.is_current(generation) {
            return;
        }

        let was_connected = {
            let mut state = self.state.lock();
            state.last_data = self.clock.now();
            std::mem::replace(&mut state.connected, false)
        };

        if was_connected {
            tracing::info!(address = %self.address, "disconnected");
            self.events.emit(ClientEvent::Disconnected);
        }
    }

    // --- Dispatch ---

    fn handle_data(&self, raw: Value) -> Result<()> {
        self.touch();

        let message = match ServerMessage::from_value(raw) {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed message");
                return Ok(());
            }
        };
        tracing::trace!(kind = message.kind(), "received");

        match message {
            ServerMessage::Added {
                collection,
                id,
                fields,
            } => {
                self.collection(&collection, CollectionOptions::default())
                    .apply_added(&id, fields);
            }
            ServerMessage::Changed {
                collection,
                id,
                fields,
                cleared,
            } => {
                self.collection(&collection, CollectionOptions::default())
                    .apply_changed(&id, &fields, &cleared);
            }
            ServerMessage::Removed { collection, id } => {
                self.collection(&collection, CollectionOptions::default())
                    .apply_removed(&id);
            }
            ServerMessage::Connected => self.handle_connected(),
            ServerMessage::Ready { subs } => {
                for subscription in self.subscription_snapshot() {
                    subscription.handle_ready(&subs);
                }
                self.events.emit(ClientEvent::Ready { subs });
            }
            ServerMessage::NoSub { id, error } => {
                for subscription in self.subscription_snapshot() {
                    subscription.handle_nosub(&id, error.as_ref());
                }
                let payload = json!({"msg": "nosub", "id": id, "error": error});
                self.events.emit(ClientEvent::Message {
                    kind: "nosub".to_string(),
                    payload,
                });
            }
            ServerMessage::Other { kind, payload } => {
                self.events.emit(ClientEvent::Message { kind, payload });
            }
        }
        Ok(())
    }

    fn handle_connected(&self) {
        let waiters = {
            let mut state = self.state.lock();
            state.connected = true;
            std::mem::take(&mut state.connect_waiters)
        };
        tracing::info!(address = %self.address, "connected");

        for waiter in waiters {
            let _ = waiter.send(());
        }
        for subscription in self.subscription_snapshot() {
            subscription.on_connected(self);
        }
        self.events.emit(ClientEvent::Connected);
    }

    // --- Resynchronization ---

    fn reconnect_if_idle(&self, reason: &str) -> Result<bool> {
        let _gate = self.gate();
        let Some(timeout) = self.config.idle_timeout() else {
            return Ok(false);
        };

        let idle = {
            let state = self.state.lock();
            if state.stopped {
                return Ok(false);
            }
            self.clock.now().saturating_duration_since(state.last_data)
        };

        self.arm_watchdog(timeout);
        if idle <= timeout {
            return Ok(false);
        }

        tracing::info!(reason, ?idle, "connection idle, reconnecting");
        self.replace_transport()?;
        self.reset_collections_and_connect()?;
        self.events.emit(ClientEvent::ProactivelyReconnected {
            reason: reason.to_string(),
        });
        Ok(true)
    }

    /// Clear every collection, resend the handshake and resume every
    /// subscription.
    fn reset_collections_and_connect(&self) -> Result<()> {
        let collections: Vec<LocalCollection> =
            self.collections.read().values().cloned().collect();
        for collection in collections {
            collection.clear();
        }

        let connect = ClientMessage::Connect {
            version: self.config.protocol_version.clone(),
        };
        if let Err(e) = self.send(connect) {
            tracing::warn!(error = %e, "failed to send connect");
        }

        for subscription in self.subscription_snapshot() {
            subscription.resume_after_reconnect()?;
        }
        Ok(())
    }

    fn open_transport(&self) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let sink = EventSink::new(self.weak_self.clone(), generation);
        let transport = self
            .connector
            .open(&self.address, &self.config.reconnect, sink)?;

        self.state.lock().transport = Some(transport);
        tracing::debug!(address = %self.address, generation, "transport opened");
        Ok(())
    }

    fn replace_transport(&self) -> Result<()> {
        let previous = self.state.lock().transport.take();
        if let Some(mut previous) = previous {
            previous.end();
        }
        self.open_transport()
    }

    fn stop(&self) {
        let _gate = self.gate();
        let (transport, waiters) = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.connected = false;
            (
                state.transport.take(),
                std::mem::take(&mut state.connect_waiters),
            )
        };

        if let Some(mut transport) = transport {
            transport.end();
        }
        if let Some(watchdog) = self.watchdog.lock().take() {
            watchdog.disarm();
        }
        drop(waiters);
        tracing::info!(address = %self.address, "client stopped");
    }

    // --- Helpers ---

    fn is_current(&self, generation: u64) -> bool {
        !self.state.lock().stopped && generation == self.generation()
    }

    fn touch(&self) {
        self.state.lock().last_data = self.clock.now();
    }

    fn arm_watchdog(&self, timeout: Duration) {
        if let Some(watchdog) = self.watchdog.lock().as_ref() {
            watchdog.arm(backstop(timeout));
        }
    }

    fn subscribe(&self, name: &str, params: Vec<Value>) -> Result<Subscription> {
        if self.state.lock().stopped {
            return Err(ClientError::Disconnected);
        }

        let key = SubscriptionKey::new(name, &params);
        let subscription = {
            let mut subscriptions = self.subscriptions.lock();
            if let Some(existing) = subscriptions.get(&key) {
                return Ok(existing.clone());
            }

            let id = self
                .next_subscription_id
                .fetch_add(1, Ordering::SeqCst)
                .to_string();
            let subscription = Subscription::new(
                id,
                name.to_string(),
                params,
                self.weak_self.clone(),
                self.config.event_buffer_size,
            );
            subscriptions.insert(key, subscription.clone());
            subscription
        };

        tracing::debug!(
            subscription_id = subscription.id(),
            publication = name,
            "subscribed"
        );
        subscription.start()?;
        Ok(subscription)
    }

    fn subscription_snapshot(&self) -> Vec<Subscription> {
        self.subscriptions.lock().values().cloned().collect()
    }

    fn collection(&self, name: &str, options: CollectionOptions) -> LocalCollection {
        if let Some(collection) = self.collections.read().get(name) {
            return collection.clone();
        }

        self.collections
            .write()
            .entry(name.to_string())
            .or_insert_with(|| {
                LocalCollection::with_buffer_size(name, options, self.config.event_buffer_size)
            })
            .clone()
    }
}

impl Drop for ClientShared {
    fn drop(&mut self) {
        if let Some(mut transport) = self.state.get_mut().transport.take() {
            transport.end();
        }
    }
}

/// Resolves once the client is connected.
#[must_use = "futures do nothing unless polled"]
pub struct ConnectedFuture {
    settled: Option<Result<()>>,
    receiver: Option<oneshot::Receiver<()>>,
}

impl ConnectedFuture {
    fn settled(result: Result<()>) -> Self {
        Self {
            settled: Some(result),
            receiver: None,
        }
    }

    fn pending(receiver: oneshot::Receiver<()>) -> Self {
        Self {
            settled: None,
            receiver: Some(receiver),
        }
    }
}

impl Future for ConnectedFuture {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(result) = this.settled.take() {
            return Poll::Ready(result);
        }
        match this.receiver.as_mut() {
            Some(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(result) => {
                    this.receiver = None;
                    Poll::Ready(result.map_err(|_| ClientError::Disconnected))
                }
                Poll::Pending => Poll::Pending,
            },
            None => Poll::Ready(Err(ClientError::Disconnected)),
        }
    }
}
