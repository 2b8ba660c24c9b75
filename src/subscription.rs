//! Subscription lifecycle.
//!
//! A [`Subscription`] tracks one request to a publication:
//!
//! ```text
//! Created -> Starting -> Ready
//!                     -> Failed
//! (any) -> Stopped
//! ```
//!
//! `Starting` is entered as soon as the subscription is started; the `sub`
//! message goes out immediately when the client is connected and is held
//! back until the next `connected` otherwise. Only a subscription whose
//! `sub` has actually been sent reacts to `ready`/`nosub`.
//!
//! # Example
//!
//! ```ignore
//! let sub = client.subscribe("orgs", vec![json!({"active": true})])?;
//! sub.ready().await?;
//! ```

use crate::client::ClientShared;
use crate::error::{ClientError, Result};
use crate::events::{EventHub, EventStream, ListenerId};
use crate::protocol::{ClientMessage, NoSubError};
use crate::types::SubscriptionKey;
use futures_channel::oneshot;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

/// Message used when a `nosub` carries no error.
pub const DEFAULT_NOSUB_MESSAGE: &str = "subscription ended by provider";

/// Lifecycle phase of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionPhase {
    Created,
    Starting,
    Ready,
    Failed,
    Stopped,
}

/// Events emitted by a subscription.
#[derive(Clone, Debug, PartialEq)]
pub enum SubscriptionEvent {
    Ready,
    /// The provider refused or ended the subscription. Emitted both for the
    /// initial failure and for any later `nosub` once ready.
    NoSub(ClientError),
    /// Resubscribed after the connection was re-established.
    Reconnected,
}

type Waiter = oneshot::Sender<Result<()>>;

struct SubscriptionState {
    phase: SubscriptionPhase,
    sub_sent: bool,
    error: Option<ClientError>,
    waiters: Vec<Waiter>,
}

struct SubscriptionInner {
    id: String,
    name: String,
    params: Vec<Value>,
    key: SubscriptionKey,
    client: Weak<ClientShared>,
    state: Mutex<SubscriptionState>,
    events: EventHub<SubscriptionEvent>,
}

/// Handle to one publication subscription. Clones share state.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        name: String,
        params: Vec<Value>,
        client: Weak<ClientShared>,
        event_buffer: usize,
    ) -> Self {
        let key = SubscriptionKey::new(&name, &params);
        Self {
            inner: Arc::new(SubscriptionInner {
                id,
                name,
                params,
                key,
                client,
                state: Mutex::new(SubscriptionState {
                    phase: SubscriptionPhase::Created,
                    sub_sent: false,
                    error: None,
                    waiters: Vec::new(),
                }),
                events: EventHub::new(event_buffer),
            }),
        }
    }

    // --- Accessors ---

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Publication name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Wire parameters, including a trailing options object if one was given.
    pub fn params(&self) -> &[Value] {
        &self.inner.params
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.inner.key
    }

    pub fn phase(&self) -> SubscriptionPhase {
        self.inner.state.lock().phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == SubscriptionPhase::Ready
    }

    pub fn is_stopped(&self) -> bool {
        self.phase() == SubscriptionPhase::Stopped
    }

    /// The error that failed setup, if any.
    pub fn error(&self) -> Option<ClientError> {
        self.inner.state.lock().error.clone()
    }

    /// Whether both handles refer to the same subscription.
    pub fn ptr_eq(&self, other: &Subscription) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // --- Events ---

    pub fn listen(&self) -> EventStream<SubscriptionEvent> {
        self.inner.events.listen()
    }

    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.inner.events.unlisten(id)
    }

    // --- Readiness ---

    /// A future that settles once the subscription is ready or has failed.
    ///
    /// Settles at once when the outcome is already known. Every returned
    /// future settles exactly once, including when the subscription is
    /// stopped first. Pending futures survive a reconnect.
    pub fn ready(&self) -> ReadyFuture {
        let mut state = self.inner.state.lock();
        match state.phase {
            SubscriptionPhase::Ready => ReadyFuture::settled(Ok(())),
            SubscriptionPhase::Failed => {
                let error = state.error.clone().unwrap_or_else(|| self.nosub_error(None));
                ReadyFuture::settled(Err(error))
            }
            SubscriptionPhase::Stopped => ReadyFuture::settled(Err(self.stopped_error())),
            SubscriptionPhase::Created | SubscriptionPhase::Starting => {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                ReadyFuture::pending(rx)
            }
        }
    }

    // --- Lifecycle ---

    /// Unsubscribe and detach from the client.
    ///
    /// Idempotent. Rejects pending readiness futures, detaches every
    /// listener, sends `unsub` and drops the subscription from the client's
    /// registry.
    pub fn stop(&self) {
        let client = self.inner.client.upgrade();
        let _gate = client.as_ref().map(|c| c.gate());

        let waiters = {
            let mut state = self.inner.state.lock();
            if state.phase == SubscriptionPhase::Stopped {
                return;
            }
            state.phase = SubscriptionPhase::Stopped;
            state.sub_sent = false;
            std::mem::take(&mut state.waiters)
        };

        let error = self.stopped_error();
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
        self.inner.events.unlisten_all();

        tracing::debug!(subscription_id = %self.inner.id, publication = %self.inner.name, "subscription stopped");

        if let Some(client) = &client {
            let unsub = ClientMessage::Unsub {
                id: self.inner.id.clone(),
            };
            if let Err(e) = client.send(unsub) {
                tracing::warn!(subscription_id = %self.inner.id, error = %e, "failed to send unsub");
            }
            client.remove_subscription(self);
        }
    }

    /// Return to `Created`, keeping pending readiness futures.
    pub(crate) fn reset(&self) {
        let mut state = self.inner.state.lock();
        if state.phase == SubscriptionPhase::Stopped {
            return;
        }
        state.phase = SubscriptionPhase::Created;
        state.sub_sent = false;
        state.error = None;
    }

    /// Enter `Starting` and send `sub` if the client is connected.
    ///
    /// Starting twice without a reset is a caller bug.
    pub(crate) fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        match state.phase {
            SubscriptionPhase::Created => {}
            SubscriptionPhase::Stopped => return Ok(()),
            _ => {
                return Err(ClientError::AlreadyStarted {
                    id: self.inner.id.clone(),
                })
            }
        }
        state.phase = SubscriptionPhase::Starting;

        let Some(client) = self.inner.client.upgrade() else {
            return Ok(());
        };
        if client.is_connected() {
            state.sub_sent = self.send_sub(&client);
        } else {
            tracing::trace!(subscription_id = %self.inner.id, "sub queued until connected");
        }
        Ok(())
    }

    /// Reset, restart, and announce the resubscription.
    pub(crate) fn resume_after_reconnect(&self) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }
        self.reset();
        self.start()?;
        self.inner.events.emit(SubscriptionEvent::Reconnected);
        Ok(())
    }

    /// Send a queued `sub` now that the client is connected.
    pub(crate) fn on_connected(&self, client: &ClientShared) {
        let mut state = self.inner.state.lock();
        if state.phase == SubscriptionPhase::Starting && !state.sub_sent {
            state.sub_sent = self.send_sub(client);
        }
    }

    /// React to a `ready` listing `subs`. Returns true if this subscription
    /// became ready.
    pub(crate) fn handle_ready(&self, subs: &[String]) -> bool {
        if !subs.iter().any(|id| *id == self.inner.id) {
            return false;
        }

        let waiters = {
            let mut state = self.inner.state.lock();
            if state.phase != SubscriptionPhase::Starting || !state.sub_sent {
                return false;
            }
            state.phase = SubscriptionPhase::Ready;
            std::mem::take(&mut state.waiters)
        };

        tracing::debug!(subscription_id = %self.inner.id, publication = %self.inner.name, "subscription ready");
        for waiter in waiters {
            let _ = waiter.send(Ok(()));
        }
        self.inner.events.emit(SubscriptionEvent::Ready);
        true
    }

    /// React to a `nosub` for `id`.
    pub(crate) fn handle_nosub(&self, id: &str, error: Option<&NoSubError>) {
        if id != self.inner.id {
            return;
        }

        let error = self.nosub_error(error);
        let waiters = {
            let mut state = self.inner.state.lock();
            match state.phase {
                SubscriptionPhase::Starting if state.sub_sent => {
                    state.phase = SubscriptionPhase::Failed;
                    state.error = Some(error.clone());
                    std::mem::take(&mut state.waiters)
                }
                SubscriptionPhase::Ready | SubscriptionPhase::Failed => Vec::new(),
                _ => return,
            }
        };

        tracing::warn!(subscription_id = %self.inner.id, publication = %self.inner.name, error = %error, "nosub");
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
        self.inner.events.emit(SubscriptionEvent::NoSub(error));
    }

    // --- Internal ---

    fn send_sub(&self, client: &ClientShared) -> bool {
        let sub = ClientMessage::Sub {
            id: self.inner.id.clone(),
            name: self.inner.name.clone(),
            params: self.inner.params.clone(),
        };
        match client.send(sub) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(subscription_id = %self.inner.id, error = %e, "failed to send sub");
                false
            }
        }
    }

    fn nosub_error(&self, error: Option<&NoSubError>) -> ClientError {
        ClientError::Publication {
            publication: self.inner.name.clone(),
            message: error
                .map(NoSubError::message)
                .unwrap_or_else(|| DEFAULT_NOSUB_MESSAGE.to_string()),
        }
    }

    fn stopped_error(&self) -> ClientError {
        ClientError::SubscriptionStopped {
            publication: self.inner.name.clone(),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Resolves when a subscription becomes ready, or fails with the reason it
/// never will.
#[must_use = "futures do nothing unless polled"]
pub struct ReadyFuture {
    state: ReadyState,
}

enum ReadyState {
    Settled(Option<Result<()>>),
    Pending(oneshot::Receiver<Result<()>>),
}

impl ReadyFuture {
    fn settled(result: Result<()>) -> Self {
        Self {
            state: ReadyState::Settled(Some(result)),
        }
    }

    fn pending(receiver: oneshot::Receiver<Result<()>>) -> Self {
        Self {
            state: ReadyState::Pending(receiver),
        }
    }
}

impl Future for ReadyFuture {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            ReadyState::Settled(result) => {
                Poll::Ready(result.take().unwrap_or(Err(ClientError::Disconnected)))
            }
            ReadyState::Pending(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                // Sender dropped along with the subscription.
                Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(ClientError::Disconnected)),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
