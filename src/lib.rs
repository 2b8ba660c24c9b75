//! # pubsync
//!
//! Client for a publish/subscribe data-sync protocol. Subscribe to named,
//! parameterized publications on a remote provider and keep a local mirror
//! of the documents they publish.
//!
//! ## Core Concepts
//!
//! - **Collections**: In-memory document maps fed by `added`/`changed`/`removed` deltas
//! - **Selectors**: Equality, `$ne` and `$elemMatch` predicates over documents
//! - **Subscriptions**: One lifecycle per (publication, parameters) pair
//! - **Client**: Owns the transport, routes messages, resynchronizes on reconnect
//!
//! ## Example
//!
//! ```ignore
//! use pubsync::{ClientConfig, MemoryConnector, PublicationClient, Selector};
//! use serde_json::json;
//!
//! let connector = MemoryConnector::new();
//! let client = PublicationClient::connect("wss://provider", ClientConfig::default(), connector)?;
//!
//! let sub = client.subscribe("orgs", vec![json!({"region": "eu"})])?;
//! sub.ready().await?;
//!
//! let active = client
//!     .get_collection("orgs")
//!     .find(Selector::new().equals("active", true))
//!     .fetch();
//! ```

pub mod client;
pub mod clock;
pub mod collection;
pub mod config;
pub mod error;
pub mod events;
pub mod paths;
pub mod protocol;
pub mod selector;
pub mod subscription;
pub mod transport;
pub mod types;
pub mod watchdog;

// Re-exports
pub use client::{ClientEvent, ConnectedFuture, PublicationClient, IDLE_TIMEOUT_REASON};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collection::{
    CollectionEvent, CollectionOptions, LocalCollection, QueryEvent, QueryObserver, ReactiveQuery,
};
pub use config::{ClientConfig, ReconnectPolicy, DEFAULT_LAST_DATA_TIMEOUT};
pub use error::{ClientError, Result};
pub use events::{EventHub, EventStream, ListenerId, DEFAULT_EVENT_BUFFER};
pub use paths::{deep_merge, expand_paths};
pub use protocol::{ClientMessage, NoSubError, ServerMessage, PROTOCOL_VERSION};
pub use selector::{matches, Condition, Selector};
pub use subscription::{
    ReadyFuture, Subscription, SubscriptionEvent, SubscriptionPhase, DEFAULT_NOSUB_MESSAGE,
};
pub use transport::{Connector, EventSink, MemoryConnector, Transport};
pub use types::*;
pub use watchdog::IdleWatchdog;
