//! Local document collections and the live views over them.
//!
//! A [`LocalCollection`] mirrors one named collection on the provider. It
//! applies `added` / `changed` / `removed` deltas as they arrive and emits
//! a [`CollectionEvent`] for each. [`ReactiveQuery`] binds a collection to a
//! [`Selector`](crate::selector::Selector) and stays current as the
//! collection mutates.
//!
//! # Example
//!
//! ```ignore
//! let tasks = client.get_collection("tasks");
//! let open = tasks.find(Selector::new().equals("done", false));
//!
//! let mut observer = open.observe();
//! for task in open.fetch() {
//!     println!("open task {:?}", task);
//! }
//! while let Some(event) = observer.try_recv() {
//!     println!("{:?}", event);
//! }
//! ```

mod local;
mod query;

pub use local::{CollectionEvent, CollectionOptions, LocalCollection};
pub use query::{QueryEvent, QueryObserver, ReactiveQuery};
