//! Keyed document store for a single collection.

use crate::events::{EventHub, EventStream, ListenerId, DEFAULT_EVENT_BUFFER};
use crate::paths::{deep_merge, expand_paths};
use crate::selector::Selector;
use crate::types::{ChangeSet, Document, DocumentId, ID_FIELD};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::query::ReactiveQuery;

/// Per-collection behaviour.
#[derive(Clone, Debug, Default)]
pub struct CollectionOptions {
    /// Stay silent when a `removed` names a document we do not hold.
    ///
    /// Useful when documents are deleted locally ahead of the provider's
    /// confirmation. When false such removals are logged as warnings; they
    /// are never errors.
    pub suppress_removal_warnings: bool,
}

/// Mutations emitted by a collection. Payloads are copies; nothing received
/// here aliases the collection's own state.
#[derive(Clone, Debug, PartialEq)]
pub enum CollectionEvent {
    /// A document was added or replaced wholesale.
    Added(Document),
    /// A document was updated. `changes` lists what was set or cleared.
    Changed { document: Document, changes: ChangeSet },
    /// A document was removed; carries its last state.
    Removed(Document),
    /// Every document was dropped ahead of a resynchronization.
    Cleared,
}

struct CollectionInner {
    name: String,
    docs: RwLock<HashMap<DocumentId, Document>>,
    options: CollectionOptions,
    events: EventHub<CollectionEvent>,
}

/// A collection of documents mirrored from the provider.
///
/// Cloning yields another handle to the same collection.
#[derive(Clone)]
pub struct LocalCollection {
    inner: Arc<CollectionInner>,
}

impl LocalCollection {
    pub fn new(name: impl Into<String>, options: CollectionOptions) -> Self {
        Self::with_buffer_size(name, options, DEFAULT_EVENT_BUFFER)
    }

    pub fn with_buffer_size(
        name: impl Into<String>,
        options: CollectionOptions,
        buffer_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                name: name.into(),
                docs: RwLock::new(HashMap::new()),
                options,
                events: EventHub::new(buffer_size),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> &CollectionOptions {
        &self.inner.options
    }

    /// Whether both handles point at the same collection.
    pub fn ptr_eq(&self, other: &LocalCollection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // --- Delta application ---

    /// Add the document `id` with `fields`, replacing any existing document
    /// with that id.
    pub fn apply_added(&self, id: &str, fields: Document) {
        let mut doc = fields;
        doc.insert(ID_FIELD.to_string(), Value::from(id));

        let snapshot = doc.clone();
        self.inner.docs.write().insert(id.to_string(), doc);

        tracing::trace!(collection = %self.inner.name, document_id = id, "added");
        self.inner.events.emit(CollectionEvent::Added(snapshot));
    }

    /// Merge `fields` (dotted paths allowed) into document `id`, then drop
    /// the top-level keys named in `cleared`.
    ///
    /// An unknown id is treated as an add onto an empty document.
    pub fn apply_changed(&self, id: &str, fields: &Document, cleared: &[String]) {
        let expanded = expand_paths(fields).into_owned();

        let snapshot = {
            let mut docs = self.inner.docs.write();
            let doc = docs.entry(id.to_string()).or_insert_with(|| {
                tracing::debug!(
                    collection = %self.inner.name,
                    document_id = id,
                    "changed unknown document, starting from empty"
                );
                let mut empty = Document::new();
                empty.insert(ID_FIELD.to_string(), Value::from(id));
                empty
            });

            deep_merge(doc, expanded.clone());
            for path in cleared {
                doc.remove(path);
            }
            doc.clone()
        };

        let mut changes = ChangeSet::from_fields(expanded);
        for path in cleared {
            changes.clear_path(path);
        }

        tracing::trace!(collection = %self.inner.name, document_id = id, "changed");
        self.inner.events.emit(CollectionEvent::Changed {
            document: snapshot,
            changes,
        });
    }

    /// Remove document `id`. A missing document is a no-op.
    pub fn apply_removed(&self, id: &str) -> Option<Document> {
        let removed = self.inner.docs.write().remove(id);

        match removed {
            Some(doc) => {
                tracing::trace!(collection = %self.inner.name, document_id = id, "removed");
                self.inner.events.emit(CollectionEvent::Removed(doc.clone()));
                Some(doc)
            }
            None => {
                if !self.inner.options.suppress_removal_warnings {
                    tracing::warn!(
                        collection = %self.inner.name,
                        document_id = id,
                        "removed a document that is not in the collection"
                    );
                }
                None
            }
        }
    }

    /// Drop every document and emit [`CollectionEvent::Cleared`].
    pub fn clear(&self) {
        let dropped = {
            let mut docs = self.inner.docs.write();
            let count = docs.len();
            docs.clear();
            count
        };

        tracing::debug!(collection = %self.inner.name, dropped, "cleared");
        self.inner.events.emit(CollectionEvent::Cleared);
    }

    // --- Queries ---

    /// A live view of the documents matching `selector`.
    pub fn find(&self, selector: Selector) -> ReactiveQuery {
        ReactiveQuery::new(self.clone(), selector)
    }

    /// Snapshot of every document, in no particular order.
    pub fn list(&self) -> Vec<Document> {
        self.inner.docs.read().values().cloned().collect()
    }

    /// Copy of a single document.
    pub fn get(&self, id: &str) -> Option<Document> {
        self.inner.docs.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.docs.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.docs.read().is_empty()
    }

    /// Copies of the documents matching `selector`, scanning every document.
    pub(crate) fn scan(&self, selector: &Selector) -> Vec<Document> {
        self.inner
            .docs
            .read()
            .values()
            .filter(|doc| selector.matches(doc))
            .cloned()
            .collect()
    }

    // --- Events ---

    /// Register for this collection's events.
    pub fn listen(&self) -> EventStream<CollectionEvent> {
        self.inner.events.listen()
    }

    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.inner.events.unlisten(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.events.listener_count()
    }
}

impl fmt::Debug for LocalCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCollection")
            .field("name", &self.inner.name)
            .field("documents", &self.len())
            .finish()
    }
}
