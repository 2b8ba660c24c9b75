//! Live views over a collection.

use crate::events::{EventStream, ListenerId};
use crate::selector::Selector;
use crate::types::{document_id, ChangeSet, Document};
use std::collections::HashSet;

use super::local::{CollectionEvent, LocalCollection};

/// A selector bound to a collection.
///
/// Holds no cached results: [`fetch`](Self::fetch) scans the collection at
/// call time, so the view always reflects every delta applied so far.
#[derive(Clone, Debug)]
pub struct ReactiveQuery {
    collection: LocalCollection,
    selector: Selector,
}

impl ReactiveQuery {
    pub fn new(collection: LocalCollection, selector: Selector) -> Self {
        Self {
            collection,
            selector,
        }
    }

    pub fn collection(&self) -> &LocalCollection {
        &self.collection
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Copies of the matching documents.
    pub fn fetch(&self) -> Vec<Document> {
        self.collection.scan(&self.selector)
    }

    pub fn count(&self) -> usize {
        self.fetch().len()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.selector.matches(doc)
    }

    /// Follow the view as the collection changes.
    ///
    /// Documents entering the view surface as `Added`, documents leaving it
    /// as `Removed`, whichever collection event moved them.
    pub fn observe(&self) -> QueryObserver {
        let stream = self.collection.listen();
        let members = self
            .fetch()
            .iter()
            .filter_map(|doc| document_id(doc).map(str::to_string))
            .collect();

        QueryObserver {
            query: self.clone(),
            stream,
            members,
        }
    }
}

/// Changes to the result set of a [`ReactiveQuery`].
#[derive(Clone, Debug, PartialEq)]
pub enum QueryEvent {
    Added(Document),
    Changed { document: Document, changes: ChangeSet },
    Removed(Document),
    Cleared,
}

/// Receives the result-set changes of one [`ReactiveQuery`].
///
/// Detaches from the collection when dropped.
pub struct QueryObserver {
    query: ReactiveQuery,
    stream: EventStream<CollectionEvent>,
    members: HashSet<String>,
}

impl QueryObserver {
    pub fn id(&self) -> ListenerId {
        self.stream.id
    }

    /// The next change to the result set, if one is queued.
    pub fn try_recv(&mut self) -> Option<QueryEvent> {
        while let Ok(event) = self.stream.try_recv() {
            if let Some(change) = self.translate(event) {
                return Some(change);
            }
        }
        None
    }

    /// Every queued change to the result set.
    pub fn drain(&mut self) -> Vec<QueryEvent> {
        let mut out = Vec::new();
        while let Some(change) = self.try_recv() {
            out.push(change);
        }
        out
    }

    fn translate(&mut self, event: CollectionEvent) -> Option<QueryEvent> {
        match event {
            CollectionEvent::Added(document) => {
                let id = document_id(&document)?.to_string();
                if self.query.matches(&document) {
                    if self.members.insert(id) {
                        Some(QueryEvent::Added(document))
                    } else {
                        let changes = ChangeSet::from_fields(document.clone());
                        Some(QueryEvent::Changed { document, changes })
                    }
                } else if self.members.remove(&id) {
                    Some(QueryEvent::Removed(document))
                } else {
                    None
                }
            }
            CollectionEvent::Changed { document, changes } => {
                let id = document_id(&document)?.to_string();
                let was_member = self.members.contains(&id);
                match (was_member, self.query.matches(&document)) {
                    (true, true) => Some(QueryEvent::Changed { document, changes }),
                    (false, true) => {
                        self.members.insert(id);
                        Some(QueryEvent::Added(document))
                    }
                    (true, false) => {
                        self.members.remove(&id);
                        Some(QueryEvent::Removed(document))
                    }
                    (false, false) => None,
                }
            }
            CollectionEvent::Removed(document) => {
                let id = document_id(&document)?;
                self.members
                    .remove(id)
                    .then_some(QueryEvent::Removed(document))
            }
            CollectionEvent::Cleared => {
                self.members.clear();
                Some(QueryEvent::Cleared)
            }
        }
    }
}

impl Drop for QueryObserver {
    fn drop(&mut self) {
        self.query.collection.unlisten(self.stream.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionOptions;
    use crate::types::FieldChange;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn tasks() -> LocalCollection {
        let tasks = LocalCollection::new("tasks", CollectionOptions::default());
        tasks.apply_added("1", doc(json!({"done": false, "title": "a"})));
        tasks.apply_added("2", doc(json!({"done": true, "title": "b"})));
        tasks
    }

    #[test]
    fn test_fetch_reflects_later_deltas() {
        let tasks = tasks();
        let open = tasks.find(Selector::new().equals("done", false));
        assert_eq!(open.count(), 1);

        tasks.apply_added("3", doc(json!({"done": false})));
        assert_eq!(open.count(), 2);

        tasks.apply_changed("1", &doc(json!({"done": true})), &[]);
        tasks.apply_removed("3");
        assert_eq!(open.count(), 0);
    }

    #[test]
    fn test_observe_enter_and_leave() {
        let tasks = tasks();
        let open = tasks.find(Selector::new().equals("done", false));
        let mut observer = open.observe();

        tasks.apply_changed("2", &doc(json!({"done": false})), &[]);
        tasks.apply_changed("1", &doc(json!({"done": true})), &[]);
        tasks.apply_changed("2", &doc(json!({"title": "b2"})), &[]);
        tasks.apply_removed("1");

        let events = observer.drain();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], QueryEvent::Added(d) if d["_id"] == "2"));
        assert!(matches!(&events[1], QueryEvent::Removed(d) if d["_id"] == "1"));
        assert!(matches!(&events[2], QueryEvent::Changed { document, .. } if document["title"] == "b2"));
    }

    #[test]
    fn test_overwrite_of_member_is_a_change() {
        let tasks = tasks();
        let open = tasks.find(Selector::new().equals("done", false));
        let mut observer = open.observe();

        tasks.apply_added("1", doc(json!({"done": false, "title": "a2"})));

        let events = observer.drain();
        assert_eq!(events.len(), 1);
        let QueryEvent::Changed { document, changes } = &events[0] else {
            panic!("expected Changed, got {:?}", events[0]);
        };
        assert_eq!(document["title"], "a2");
        assert_eq!(changes.get("title"), Some(&FieldChange::Set(json!("a2"))));
    }

    #[test]
    fn test_observe_cleared() {
        let tasks = tasks();
        let mut observer = tasks.find(Selector::new()).observe();

        tasks.clear();
        tasks.apply_removed("1");

        assert_eq!(observer.drain(), vec![QueryEvent::Cleared]);
    }

    #[test]
    fn test_drop_detaches() {
        let tasks = tasks();
        let observer = tasks.find(Selector::new()).observe();
        assert_eq!(tasks.listener_count(), 1);

        drop(observer);
        assert_eq!(tasks.listener_count(), 0);
    }
}
