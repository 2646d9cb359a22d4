use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use shared::{fields, Document, Fields, Snapshot, UserId};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::StoreError;
use crate::reminder::{Clock, SystemClock};
use crate::store::{
    BackingStore, CollectionRef, Direction, DocumentRef, Listener, ListenerRegistration, TaskQuery,
};

struct Stored {
    seq: u64,
    created_at: DateTime<Utc>,
    doc: Document,
}

struct Slot {
    owner: UserId,
    direction: Direction,
    tx: mpsc::UnboundedSender<Result<Snapshot, StoreError>>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<UserId, Vec<Stored>>,
    listeners: HashMap<u64, Slot>,
    next_listener: u64,
    next_seq: u64,
    write_failure: Option<StoreError>,
    add_calls: usize,
    update_calls: usize,
    delete_calls: usize,
}

impl Inner {
    fn snapshot(&self, owner: &UserId, direction: Direction) -> Snapshot {
        let mut rows: Vec<&Stored> = self
            .collections
            .get(owner)
            .map(|docs| docs.iter().collect())
            .unwrap_or_default();
        rows.sort_by_key(|row| (row.created_at, row.seq));
        if direction == Direction::Descending {
            rows.reverse();
        }
        Snapshot {
            documents: rows.into_iter().map(|row| row.doc.clone()).collect(),
        }
    }

    /// Pushes a fresh snapshot to every listener on `owner`'s collection.
    /// Runs under the store lock, so listeners see changes in commit order.
    fn publish(&mut self, owner: &UserId) {
        let mut closed = Vec::new();
        for (id, slot) in &self.listeners {
            if &slot.owner != owner {
                continue;
            }
            if slot.tx.send(Ok(self.snapshot(owner, slot.direction))).is_err() {
                closed.push(*id);
            }
        }
        for id in closed {
            self.listeners.remove(&id);
        }
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        match &self.write_failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// A [`BackingStore`] kept entirely in memory.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Makes every following write fail with `err` until cleared with `None`.
    pub fn set_write_failure(&self, err: Option<StoreError>) {
        self.inner.lock().write_failure = err;
    }

    /// Delivers `err` to every live query on `owner`'s collection.
    pub fn fail_listeners(&self, owner: &UserId, err: StoreError) {
        let inner = self.inner.lock();
        for slot in inner.listeners.values().filter(|slot| &slot.owner == owner) {
            let _ = slot.tx.send(Err(err.clone()));
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn add_calls(&self) -> usize {
        self.inner.lock().add_calls
    }

    pub fn update_calls(&self) -> usize {
        self.inner.lock().update_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.inner.lock().delete_calls
    }

    /// Current documents of `owner`, newest first.
    pub fn documents(&self, owner: &UserId) -> Vec<Document> {
        self.inner.lock().snapshot(owner, Direction::Descending).documents
    }

    fn stamp(&self) -> (DateTime<Utc>, Value) {
        let now = self.clock.now();
        (now, Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)))
    }
}

#[async_trait]
impl BackingStore for InMemoryStore {
    async fn add_document(&self, collection: &CollectionRef, mut data: Fields) -> Result<Uuid, StoreError> {
        let (now, stamp) = self.stamp();
        let mut inner = self.inner.lock();
        inner.add_calls += 1;
        inner.check_writable()?;

        let id = Uuid::new_v4();
        data.insert(fields::CREATED_AT.into(), stamp.clone());
        data.insert(fields::UPDATED_AT.into(), stamp);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let owner = collection.owner().clone();
        inner.collections.entry(owner.clone()).or_default().push(Stored {
            seq,
            created_at: now,
            doc: Document { id, fields: data },
        });
        inner.publish(&owner);
        Ok(id)
    }

    async fn update_document(&self, doc: &DocumentRef, changes: Fields) -> Result<(), StoreError> {
        let (_, stamp) = self.stamp();
        let mut inner = self.inner.lock();
        inner.update_calls += 1;
        inner.check_writable()?;

        let stored = inner
            .collections
            .get_mut(doc.owner())
            .and_then(|docs| docs.iter_mut().find(|row| row.doc.id == doc.id()))
            .ok_or_else(|| StoreError::NotFound(doc.to_string()))?;

        for (key, value) in changes {
            if key == fields::OWNER_ID || key == fields::CREATED_AT {
                continue;
            }
            stored.doc.fields.insert(key, value);
        }
        stored.doc.fields.insert(fields::UPDATED_AT.into(), stamp);

        inner.publish(doc.owner());
        Ok(())
    }

    async fn delete_document(&self, doc: &DocumentRef) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.delete_calls += 1;
        inner.check_writable()?;

        let removed = match inner.collections.get_mut(doc.owner()) {
            Some(docs) => {
                let before = docs.len();
                docs.retain(|row| row.doc.id != doc.id());
                docs.len() != before
            }
            None => false,
        };
        if removed {
            inner.publish(doc.owner());
        }
        Ok(())
    }

    fn listen(&self, query: &TaskQuery) -> Listener {
        let (tx, events) = mpsc::unbounded_channel();
        let owner = query.collection.owner().clone();

        let mut inner = self.inner.lock();
        let id = inner.next_listener;
        inner.next_listener += 1;
        let _ = tx.send(Ok(inner.snapshot(&owner, query.direction)));
        inner.listeners.insert(
            id,
            Slot {
                owner,
                direction: query.direction,
                tx,
            },
        );

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let registration = ListenerRegistration::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().listeners.remove(&id);
            }
        });

        Listener { events, registration }
    }
}
