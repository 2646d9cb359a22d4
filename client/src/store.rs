//! Contract of the remote document store holding each user's tasks.

use std::fmt;

use async_trait::async_trait;
use shared::{fields, Fields, Snapshot, UserId};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::StoreError;

/// The `users/{uid}/tasks` collection of one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionRef {
    owner: UserId,
}

impl CollectionRef {
    pub fn tasks_of(owner: UserId) -> Self {
        Self { owner }
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn doc(&self, id: Uuid) -> DocumentRef {
        DocumentRef {
            collection: self.clone(),
            id,
        }
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "users/{}/tasks", self.owner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    collection: CollectionRef,
    id: Uuid,
}

impl DocumentRef {
    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    pub fn owner(&self) -> &UserId {
        self.collection.owner()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQuery {
    pub collection: CollectionRef,
    pub order_by: &'static str,
    pub direction: Direction,
}

impl TaskQuery {
    pub fn newest_first(collection: CollectionRef) -> Self {
        Self {
            collection,
            order_by: fields::CREATED_AT,
            direction: Direction::Descending,
        }
    }
}

pub type SnapshotEvent = Result<Snapshot, StoreError>;

/// Releases a live query. Dropping it has the same effect as calling
/// [`unsubscribe`](Self::unsubscribe).
pub struct ListenerRegistration {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerRegistration {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// A live query: ordered snapshot events plus the handle that ends them.
#[derive(Debug)]
pub struct Listener {
    pub events: mpsc::UnboundedReceiver<SnapshotEvent>,
    pub registration: ListenerRegistration,
}

/// Per-user document collections with live queries.
///
/// Implementations stamp `createdAt` on add and `updatedAt` on every add and
/// update. `ownerId` and `createdAt` are never changed by an update.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Adds a document and returns the id the store assigned to it.
    async fn add_document(&self, collection: &CollectionRef, fields: Fields) -> Result<Uuid, StoreError>;

    /// Merges `fields` into an existing document. Fails with
    /// [`StoreError::NotFound`] if the document does not exist.
    async fn update_document(&self, doc: &DocumentRef, fields: Fields) -> Result<(), StoreError>;

    /// Removes a document. Deleting a missing document succeeds.
    async fn delete_document(&self, doc: &DocumentRef) -> Result<(), StoreError>;

    /// Starts a live query. The first event is the current snapshot; every
    /// later change to the collection produces a complete new snapshot in
    /// query order. Events stop once the registration is released.
    fn listen(&self, query: &TaskQuery) -> Listener;
}
