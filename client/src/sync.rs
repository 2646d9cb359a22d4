use std::sync::Arc;

use parking_lot::Mutex;
use shared::{Task, UserId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::{BackingStore, CollectionRef, ListenerRegistration, SnapshotEvent, TaskQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPhase {
    NotSubscribed,
    /// Subscribed, first snapshot not yet received.
    Loading,
    Ready,
}

/// What the task list screen renders. Replaced wholesale on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskListView {
    pub phase: ListPhase,
    pub owner: Option<UserId>,
    pub tasks: Arc<Vec<Task>>,
    /// Set when the live query failed; `tasks` is then empty.
    pub error: Option<String>,
}

impl TaskListView {
    fn not_subscribed() -> Self {
        Self {
            phase: ListPhase::NotSubscribed,
            owner: None,
            tasks: Arc::default(),
            error: None,
        }
    }

    fn loading(owner: UserId) -> Self {
        Self {
            phase: ListPhase::Loading,
            owner: Some(owner),
            tasks: Arc::default(),
            error: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.phase == ListPhase::Loading
    }

    pub fn pending(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|task| !task.completed)
    }

    pub fn completed(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|task| task.completed)
    }
}

struct Active {
    owner: UserId,
    registration: ListenerRegistration,
    pump: JoinHandle<()>,
}

struct Shared {
    /// Bumped on every subscribe/unsubscribe; pumps from an older generation
    /// drop whatever they still receive.
    generation: u64,
    active: Option<Active>,
    view: watch::Sender<TaskListView>,
}

/// Keeps one live query on the signed-in user's tasks and projects each
/// snapshot into a [`TaskListView`].
pub struct ListSynchronizer {
    store: Arc<dyn BackingStore>,
    shared: Arc<Mutex<Shared>>,
}

impl ListSynchronizer {
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        let (view, _) = watch::channel(TaskListView::not_subscribed());
        Self {
            store,
            shared: Arc::new(Mutex::new(Shared {
                generation: 0,
                active: None,
                view,
            })),
        }
    }

    pub fn watch(&self) -> watch::Receiver<TaskListView> {
        self.shared.lock().view.subscribe()
    }

    pub fn current(&self) -> TaskListView {
        self.shared.lock().view.borrow().clone()
    }

    pub fn owner(&self) -> Option<UserId> {
        self.shared
            .lock()
            .active
            .as_ref()
            .map(|active| active.owner.clone())
    }

    /// Starts following `owner`'s tasks, newest first. Subscribing again for
    /// the same owner is a no-op; a different owner replaces the previous
    /// subscription, which is released first.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self, owner: UserId) {
        let mut shared = self.shared.lock();
        if let Some(active) = &shared.active {
            if active.owner == owner {
                debug!(%owner, "already subscribed");
                return;
            }
        }
        release(&mut shared);

        shared.generation += 1;
        let generation = shared.generation;
        shared.view.send_replace(TaskListView::loading(owner.clone()));

        let query = TaskQuery::newest_first(CollectionRef::tasks_of(owner.clone()));
        let listener = self.store.listen(&query);
        let pump = tokio::spawn(pump(
            Arc::clone(&self.shared),
            generation,
            owner.clone(),
            listener.events,
        ));

        info!(%owner, generation, "subscribed to task list");
        shared.active = Some(Active {
            owner,
            registration: listener.registration,
            pump,
        });
    }

    /// Stops the live query. Valid in any state; once this returns the view
    /// is `NotSubscribed` and no further snapshot reaches it.
    pub fn unsubscribe(&self) {
        let mut shared = self.shared.lock();
        let was_active = release(&mut shared);
        shared.generation += 1;
        shared.view.send_replace(TaskListView::not_subscribed());
        if was_active {
            info!("unsubscribed from task list");
        }
    }
}

impl Drop for ListSynchronizer {
    fn drop(&mut self) {
        let mut shared = self.shared.lock();
        release(&mut shared);
        shared.generation += 1;
    }
}

fn release(shared: &mut Shared) -> bool {
    match shared.active.take() {
        Some(active) => {
            active.registration.unsubscribe();
            active.pump.abort();
            true
        }
        None => false,
    }
}

async fn pump(
    shared: Arc<Mutex<Shared>>,
    generation: u64,
    owner: UserId,
    mut events: mpsc::UnboundedReceiver<SnapshotEvent>,
) {
    while let Some(event) = events.recv().await {
        if !deliver(&shared, generation, &owner, event) {
            break;
        }
    }
}

/// Publishes one event. Returns false once the subscription it belongs to
/// has been superseded.
fn deliver(shared: &Mutex<Shared>, generation: u64, owner: &UserId, event: SnapshotEvent) -> bool {
    let shared = shared.lock();
    if shared.generation != generation {
        return false;
    }

    let view = match event {
        Ok(snapshot) => {
            let tasks: Vec<Task> = snapshot
                .documents
                .iter()
                .map(|doc| Task::from_document(owner, doc))
                .collect();
            debug!(%owner, count = tasks.len(), "task list snapshot");
            TaskListView {
                phase: ListPhase::Ready,
                owner: Some(owner.clone()),
                tasks: Arc::new(tasks),
                error: None,
            }
        }
        Err(err) => {
            warn!(%owner, error = %err, "task list listener failed");
            TaskListView {
                phase: ListPhase::Ready,
                owner: Some(owner.clone()),
                tasks: Arc::default(),
                error: Some(err.to_string()),
            }
        }
    };
    shared.view.send_replace(view);
    true
}
