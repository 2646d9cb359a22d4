use std::sync::Arc;

use shared::validate::toggle_fields;
use shared::{CreateTaskRequest, InputZone, Task, UpdateTaskRequest, UserId, ValidationRules};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Mutation, TaskError};
use crate::identity::Session;
use crate::notify::NotificationId;
use crate::reminder::ReminderScheduler;
use crate::store::{BackingStore, CollectionRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderOutcome {
    NotRequested,
    Scheduled(NotificationId),
    /// The task was saved; only its reminder is missing.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub id: Uuid,
    pub reminder: ReminderOutcome,
}

#[derive(Debug, Default)]
pub struct ClearReport {
    pub deleted: Vec<Uuid>,
    pub failed: Vec<(Uuid, TaskError)>,
}

/// Writes task changes to the store on behalf of the signed-in user.
///
/// Nothing here touches the list the UI shows: every effect comes back
/// through the synchronizer's next snapshot.
pub struct TaskGateway {
    store: Arc<dyn BackingStore>,
    reminders: Arc<ReminderScheduler>,
    session: Session,
    rules: ValidationRules,
    zone: InputZone,
}

impl TaskGateway {
    pub fn new(store: Arc<dyn BackingStore>, reminders: Arc<ReminderScheduler>, session: Session) -> Self {
        Self {
            store,
            reminders,
            session,
            rules: ValidationRules::default(),
            zone: InputZone::System,
        }
    }

    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_zone(mut self, zone: InputZone) -> Self {
        self.zone = zone;
        self
    }

    pub fn zone(&self) -> InputZone {
        self.zone
    }

    fn tasks(&self) -> Result<CollectionRef, TaskError> {
        self.session
            .uid()
            .map(CollectionRef::tasks_of)
            .ok_or(TaskError::NotAuthenticated)
    }

    pub async fn create(&self, request: &CreateTaskRequest) -> Result<Created, TaskError> {
        let tasks = self.tasks()?;
        let valid = request
            .validate(&self.rules, self.zone)
            .inspect_err(|err| warn!(error = %err, "task rejected"))?;

        let id = self
            .store
            .add_document(&tasks, valid.create_fields(tasks.owner()))
            .await
            .map_err(|source| write_failed(Mutation::Create, tasks.owner(), source))?;
        info!(owner = %tasks.owner(), %id, "task created");

        let reminder = match valid.due_date {
            None => ReminderOutcome::NotRequested,
            Some(due) => match self.reminders.schedule_reminder(&valid.title, due.instant()).await {
                Ok(notification) => ReminderOutcome::Scheduled(notification),
                Err(err) => {
                    warn!(%id, error = %err, "task saved without its reminder");
                    ReminderOutcome::Failed(err.to_string())
                }
            },
        };

        Ok(Created { id, reminder })
    }

    /// Flips `completed` relative to the state the UI is showing.
    pub async fn toggle_completed(&self, task: &Task) -> Result<(), TaskError> {
        let tasks = self.tasks()?;
        self.store
            .update_document(&tasks.doc(task.id), toggle_fields(task.completed))
            .await
            .map_err(|source| write_failed(Mutation::Toggle, tasks.owner(), source))?;
        info!(id = %task.id, completed = !task.completed, "task toggled");
        Ok(())
    }

    pub async fn update(&self, id: Uuid, request: &UpdateTaskRequest) -> Result<(), TaskError> {
        let tasks = self.tasks()?;
        let valid = request
            .validate(&self.rules, self.zone)
            .inspect_err(|err| warn!(%id, error = %err, "edit rejected"))?;

        self.store
            .update_document(&tasks.doc(id), valid.update_fields())
            .await
            .map_err(|source| write_failed(Mutation::Update, tasks.owner(), source))?;
        info!(%id, "task updated");
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), TaskError> {
        let tasks = self.tasks()?;
        self.store
            .delete_document(&tasks.doc(id))
            .await
            .map_err(|source| write_failed(Mutation::Delete, tasks.owner(), source))?;
        info!(%id, "task deleted");
        Ok(())
    }

    /// Deletes every completed task in `tasks`, one write each. Failures
    /// are collected rather than stopping the sweep.
    pub async fn clear_completed(&self, tasks: &[Task]) -> ClearReport {
        let mut report = ClearReport::default();
        for task in tasks.iter().filter(|task| task.completed) {
            match self.delete(task.id).await {
                Ok(()) => report.deleted.push(task.id),
                Err(err) => report.failed.push((task.id, err)),
            }
        }
        report
    }
}

fn write_failed(op: Mutation, owner: &UserId, source: crate::error::StoreError) -> TaskError {
    error!(%owner, %op, error = %source, "task write failed");
    TaskError::Write { op, source }
}
