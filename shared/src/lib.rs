use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod credentials;
pub mod document;
pub mod due_date;
pub mod validate;

pub use document::{fields, AddDocumentResponse, Document, Fields, Snapshot};
pub use due_date::{DueDate, DueDateError, InputZone};
pub use validate::{ValidTask, ValidationError, ValidationRules};

/// Identifier of an authenticated user, issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub owner_id: UserId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub completed: bool,
    #[serde(with = "due_date::field", default)]
    pub due_date: Option<DueDate>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Projects a stored document into a task. Missing or ill-typed fields
    /// fall back to defaults so one bad document never breaks a list.
    pub fn from_document(owner: &UserId, doc: &Document) -> Self {
        let timestamp = |name: &str| {
            doc.str_field(name)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };

        Self {
            id: doc.id,
            owner_id: owner.clone(),
            title: doc.str_field(fields::TITLE).unwrap_or_default().to_string(),
            description: doc.str_field(fields::DESCRIPTION).map(str::to_string),
            completed: doc.bool_field(fields::COMPLETED).unwrap_or(false),
            due_date: doc
                .str_field(fields::DUE_DATE)
                .and_then(DueDate::parse_canonical),
            created_at: timestamp(fields::CREATED_AT),
            updated_at: timestamp(fields::UPDATED_AT),
        }
    }
}

/// Raw form input for a new task. `due_date` is the text the user typed;
/// blank means no due date.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_date: String,
}

/// Raw edit-form input. A blank `due_date` clears the field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_date: String,
}

impl UpdateTaskRequest {
    /// Prefills an edit form from the current record.
    pub fn from_task(task: &Task, zone: InputZone) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone().unwrap_or_default(),
            due_date: task
                .due_date
                .map(|due| due.to_input(zone))
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(fields: serde_json::Value) -> Document {
        Document {
            id: Uuid::new_v4(),
            fields: fields.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn projects_a_complete_document() {
        let owner = UserId::from("u1");
        let d = doc(json!({
            "ownerId": "u1",
            "title": "Buy milk",
            "description": "2%",
            "completed": true,
            "dueDate": "2030-01-01T09:00:00.000Z",
            "createdAt": "2029-12-31T10:00:00.000Z",
            "updatedAt": "2029-12-31T11:00:00.000Z",
        }));

        let task = Task::from_document(&owner, &d);
        assert_eq!(task.id, d.id);
        assert_eq!(task.title, "Buy milk");
        assert_eq!(task.description.as_deref(), Some("2%"));
        assert!(task.completed);
        assert_eq!(
            task.due_date.map(|due| due.to_string()).as_deref(),
            Some("2030-01-01T09:00:00.000Z")
        );
        assert!(task.created_at.unwrap() < task.updated_at.unwrap());
    }

    #[test]
    fn tolerates_missing_and_mistyped_fields() {
        let task = Task::from_document(
            &UserId::from("u1"),
            &doc(json!({ "title": 7, "completed": "yes", "dueDate": "" })),
        );
        assert_eq!(task.title, "");
        assert_eq!(task.description, None);
        assert!(!task.completed);
        assert_eq!(task.due_date, None);
        assert_eq!(task.created_at, None);
    }

    #[test]
    fn edit_form_prefill_uses_input_format() {
        let task = Task::from_document(
            &UserId::from("u1"),
            &doc(json!({ "title": "Pay rent", "dueDate": "2030-01-01T09:00:00.000Z" })),
        );
        let form = UpdateTaskRequest::from_task(&task, InputZone::utc());
        assert_eq!(form.title, "Pay rent");
        assert_eq!(form.description, "");
        assert_eq!(form.due_date, "2030-01-01 09:00");
    }
}
