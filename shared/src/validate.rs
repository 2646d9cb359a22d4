use serde_json::Value;
use thiserror::Error;

use crate::document::{fields, Fields};
use crate::due_date::{self, DueDate, DueDateError, InputZone};
use crate::{CreateTaskRequest, UpdateTaskRequest, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("description must not be empty")]
    EmptyDescription,
    #[error("a due date is required")]
    MissingDueDate,
    #[error(transparent)]
    DueDate(#[from] DueDateError),
}

/// Which fields a task form must carry.
///
/// `require_description = false` is the checklist variant: items are just a
/// title and a checkbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRules {
    pub require_description: bool,
    pub require_due_date: bool,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            require_description: true,
            require_due_date: false,
        }
    }
}

impl ValidationRules {
    pub fn checklist() -> Self {
        Self {
            require_description: false,
            require_due_date: false,
        }
    }
}

/// Trimmed, checked task content ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidTask {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DueDate>,
}

impl ValidTask {
    fn check(
        title: &str,
        description: &str,
        due_date: &str,
        rules: &ValidationRules,
        zone: InputZone,
    ) -> Result<Self, ValidationError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }

        let description = description.trim();
        if rules.require_description && description.is_empty() {
            return Err(ValidationError::EmptyDescription);
        }

        let due_date = due_date::normalize_optional(due_date, zone)?;
        if rules.require_due_date && due_date.is_none() {
            return Err(ValidationError::MissingDueDate);
        }

        Ok(Self {
            title: title.to_string(),
            description: (!description.is_empty()).then(|| description.to_string()),
            due_date,
        })
    }

    /// Fields written when the task is first added. Timestamps are left to
    /// the store.
    pub fn create_fields(&self, owner: &UserId) -> Fields {
        let mut map = self.content_fields();
        map.insert(fields::OWNER_ID.into(), Value::String(owner.to_string()));
        map.insert(fields::COMPLETED.into(), Value::Bool(false));
        map
    }

    /// Fields replaced by an edit. An absent due date is written as `""`,
    /// clearing any previous value.
    pub fn update_fields(&self) -> Fields {
        self.content_fields()
    }

    fn content_fields(&self) -> Fields {
        let mut map = Fields::new();
        map.insert(fields::TITLE.into(), Value::String(self.title.clone()));
        if let Some(description) = &self.description {
            map.insert(fields::DESCRIPTION.into(), Value::String(description.clone()));
        }
        map.insert(
            fields::DUE_DATE.into(),
            Value::String(self.due_date.map(|due| due.to_string()).unwrap_or_default()),
        );
        map
    }
}

impl CreateTaskRequest {
    pub fn validate(&self, rules: &ValidationRules, zone: InputZone) -> Result<ValidTask, ValidationError> {
        ValidTask::check(&self.title, &self.description, &self.due_date, rules, zone)
    }
}

impl UpdateTaskRequest {
    /// Same rules as creation, except a blank due date is always allowed and
    /// clears the field.
    pub fn validate(&self, rules: &ValidationRules, zone: InputZone) -> Result<ValidTask, ValidationError> {
        let rules = ValidationRules {
            require_due_date: false,
            ..*rules
        };
        ValidTask::check(&self.title, &self.description, &self.due_date, &rules, zone)
    }
}

/// Fields for flipping the completed flag of a task currently shown as
/// `completed`.
pub fn toggle_fields(completed: bool) -> Fields {
    let mut map = Fields::new();
    map.insert(fields::COMPLETED.into(), Value::Bool(!completed));
    map
}
