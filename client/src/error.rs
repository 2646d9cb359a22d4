use std::fmt;

use shared::credentials::CredentialError;
use shared::{DueDateError, ValidationError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("listener failed: {0}")]
    Listener(String),
    #[error("malformed store response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("notification permission not granted")]
    PermissionDenied,
    #[error("notification scheduler failed: {0}")]
    Platform(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("no user is signed in")]
    NotSignedIn,
    #[error("invalid email or password")]
    InvalidCredential,
    #[error("wrong current password")]
    WrongPassword,
    #[error("email already in use")]
    EmailInUse,
    #[error("invalid email")]
    InvalidEmail,
    #[error("password is too weak")]
    WeakPassword,
    #[error("operation requires a recent sign-in")]
    RequiresRecentLogin,
    #[error("identity provider error: {0}")]
    Provider(String),
}

impl AuthError {
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Credentials(err) => capitalize(&err.to_string()),
            AuthError::NotSignedIn => "No user is signed in.".into(),
            AuthError::InvalidCredential => "Invalid email or password.".into(),
            AuthError::WrongPassword => "Current password is incorrect.".into(),
            AuthError::EmailInUse => "This email is already in use.".into(),
            AuthError::InvalidEmail => "Invalid email address.".into(),
            AuthError::WeakPassword => "Password is too weak.".into(),
            AuthError::RequiresRecentLogin => {
                "For security, sign in again before making this change.".into()
            }
            AuthError::Provider(_) => "Something went wrong. Try again.".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Create,
    Toggle,
    Update,
    Delete,
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mutation::Create => "create",
            Mutation::Toggle => "toggle",
            Mutation::Update => "update",
            Mutation::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("not signed in")]
    NotAuthenticated,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{op} failed: {source}")]
    Write {
        op: Mutation,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// The user can fix it by correcting the input.
    Attention,
    Error,
}

/// What the UI shows when an operation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl TaskError {
    pub fn notice(&self) -> Notice {
        match self {
            TaskError::NotAuthenticated => Notice {
                level: NoticeLevel::Error,
                message: "You are not signed in.".into(),
            },
            TaskError::Validation(err) => Notice {
                level: NoticeLevel::Attention,
                message: validation_message(err),
            },
            TaskError::Write { op, .. } => Notice {
                level: NoticeLevel::Error,
                message: match op {
                    Mutation::Create => "Could not save the task.",
                    Mutation::Toggle | Mutation::Update => "Could not save the changes.",
                    Mutation::Delete => "Could not delete the task.",
                }
                .into(),
            },
        }
    }
}

fn validation_message(err: &ValidationError) -> String {
    match err {
        ValidationError::EmptyTitle => "Fill in the title.".into(),
        ValidationError::EmptyDescription => "Fill in the title and description.".into(),
        ValidationError::MissingDueDate => "Fill in the due date (e.g. 2025-09-10 14:00).".into(),
        ValidationError::DueDate(DueDateError::NonexistentLocalTime { .. }) => {
            "That time does not exist on this date in your time zone.".into()
        }
        ValidationError::DueDate(_) => {
            "Invalid date. Use the format YYYY-MM-DD HH:mm (e.g. 2025-09-10 14:00).".into()
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => format!("{}{}.", first.to_uppercase(), chars.as_str()),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failures_are_attention_notices() {
        let notice = TaskError::from(ValidationError::EmptyTitle).notice();
        assert_eq!(notice.level, NoticeLevel::Attention);

        let notice = TaskError::from(ValidationError::DueDate(DueDateError::Invalid {
            input: "x".into(),
        }))
        .notice();
        assert!(notice.message.contains("YYYY-MM-DD HH:mm"));
    }

    #[test]
    fn write_failures_are_generic_errors() {
        let err = TaskError::Write {
            op: Mutation::Delete,
            source: StoreError::Unavailable("offline".into()),
        };
        assert_eq!(err.notice().level, NoticeLevel::Error);
        assert_eq!(err.notice().message, "Could not delete the task.");
        assert_eq!(err.to_string(), "delete failed: store unavailable: offline");
    }

    #[test]
    fn credential_errors_read_as_sentences() {
        let err = AuthError::from(CredentialError::PasswordMismatch);
        assert_eq!(err.user_message(), "Passwords do not match.");
    }
}
