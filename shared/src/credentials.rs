//! Client-side checks run before any identity-provider call.

use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("name is required")]
    MissingName,
    #[error("email is required")]
    MissingEmail,
    #[error("password is required")]
    MissingPassword,
    #[error("password must have at least 6 characters")]
    PasswordTooShort,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("current password is required to confirm the change")]
    MissingCurrentPassword,
}

#[derive(Debug, Clone, Default)]
pub struct SignIn {
    pub email: String,
    pub password: String,
}

impl SignIn {
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.email.trim().is_empty() {
            return Err(CredentialError::MissingEmail);
        }
        if self.password.is_empty() {
            return Err(CredentialError::MissingPassword);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignUp {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirmation: String,
}

impl SignUp {
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.name.trim().is_empty() {
            return Err(CredentialError::MissingName);
        }
        if self.email.trim().is_empty() {
            return Err(CredentialError::MissingEmail);
        }
        check_new_password(&self.password, &self.confirmation)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PasswordChange {
    pub current: String,
    pub new: String,
    pub confirmation: String,
}

impl PasswordChange {
    /// `has_password_login` is whether the account signs in with a password;
    /// only those accounts must re-enter the current one.
    pub fn validate(&self, has_password_login: bool) -> Result<(), CredentialError> {
        check_new_password(&self.new, &self.confirmation)?;
        if has_password_login && self.current.is_empty() {
            return Err(CredentialError::MissingCurrentPassword);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PasswordReset {
    pub email: String,
}

impl PasswordReset {
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.email.trim().is_empty() {
            return Err(CredentialError::MissingEmail);
        }
        Ok(())
    }
}

fn check_new_password(password: &str, confirmation: &str) -> Result<(), CredentialError> {
    if password.is_empty() {
        return Err(CredentialError::MissingPassword);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CredentialError::PasswordTooShort);
    }
    if password != confirmation {
        return Err(CredentialError::PasswordMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_up_checks_in_form_order() {
        let mut form = SignUp::default();
        assert_eq!(form.validate(), Err(CredentialError::MissingName));
        form.name = "Ana".into();
        assert_eq!(form.validate(), Err(CredentialError::MissingEmail));
        form.email = "ana@example.com".into();
        assert_eq!(form.validate(), Err(CredentialError::MissingPassword));
        form.password = "12345".into();
        assert_eq!(form.validate(), Err(CredentialError::PasswordTooShort));
        form.password = "123456".into();
        assert_eq!(form.validate(), Err(CredentialError::PasswordMismatch));
        form.confirmation = "123456".into();
        assert_eq!(form.validate(), Ok(()));
    }

    #[test]
    fn current_password_only_needed_for_password_accounts() {
        let change = PasswordChange {
            current: String::new(),
            new: "secret1".into(),
            confirmation: "secret1".into(),
        };
        assert_eq!(change.validate(false), Ok(()));
        assert_eq!(change.validate(true), Err(CredentialError::MissingCurrentPassword));
    }

    #[test]
    fn sign_in_and_reset_need_an_email() {
        assert_eq!(SignIn::default().validate(), Err(CredentialError::MissingEmail));
        assert_eq!(
            SignIn {
                email: "a@b.c".into(),
                password: String::new()
            }
            .validate(),
            Err(CredentialError::MissingPassword)
        );
        assert_eq!(PasswordReset::default().validate(), Err(CredentialError::MissingEmail));
    }
}
