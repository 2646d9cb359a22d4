use std::sync::Arc;

use async_trait::async_trait;
use shared::credentials::{PasswordChange, PasswordReset, SignIn, SignUp};
use shared::UserId;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInMethod {
    Password,
    Google,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: UserId,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub methods: Vec<SignInMethod>,
}

impl AuthUser {
    pub fn has_password_login(&self) -> bool {
        self.methods.contains(&SignInMethod::Password)
    }
}

/// The hosted identity service. Session persistence and token refresh live
/// behind this trait.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;

    /// Yields the signed-in user (or `None`) whenever the session changes.
    fn watch(&self) -> watch::Receiver<Option<AuthUser>>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    async fn sign_in_with_google(&self, id_token: &str) -> Result<AuthUser, AuthError>;

    async fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;

    async fn reauthenticate(&self, password: &str) -> Result<(), AuthError>;

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError>;

    async fn delete_current_user(&self) -> Result<(), AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// The signed-in session, passed explicitly to everything that needs the
/// current user. Read-only for task code: only the identity provider changes
/// who is signed in.
#[derive(Clone)]
pub struct Session {
    provider: Arc<dyn IdentityProvider>,
}

impl Session {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.provider.current_user()
    }

    pub fn uid(&self) -> Option<UserId> {
        self.provider.current_user().map(|user| user.uid)
    }

    pub fn changes(&self) -> watch::Receiver<Option<AuthUser>> {
        self.provider.watch()
    }

    pub async fn sign_in(&self, form: &SignIn) -> Result<AuthUser, AuthError> {
        form.validate()?;
        let user = self
            .provider
            .sign_in_with_password(form.email.trim(), &form.password)
            .await
            .inspect_err(|err| warn!(error = %err, "sign-in failed"))?;
        info!(uid = %user.uid, "signed in");
        Ok(user)
    }

    pub async fn sign_in_with_google(&self, id_token: &str) -> Result<AuthUser, AuthError> {
        let user = self
            .provider
            .sign_in_with_google(id_token)
            .await
            .inspect_err(|err| warn!(error = %err, "google sign-in failed"))?;
        info!(uid = %user.uid, "signed in with google");
        Ok(user)
    }

    pub async fn sign_up(&self, form: &SignUp) -> Result<AuthUser, AuthError> {
        form.validate()?;
        let user = self
            .provider
            .sign_up(form.name.trim(), form.email.trim(), &form.password)
            .await
            .inspect_err(|err| warn!(error = %err, "sign-up failed"))?;
        info!(uid = %user.uid, "account created");
        Ok(user)
    }

    pub async fn reset_password(&self, form: &PasswordReset) -> Result<(), AuthError> {
        form.validate()?;
        self.provider.send_password_reset(form.email.trim()).await?;
        info!("password reset email requested");
        Ok(())
    }

    /// Password accounts confirm the current password first.
    pub async fn change_password(&self, form: &PasswordChange) -> Result<(), AuthError> {
        let user = self.current_user().ok_or(AuthError::NotSignedIn)?;
        form.validate(user.has_password_login())?;
        if user.has_password_login() {
            self.provider.reauthenticate(&form.current).await?;
        }
        self.provider
            .update_password(&form.new)
            .await
            .inspect_err(|err| warn!(uid = %user.uid, error = %err, "password change failed"))?;
        info!(uid = %user.uid, "password changed");
        Ok(())
    }

    pub async fn delete_account(&self) -> Result<(), AuthError> {
        let user = self.current_user().ok_or(AuthError::NotSignedIn)?;
        self.provider.delete_current_user().await?;
        info!(uid = %user.uid, "account deleted");
        Ok(())
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.provider.sign_out().await?;
        info!("signed out");
        Ok(())
    }
}
