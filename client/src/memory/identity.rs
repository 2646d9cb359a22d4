use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::credentials::MIN_PASSWORD_LEN;
use shared::UserId;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::AuthError;
use crate::identity::{AuthUser, IdentityProvider, SignInMethod};

struct Account {
    user: AuthUser,
    password: Option<String>,
}

#[derive(Default)]
struct State {
    /// Keyed by lowercased email.
    accounts: HashMap<String, Account>,
    /// Google id token -> lowercased email.
    google_tokens: HashMap<String, String>,
    reset_requests: Vec<String>,
}

/// Identity provider with accounts held in memory.
pub struct InMemoryIdentity {
    state: Mutex<State>,
    current: watch::Sender<Option<AuthUser>>,
}

impl Default for InMemoryIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIdentity {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            state: Mutex::new(State::default()),
            current,
        }
    }

    /// Registers a password account without signing it in.
    pub fn add_account(&self, name: &str, email: &str, password: &str) -> AuthUser {
        let user = AuthUser {
            uid: UserId::new(Uuid::new_v4().to_string()),
            email: Some(email.to_string()),
            display_name: Some(name.to_string()),
            methods: vec![SignInMethod::Password],
        };
        self.state.lock().accounts.insert(
            email.to_lowercase(),
            Account {
                user: user.clone(),
                password: Some(password.to_string()),
            },
        );
        user
    }

    /// Registers a Google account reachable through `id_token`.
    pub fn add_google_account(&self, id_token: &str, email: &str) -> AuthUser {
        let user = AuthUser {
            uid: UserId::new(Uuid::new_v4().to_string()),
            email: Some(email.to_string()),
            display_name: None,
            methods: vec![SignInMethod::Google],
        };
        let key = email.to_lowercase();
        let mut state = self.state.lock();
        state.google_tokens.insert(id_token.to_string(), key.clone());
        state.accounts.insert(
            key,
            Account {
                user: user.clone(),
                password: None,
            },
        );
        user
    }

    pub fn reset_requests(&self) -> Vec<String> {
        self.state.lock().reset_requests.clone()
    }

    fn set_current(&self, user: Option<AuthUser>) {
        self.current.send_replace(user);
    }

    fn current_key(&self) -> Result<String, AuthError> {
        self.current
            .borrow()
            .as_ref()
            .and_then(|user| user.email.as_deref())
            .map(str::to_lowercase)
            .ok_or(AuthError::NotSignedIn)
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentity {
    fn current_user(&self) -> Option<AuthUser> {
        self.current.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<AuthUser>> {
        self.current.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let user = {
            let state = self.state.lock();
            let account = state
                .accounts
                .get(&email.to_lowercase())
                .ok_or(AuthError::InvalidCredential)?;
            if account.password.as_deref() != Some(password) {
                return Err(AuthError::InvalidCredential);
            }
            account.user.clone()
        };
        self.set_current(Some(user.clone()));
        Ok(user)
    }

    async fn sign_in_with_google(&self, id_token: &str) -> Result<AuthUser, AuthError> {
        let user = {
            let state = self.state.lock();
            state
                .google_tokens
                .get(id_token)
                .and_then(|key| state.accounts.get(key))
                .map(|account| account.user.clone())
                .ok_or(AuthError::InvalidCredential)?
        };
        self.set_current(Some(user.clone()));
        Ok(user)
    }

    async fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        if !email.contains('@') {
            return Err(AuthError::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        if self.state.lock().accounts.contains_key(&email.to_lowercase()) {
            return Err(AuthError::EmailInUse);
        }
        let user = self.add_account(name, email, password);
        self.set_current(Some(user.clone()));
        Ok(user)
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        if !email.contains('@') {
            return Err(AuthError::InvalidEmail);
        }
        self.state.lock().reset_requests.push(email.to_lowercase());
        Ok(())
    }

    async fn reauthenticate(&self, password: &str) -> Result<(), AuthError> {
        let key = self.current_key()?;
        let state = self.state.lock();
        match state.accounts.get(&key) {
            Some(account) if account.password.as_deref() == Some(password) => Ok(()),
            Some(_) => Err(AuthError::WrongPassword),
            None => Err(AuthError::NotSignedIn),
        }
    }

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        let key = self.current_key()?;
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        let mut state = self.state.lock();
        let account = state.accounts.get_mut(&key).ok_or(AuthError::NotSignedIn)?;
        account.password = Some(new_password.to_string());
        if !account.user.has_password_login() {
            account.user.methods.push(SignInMethod::Password);
        }
        Ok(())
    }

    async fn delete_current_user(&self) -> Result<(), AuthError> {
        let key = self.current_key()?;
        {
            let mut state = self.state.lock();
            state.accounts.remove(&key);
            state.google_tokens.retain(|_, email| email != &key);
        }
        self.set_current(None);
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.set_current(None);
        Ok(())
    }
}
