//! In-memory password backend for tests and demos.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use uuid::Uuid;

use bizay_core::{Email, PrincipalId};

use super::{AuthError, PasswordAuth, PasswordPrincipal, PasswordState};

/// Shortest password the hosted backend accepts.
pub const MIN_PASSWORD_LEN: usize = 6;

/// In-memory [`PasswordAuth`] implementation.
#[derive(Clone)]
pub struct InMemoryPasswordAuth {
    inner: Arc<Inner>,
}

struct Inner {
    state: watch::Sender<PasswordState>,
    accounts: Mutex<HashMap<String, Account>>,
    next_ids: Mutex<VecDeque<PrincipalId>>,
    unavailable: AtomicBool,
}

struct Account {
    id: PrincipalId,
    email: Email,
    password: SecretString,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for InMemoryPasswordAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPasswordAuth {
    /// A backend that has already reported "signed out".
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(PasswordState::SignedOut)
    }

    /// A backend that has not reported yet; see [`Self::settle`].
    #[must_use]
    pub fn pending() -> Self {
        Self::with_state(PasswordState::Pending)
    }

    fn with_state(initial: PasswordState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                state,
                accounts: Mutex::new(HashMap::new()),
                next_ids: Mutex::new(VecDeque::new()),
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// Report "signed out" if the backend is still pending.
    pub fn settle(&self) {
        self.inner.state.send_if_modified(|state| {
            if state.is_settled() {
                false
            } else {
                *state = PasswordState::SignedOut;
                true
            }
        });
    }

    /// Ids handed out to the next sign-ups, in order.
    pub fn assign_ids<I>(&self, ids: I)
    where
        I: IntoIterator<Item = PrincipalId>,
    {
        lock(&self.inner.next_ids).extend(ids);
    }

    /// Create an account without signing it in.
    pub fn register(&self, id: PrincipalId, email: Email, password: &str) {
        lock(&self.inner.accounts).insert(
            email_key(&email),
            Account {
                id,
                email,
                password: SecretString::from(password.to_owned()),
            },
        );
    }

    /// Make every call fail as if the backend could not be reached.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), AuthError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(AuthError::Unavailable("password backend unreachable".to_owned()));
        }
        Ok(())
    }

    fn signed_in(&self, id: &PrincipalId, email: &Email) {
        self.inner
            .state
            .send_replace(PasswordState::SignedIn(PasswordPrincipal {
                id: id.clone(),
                email: Some(email.clone()),
            }));
    }
}

fn email_key(email: &Email) -> String {
    email.as_str().to_lowercase()
}

#[async_trait]
impl PasswordAuth for InMemoryPasswordAuth {
    fn state(&self) -> watch::Receiver<PasswordState> {
        self.inner.state.subscribe()
    }

    async fn sign_up(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<PrincipalId, AuthError> {
        self.ensure_available()?;
        if password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword(format!(
                "Password should be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let id = {
            let mut accounts = lock(&self.inner.accounts);
            let key = email_key(email);
            if accounts.contains_key(&key) {
                return Err(AuthError::EmailAlreadyInUse);
            }
            let id = match lock(&self.inner.next_ids).pop_front() {
                Some(id) => id,
                None => PrincipalId::parse(&Uuid::new_v4().simple().to_string())
                    .map_err(|e| AuthError::Provider(e.to_string()))?,
            };
            accounts.insert(
                key,
                Account {
                    id: id.clone(),
                    email: email.clone(),
                    password: password.clone(),
                },
            );
            id
        };

        self.signed_in(&id, email);
        Ok(id)
    }

    async fn sign_in(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<PrincipalId, AuthError> {
        self.ensure_available()?;
        let (id, stored_email) = {
            let accounts = lock(&self.inner.accounts);
            let account = accounts
                .get(&email_key(email))
                .filter(|a| a.password.expose_secret() == password.expose_secret())
                .ok_or(AuthError::InvalidCredentials)?;
            (account.id.clone(), account.email.clone())
        };
        self.signed_in(&id, &stored_email);
        Ok(id)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.ensure_available()?;
        self.inner.state.send_replace(PasswordState::SignedOut);
        Ok(())
    }
}
