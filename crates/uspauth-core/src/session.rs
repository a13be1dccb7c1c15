//! Public session facade.
//!
//! `AuthSession` is the only type UI and adapter layers talk to. It is a
//! cheap handle (`Clone`) over a shared `SessionCore` that owns the state
//! machine, the capability objects and the per-session store lock.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::clock::{Clock, ClockGuard, SystemClock};
use crate::config::AuthConfig;
use crate::coordinator::RefreshCoordinator;
use crate::credential::{Credential, SessionId};
use crate::error::AuthError;
use crate::network::{AuthInput, NetworkAdapter, TokenStatus};
use crate::state::{SessionSnapshot, SessionState, SessionStateMachine};
use crate::store::CredentialStore;
use crate::user::UserProfile;
use crate::validator::{Classification, RefreshPolicy, TokenValidator};

/// Shared state behind every `AuthSession` handle.
pub(crate) struct SessionCore {
    pub(crate) id: SessionId,
    pub(crate) network: Arc<dyn NetworkAdapter>,
    store: Arc<dyn CredentialStore>,
    machine: Mutex<SessionStateMachine>,
    validator: TokenValidator,
    clock: ClockGuard,
    /// Serializes store writes and deletes for this session id
    store_lock: tokio::sync::Mutex<()>,
}

impl SessionCore {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionStateMachine> {
        self.machine.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    pub(crate) fn now(&self) -> Result<DateTime<Utc>, AuthError> {
        self.clock.now()
    }

    pub(crate) fn classify(&self, credential: &Credential, now: DateTime<Utc>) -> Classification {
        self.validator.classify(credential, now)
    }

    /// Apply a refresh result. Runs on the detached refresh task.
    pub(crate) async fn finish_refresh(
        &self,
        epoch: u64,
        result: Result<Credential, AuthError>,
    ) -> Result<Credential, AuthError> {
        let _store = self.store_lock.lock().await;

        match result {
            Ok(credential) => {
                if !self.lock().is_current(epoch, SessionState::Refreshing) {
                    debug!(session_id = %self.id, "Discarding refresh for superseded session");
                    return Err(AuthError::NotAuthenticated);
                }

                let credential = self.lock().inherit_user(credential);
                let persisted = self
                    .store
                    .save(&self.id, &credential)
                    .await
                    .map_err(AuthError::from);
                if let Err(ref e) = persisted {
                    warn!(session_id = %self.id, error = %e, "Failed to persist refreshed credential");
                }

                let installed = self
                    .lock()
                    .refresh_succeeded(epoch, credential, persisted.clone())?;
                info!(
                    session_id = %self.id,
                    expires_at = %installed.expires_at(),
                    "Credential refreshed"
                );
                persisted.map(|()| (*installed).clone())
            }
            Err(error) => {
                let erased = self.lock().refresh_failed(epoch, error.clone())?;
                warn!(session_id = %self.id, error = %error, "Credential refresh failed");
                if erased.is_some() {
                    if let Err(e) = self.store.delete(&self.id).await {
                        warn!(session_id = %self.id, error = %e, "Failed to delete revoked credential");
                    }
                }
                Err(error)
            }
        }
    }

    async fn finish_authentication(
        &self,
        epoch: u64,
        result: Result<Credential, AuthError>,
    ) -> Result<Credential, AuthError> {
        let _store = self.store_lock.lock().await;

        match result {
            Ok(credential) => {
                if !self.lock().is_current(epoch, SessionState::Authenticating) {
                    debug!(session_id = %self.id, "Discarding login for superseded session");
                    return Err(AuthError::NotAuthenticated);
                }

                if let Err(e) = self.store.save(&self.id, &credential).await {
                    let error = AuthError::from(e);
                    warn!(session_id = %self.id, error = %error, "Failed to persist credential");
                    self.lock().authentication_aborted(epoch, error.clone())?;
                    return Err(error);
                }

                let installed = self.lock().authentication_succeeded(epoch, credential)?;
                info!(
                    session_id = %self.id,
                    expires_at = %installed.expires_at(),
                    "Login successful"
                );
                Ok((*installed).clone())
            }
            Err(error) => {
                let erased = self.lock().authentication_failed(epoch, error.clone())?;
                warn!(session_id = %self.id, error = %error, "Login failed");
                if erased.is_some() {
                    if let Err(e) = self.store.delete(&self.id).await {
                        warn!(session_id = %self.id, error = %e, "Failed to delete rejected credential");
                    }
                }
                Err(error)
            }
        }
    }

    /// Retry a store write that failed after a refresh.
    async fn flush_pending_write(&self) -> Result<(), AuthError> {
        let _store = self.store_lock.lock().await;

        let (epoch, credential) = {
            let machine = self.lock();
            if !machine.snapshot().pending_write {
                return Ok(());
            }
            (machine.epoch(), machine.credential().cloned())
        };

        if let Some(credential) = credential {
            self.store.save(&self.id, &credential).await?;
            debug!(session_id = %self.id, "Pending credential write flushed");
        }
        self.lock().write_completed(epoch);
        Ok(())
    }

    /// Drop the session locally after the authority reported `access_token`
    /// inactive. No-op if the credential was replaced meanwhile.
    async fn forget_inactive(&self, access_token: &str) -> Result<(), AuthError> {
        let _store = self.store_lock.lock().await;
        {
            let mut machine = self.lock();
            if machine.credential().map(|c| c.access_token()) != Some(access_token) {
                return Ok(());
            }
            machine.revoke();
        }
        warn!(session_id = %self.id, "Token no longer active on the server, session revoked");
        self.store.delete(&self.id).await?;
        Ok(())
    }

    async fn erase(&self, erased: Option<Arc<Credential>>) -> Result<(), AuthError> {
        let deleted = {
            let _store = self.store_lock.lock().await;
            self.store.delete(&self.id).await
        };
        if let Err(ref e) = deleted {
            warn!(session_id = %self.id, error = %e, "Failed to delete stored credential");
        }

        if let Some(credential) = erased {
            let remote = AssertUnwindSafe(self.network.revoke(credential.revocation_token()))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(AuthError::transient("revoke adapter panicked")));
            if let Err(e) = remote {
                warn!(session_id = %self.id, error = %e, "Remote revocation failed");
            }
        }

        deleted.map_err(AuthError::from)
    }
}

/// Run `future` on a detached task so dropping the caller cannot strand the
/// session mid-transition.
async fn detached<T, F>(future: F) -> Result<T, AuthError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, AuthError>> + Send + 'static,
{
    tokio::spawn(future)
        .await
        .unwrap_or_else(|e| Err(AuthError::transient(format!("session task failed: {}", e))))
}

/// Handle to one logical user session.
#[derive(Clone)]
pub struct AuthSession {
    core: Arc<SessionCore>,
    coordinator: Arc<RefreshCoordinator>,
}

impl AuthSession {
    pub fn builder(
        store: Arc<dyn CredentialStore>,
        network: Arc<dyn NetworkAdapter>,
    ) -> AuthSessionBuilder {
        AuthSessionBuilder::new(store, network)
    }

    pub fn id(&self) -> &SessionId {
        &self.core.id
    }

    pub fn state(&self) -> SessionState {
        self.core.lock().state()
    }

    pub fn last_error(&self) -> Option<AuthError> {
        self.core.lock().last_error().cloned()
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub(crate) fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    /// Holding a credential that has not expired. Stays true while that
    /// credential is being refreshed or replaced by a new login.
    pub fn is_logged_in(&self) -> bool {
        self.logged_in_credential().is_some()
    }

    /// Profile of the logged-in user, if the authority supplied one.
    pub fn current_user(&self) -> Option<UserProfile> {
        self.logged_in_credential()?.user().cloned()
    }

    fn logged_in_credential(&self) -> Option<Arc<Credential>> {
        let now = self.core.now().ok()?;
        let snapshot = self.core.snapshot();
        match (snapshot.state, snapshot.credential) {
            (
                SessionState::Authenticated | SessionState::Refreshing | SessionState::Authenticating,
                Some(credential),
            ) if self.core.classify(&credential, now).is_usable() => Some(credential),
            _ => None,
        }
    }

    /// A usable credential, refreshing first when it is expiring or expired.
    pub async fn current_credential(&self) -> Result<Credential, AuthError> {
        let credential = self.coordinator.fresh_credential(&self.core).await?;
        if self.core.snapshot().pending_write {
            self.core.flush_pending_write().await?;
        }
        Ok(credential)
    }

    /// Log in through the network adapter and persist the result.
    pub async fn authenticate(&self, input: AuthInput) -> Result<Credential, AuthError> {
        let epoch = self.core.lock().begin_authentication()?;
        debug!(session_id = %self.core.id, ?input, "Authenticating");

        let core = Arc::clone(&self.core);
        detached(async move {
            let result = AssertUnwindSafe(core.network.authenticate(input))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(AuthError::transient("authenticate adapter panicked")));
            core.finish_authentication(epoch, result).await
        })
        .await
    }

    /// Move to `Revoked` and erase the credential locally, then ask the
    /// server to revoke it. Only a local store failure is reported.
    pub async fn revoke(&self) -> Result<(), AuthError> {
        let erased = self.core.lock().revoke();
        info!(session_id = %self.core.id, had_credential = erased.is_some(), "Session revoked");

        let core = Arc::clone(&self.core);
        detached(async move { core.erase(erased).await }).await
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        self.revoke().await
    }

    /// Ask the authority whether the current credential is still honored.
    /// An inactive token revokes the session locally.
    pub async fn check_token(&self) -> Result<TokenStatus, AuthError> {
        let credential = self.current_credential().await?;

        let core = Arc::clone(&self.core);
        detached(async move {
            let status = AssertUnwindSafe(core.network.check(credential.access_token()))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(AuthError::transient("check adapter panicked")))?;
            debug!(session_id = %core.id, ?status, "Token status checked");
            if status == TokenStatus::Inactive {
                core.forget_inactive(credential.access_token()).await?;
            }
            Ok(status)
        })
        .await
    }

    /// Load a persisted credential into an unauthenticated session.
    pub async fn restore(&self) -> Result<SessionState, AuthError> {
        let stored = {
            let _store = self.core.store_lock.lock().await;
            self.core.store.load(&self.core.id).await?
        };
        let Some(credential) = stored else {
            debug!(session_id = %self.core.id, "No stored credential");
            return Ok(self.state());
        };

        let now = self.core.now()?;
        let usable = self.core.classify(&credential, now).is_usable();
        let mut machine = self.core.lock();
        machine.restore(credential, usable)?;
        debug!(session_id = %self.core.id, usable, "Stored credential restored");
        Ok(machine.state())
    }
}

pub struct AuthSessionBuilder {
    id: Option<SessionId>,
    store: Arc<dyn CredentialStore>,
    network: Arc<dyn NetworkAdapter>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    clock_skew_tolerance: Duration,
    coordinator: Option<Arc<RefreshCoordinator>>,
}

impl AuthSessionBuilder {
    fn new(store: Arc<dyn CredentialStore>, network: Arc<dyn NetworkAdapter>) -> Self {
        Self {
            id: None,
            store,
            network,
            clock: Arc::new(SystemClock),
            policy: RefreshPolicy::default(),
            clock_skew_tolerance: Duration::zero(),
            coordinator: None,
        }
    }

    /// Stable id so a persisted credential can be restored. Random if unset.
    pub fn session_id(mut self, id: impl Into<SessionId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn clock_skew_tolerance(mut self, tolerance: Duration) -> Self {
        self.clock_skew_tolerance = tolerance;
        self
    }

    /// Apply refresh policy and clock tolerance from a loaded config.
    pub fn config(mut self, config: &AuthConfig) -> Self {
        self.policy = config.refresh;
        self.clock_skew_tolerance = config.clock_skew_tolerance();
        self
    }

    pub fn coordinator(mut self, coordinator: Arc<RefreshCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn build(self) -> AuthSession {
        let core = SessionCore {
            id: self.id.unwrap_or_else(SessionId::generate),
            network: self.network,
            store: self.store,
            machine: Mutex::new(SessionStateMachine::new()),
            validator: TokenValidator::new(self.policy),
            clock: ClockGuard::new(self.clock, self.clock_skew_tolerance),
            store_lock: tokio::sync::Mutex::new(()),
        };
        AuthSession {
            core: Arc::new(core),
            coordinator: self.coordinator.unwrap_or_default(),
        }
    }
}
