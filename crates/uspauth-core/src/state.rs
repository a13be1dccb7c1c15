//! Session state machine.
//!
//! `next_state` is the transition table. `SessionStateMachine` owns the
//! mutable session record (state, current credential, last error) and only
//! changes it through that table. Callers guard it with a mutex; nothing in
//! here awaits.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::credential::Credential;
use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
    Expired,
    Revoked,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticating => "authenticating",
            SessionState::Authenticated => "authenticated",
            SessionState::Refreshing => "refreshing",
            SessionState::Expired => "expired",
            SessionState::Revoked => "revoked",
        };
        f.write_str(name)
    }
}

/// Inputs to the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    BeginAuthentication,
    AuthenticationSucceeded,
    AuthenticationFailed { terminal: bool },
    /// Authentication succeeded remotely but could not be persisted.
    AuthenticationAborted { resume: SessionState },
    BeginRefresh,
    RefreshSucceeded,
    RefreshFailed { terminal: bool },
    /// A read found the credential past expiry with no way to refresh it.
    ExpiryObserved,
    /// A persisted credential was loaded at startup.
    Restored { usable: bool },
    Revoke,
    /// Explicit re-authentication out of `Revoked`.
    Reset,
}

/// The transition table. Anything not listed is an illegal overlap.
pub fn next_state(from: SessionState, trigger: Trigger) -> Result<SessionState, AuthError> {
    use SessionState::*;

    let to = match (from, trigger) {
        (_, Trigger::Revoke) => Revoked,
        (Revoked, Trigger::Reset) => Unauthenticated,

        (Unauthenticated | Expired | Authenticated, Trigger::BeginAuthentication) => Authenticating,
        (Authenticating, Trigger::AuthenticationSucceeded) => Authenticated,
        (Authenticating, Trigger::AuthenticationFailed { terminal: true }) => Revoked,
        (Authenticating, Trigger::AuthenticationFailed { terminal: false }) => Expired,
        (Authenticating, Trigger::AuthenticationAborted { resume }) => resume,

        (Authenticated | Expired, Trigger::BeginRefresh) => Refreshing,
        (Refreshing, Trigger::RefreshSucceeded) => Authenticated,
        (Refreshing, Trigger::RefreshFailed { terminal: true }) => Revoked,
        (Refreshing, Trigger::RefreshFailed { terminal: false }) => Expired,

        (Authenticated | Expired, Trigger::ExpiryObserved) => Expired,
        (Unauthenticated, Trigger::Restored { usable: true }) => Authenticated,
        (Unauthenticated, Trigger::Restored { usable: false }) => Expired,

        (state, _) => return Err(AuthError::ConcurrentOperation { state }),
    };
    Ok(to)
}

/// Point-in-time copy of the session record. Cheap: the credential is shared.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub credential: Option<Arc<Credential>>,
    pub epoch: u64,
    pub pending_write: bool,
}

/// Refresh parameters captured when a refresh begins.
#[derive(Debug, Clone)]
pub struct RefreshStart {
    pub epoch: u64,
    pub refresh_token: String,
}

/// The session record and its transitions.
///
/// `epoch` increments whenever the credential lineage is replaced wholesale
/// (authentication start, revoke). Completions carrying an older epoch are
/// rejected so a slow network call can never resurrect a revoked session.
#[derive(Debug)]
pub struct SessionStateMachine {
    state: SessionState,
    credential: Option<Arc<Credential>>,
    last_error: Option<AuthError>,
    epoch: u64,
    resume_state: Option<SessionState>,
    pending_write: bool,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unauthenticated,
            credential: None,
            last_error: None,
            epoch: 0,
            resume_state: None,
            pending_write: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn credential(&self) -> Option<&Arc<Credential>> {
        self.credential.as_ref()
    }

    pub fn last_error(&self) -> Option<&AuthError> {
        self.last_error.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            credential: self.credential.clone(),
            epoch: self.epoch,
            pending_write: self.pending_write,
        }
    }

    /// True while a completion tagged with `epoch` may still be applied.
    pub fn is_current(&self, epoch: u64, expected: SessionState) -> bool {
        self.epoch == epoch && self.state == expected
    }

    fn apply(&mut self, trigger: Trigger) -> Result<SessionState, AuthError> {
        let to = next_state(self.state, trigger)?;
        debug!(from = %self.state, to = %to, ?trigger, "Session transition");
        self.state = to;
        Ok(to)
    }

    fn check_epoch(&self, epoch: u64) -> Result<(), AuthError> {
        if self.epoch == epoch {
            Ok(())
        } else {
            Err(AuthError::NotAuthenticated)
        }
    }

    /// Enter `Authenticating`, restarting from `Revoked` if needed.
    pub fn begin_authentication(&mut self) -> Result<u64, AuthError> {
        let resume = self.state;
        if self.state == SessionState::Revoked {
            self.apply(Trigger::Reset)?;
        }
        self.apply(Trigger::BeginAuthentication)?;
        self.resume_state = Some(resume);
        self.epoch += 1;
        Ok(self.epoch)
    }

    pub fn authentication_succeeded(
        &mut self,
        epoch: u64,
        credential: Credential,
    ) -> Result<Arc<Credential>, AuthError> {
        self.check_epoch(epoch)?;
        self.apply(Trigger::AuthenticationSucceeded)?;
        let credential = Arc::new(credential);
        self.credential = Some(credential.clone());
        self.last_error = None;
        self.resume_state = None;
        self.pending_write = false;
        Ok(credential)
    }

    /// Returns the credential erased by a terminal failure, if any.
    pub fn authentication_failed(
        &mut self,
        epoch: u64,
        error: AuthError,
    ) -> Result<Option<Arc<Credential>>, AuthError> {
        self.check_epoch(epoch)?;
        self.apply(Trigger::AuthenticationFailed {
            terminal: error.is_terminal(),
        })?;
        let erased = if error.is_terminal() {
            self.pending_write = false;
            self.credential.take()
        } else {
            None
        };
        self.last_error = Some(error);
        self.resume_state = None;
        Ok(erased)
    }

    /// Undo `begin_authentication` after a failed persist.
    pub fn authentication_aborted(&mut self, epoch: u64, error: AuthError) -> Result<(), AuthError> {
        self.check_epoch(epoch)?;
        let resume = self.resume_state.take().unwrap_or(SessionState::Unauthenticated);
        self.apply(Trigger::AuthenticationAborted { resume })?;
        self.last_error = Some(error);
        Ok(())
    }

    /// Enter `Refreshing`. Fails with `NotAuthenticated` when there is no
    /// refresh token to spend.
    pub fn begin_refresh(&mut self) -> Result<RefreshStart, AuthError> {
        let refresh_token = self
            .credential
            .as_ref()
            .and_then(|c| c.refresh_token())
            .map(str::to_string)
            .ok_or(AuthError::NotAuthenticated)?;
        self.apply(Trigger::BeginRefresh)?;
        Ok(RefreshStart {
            epoch: self.epoch,
            refresh_token,
        })
    }

    /// Install the refreshed credential. `persisted` is false when the store
    /// write failed; the transition stands and the write is retried later.
    pub fn refresh_succeeded(
        &mut self,
        epoch: u64,
        credential: Credential,
        persisted: Result<(), AuthError>,
    ) -> Result<Arc<Credential>, AuthError> {
        self.check_epoch(epoch)?;
        self.apply(Trigger::RefreshSucceeded)?;
        let credential = Arc::new(self.inherit_user(credential));
        self.credential = Some(credential.clone());
        match persisted {
            Ok(()) => {
                self.pending_write = false;
                self.last_error = None;
            }
            Err(e) => {
                self.pending_write = true;
                self.last_error = Some(e);
            }
        }
        Ok(credential)
    }

    /// Returns the credential erased by a terminal failure, if any.
    pub fn refresh_failed(
        &mut self,
        epoch: u64,
        error: AuthError,
    ) -> Result<Option<Arc<Credential>>, AuthError> {
        self.check_epoch(epoch)?;
        self.apply(Trigger::RefreshFailed {
            terminal: error.is_terminal(),
        })?;
        let erased = if error.is_terminal() {
            self.pending_write = false;
            self.credential.take()
        } else {
            None
        };
        self.last_error = Some(error);
        Ok(erased)
    }

    /// Attach the held credential's user profile to a refreshed credential
    /// that came back without one.
    pub fn inherit_user(&self, credential: Credential) -> Credential {
        if credential.user().is_some() {
            return credential;
        }
        match self.credential.as_ref().and_then(|c| c.user()) {
            Some(user) => credential.with_user(user.clone()),
            None => credential,
        }
    }

    /// Mark a credential that expired with no refresh token.
    pub fn observe_expiry(&mut self) -> Result<(), AuthError> {
        self.apply(Trigger::ExpiryObserved)?;
        self.last_error = Some(AuthError::NotAuthenticated);
        Ok(())
    }

    /// Load a persisted credential into a fresh session.
    pub fn restore(&mut self, credential: Credential, usable: bool) -> Result<Arc<Credential>, AuthError> {
        self.apply(Trigger::Restored { usable })?;
        let credential = Arc::new(credential);
        self.credential = Some(credential.clone());
        Ok(credential)
    }

    /// Unconditional transition to `Revoked`. Returns the erased credential.
    pub fn revoke(&mut self) -> Option<Arc<Credential>> {
        // Revoke is legal from every state
        let _ = self.apply(Trigger::Revoke);
        self.epoch += 1;
        self.resume_state = None;
        self.pending_write = false;
        self.last_error = None;
        self.credential.take()
    }

    /// A pending write was retried successfully for `epoch`.
    pub fn write_completed(&mut self, epoch: u64) {
        if self.epoch == epoch {
            self.pending_write = false;
            if matches!(self.last_error, Some(AuthError::Store(_))) {
                self.last_error = None;
            }
        }
    }
}
