//! Refresh coalescing.
//!
//! `RefreshCoordinator` keeps a registry of session id → in-flight
//! `RefreshTicket`. The first caller that finds a session due for refresh
//! moves it to `Refreshing` and spawns the network call on a detached task;
//! every caller that arrives while the session is `Refreshing` awaits the
//! same ticket. Dropping a waiting future never cancels the refresh itself.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info};

use crate::credential::{Credential, SessionId};
use crate::error::AuthError;
use crate::session::{AuthSession, SessionCore};
use crate::state::SessionState;
use crate::validator::Classification;

/// Outcome delivered to every waiter of one ticket.
pub type RefreshOutcome = Result<Credential, AuthError>;

type Registry = Arc<Mutex<HashMap<SessionId, RefreshTicket>>>;

/// Handle to one in-flight refresh, shared by all coalesced waiters.
#[derive(Clone)]
pub(crate) struct RefreshTicket {
    id: u64,
    epoch: u64,
    outcome: Shared<BoxFuture<'static, RefreshOutcome>>,
}

impl RefreshTicket {
    /// Wait for the refresh to resolve. Cancel-safe.
    pub(crate) async fn wait(self) -> RefreshOutcome {
        self.outcome.await
    }
}

/// Ensures at most one concurrent refresh per session.
///
/// One coordinator may be shared by many sessions; tickets are keyed by
/// session id.
#[derive(Default)]
pub struct RefreshCoordinator {
    in_flight: Registry,
    next_ticket: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of refreshes currently registered
    pub fn in_flight(&self) -> usize {
        lock_registry(&self.in_flight).len()
    }

    pub fn is_refreshing(&self, session_id: &SessionId) -> bool {
        lock_registry(&self.in_flight).contains_key(session_id)
    }

    /// Return a usable credential for `session`, refreshing it if due.
    ///
    /// Unlike `AuthSession::current_credential`, this does not retry a store
    /// write left pending by an earlier refresh.
    pub async fn ensure_fresh(&self, session: &AuthSession) -> RefreshOutcome {
        self.fresh_credential(session.core()).await
    }

    pub(crate) async fn fresh_credential(&self, core: &Arc<SessionCore>) -> RefreshOutcome {
        let now = core.now()?;

        // Fast path on a snapshot: no registry access, no suspension
        let snapshot = core.snapshot();
        if snapshot.state == SessionState::Authenticating {
            return held_during_login(core, snapshot.credential.as_ref(), now);
        }
        let credential = match (snapshot.state, snapshot.credential) {
            (
                SessionState::Authenticated | SessionState::Expired | SessionState::Refreshing,
                Some(credential),
            ) => credential,
            _ => return Err(AuthError::NotAuthenticated),
        };
        if snapshot.state != SessionState::Refreshing
            && core.classify(&credential, now) == Classification::Valid
        {
            return Ok((*credential).clone());
        }

        let ticket = match self.ticket_for(core, now)? {
            Ticket::Ready(credential) => return Ok(credential),
            Ticket::Join(ticket) => ticket,
        };
        ticket.wait().await
    }

    /// Decide under the registry and session locks whether to join an
    /// existing refresh, start one, or answer directly.
    fn ticket_for(
        &self,
        core: &Arc<SessionCore>,
        now: DateTime<Utc>,
    ) -> Result<Ticket, AuthError> {
        let mut in_flight = lock_registry(&self.in_flight);
        let mut machine = core.lock();

        if machine.state() == SessionState::Authenticating {
            return held_during_login(core, machine.credential(), now).map(Ticket::Ready);
        }

        let credential = match (machine.state(), machine.credential()) {
            (
                SessionState::Authenticated | SessionState::Expired | SessionState::Refreshing,
                Some(credential),
            ) => credential.clone(),
            _ => return Err(AuthError::NotAuthenticated),
        };

        if machine.state() == SessionState::Refreshing {
            return match in_flight.get(&core.id) {
                Some(ticket) if ticket.epoch == machine.epoch() => {
                    debug!(session_id = %core.id, ticket = ticket.id, "Joining in-flight refresh");
                    Ok(Ticket::Join(ticket.clone()))
                }
                _ => Err(AuthError::ConcurrentOperation {
                    state: SessionState::Refreshing,
                }),
            };
        }

        // Another caller may have completed a refresh since the snapshot
        let classification = core.classify(&credential, now);
        if classification == Classification::Valid {
            return Ok(Ticket::Ready((*credential).clone()));
        }

        let start = match machine.begin_refresh() {
            Ok(start) => start,
            Err(AuthError::NotAuthenticated) => {
                // No refresh token: usable until it expires, then re-login
                if classification.is_usable() {
                    return Ok(Ticket::Ready((*credential).clone()));
                }
                machine.observe_expiry()?;
                return Err(AuthError::NotAuthenticated);
            }
            Err(e) => return Err(e),
        };
        drop(machine);

        let epoch = start.epoch;
        let ticket_id = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        info!(
            session_id = %core.id,
            ticket = ticket_id,
            ?classification,
            "Starting credential refresh"
        );

        let task_core = Arc::clone(core);
        let registry = Arc::clone(&self.in_flight);
        let task = async move {
            let result = AssertUnwindSafe(task_core.network.refresh(&start.refresh_token))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(AuthError::transient("refresh adapter panicked")));
            let outcome = task_core.finish_refresh(start.epoch, result).await;
            release(&registry, &task_core.id, ticket_id);
            outcome
        };

        let outcome = tokio::spawn(task)
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(AuthError::transient(format!("refresh task failed: {}", e)))
                })
            })
            .boxed()
            .shared();

        let ticket = RefreshTicket {
            id: ticket_id,
            epoch,
            outcome,
        };
        in_flight.insert(core.id.clone(), ticket.clone());
        Ok(Ticket::Join(ticket))
    }
}

enum Ticket {
    Ready(Credential),
    Join(RefreshTicket),
}

/// A re-login keeps serving the credential it is about to replace while that
/// credential is still usable.
fn held_during_login(
    core: &SessionCore,
    credential: Option<&Arc<Credential>>,
    now: DateTime<Utc>,
) -> RefreshOutcome {
    match credential {
        Some(credential) if core.classify(credential, now).is_usable() => {
            Ok((**credential).clone())
        }
        _ => Err(AuthError::NotAuthenticated),
    }
}

fn lock_registry(registry: &Registry) -> MutexGuard<'_, HashMap<SessionId, RefreshTicket>> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drop the registry entry if it still belongs to `ticket_id`.
fn release(registry: &Registry, session_id: &SessionId, ticket_id: u64) {
    let mut in_flight = lock_registry(registry);
    if in_flight.get(session_id).map(|t| t.id) == Some(ticket_id) {
        in_flight.remove(session_id);
        debug!(session_id = %session_id, ticket = ticket_id, "Refresh ticket released");
    }
}
