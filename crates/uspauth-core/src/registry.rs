//! Session registry handing out one shared `AuthSession` per user context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::AuthConfig;
use crate::coordinator::RefreshCoordinator;
use crate::credential::SessionId;
use crate::network::NetworkAdapter;
use crate::session::AuthSession;
use crate::store::CredentialStore;

/// Hands out exactly one `AuthSession` per user context.
///
/// All sessions share the registry's store, network adapter, clock and
/// refresh coordinator.
pub struct SessionRegistry {
    store: Arc<dyn CredentialStore>,
    network: Arc<dyn NetworkAdapter>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    coordinator: Arc<RefreshCoordinator>,
    sessions: Mutex<HashMap<SessionId, AuthSession>>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        network: Arc<dyn NetworkAdapter>,
        config: AuthConfig,
    ) -> Self {
        Self {
            store,
            network,
            clock: Arc::new(SystemClock),
            config,
            coordinator: Arc::new(RefreshCoordinator::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// The session for `id`, created on first use.
    pub fn session(&self, id: impl Into<SessionId>) -> AuthSession {
        let id = id.into();
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(id.clone())
            .or_insert_with(|| {
                debug!(session_id = %id, "Creating session");
                AuthSession::builder(self.store.clone(), self.network.clone())
                    .session_id(id.clone())
                    .clock(self.clock.clone())
                    .config(&self.config)
                    .coordinator(self.coordinator.clone())
                    .build()
            })
            .clone()
    }

    /// Forget a session handle. Does not revoke it.
    pub fn remove(&self, id: &SessionId) -> Option<AuthSession> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Revoke every known session. Returns how many failed to erase their
    /// stored credential.
    pub async fn revoke_all(&self) -> usize {
        let sessions: Vec<AuthSession> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let results = futures::future::join_all(sessions.iter().map(|s| s.revoke())).await;
        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            warn!(failures, "Some sessions failed to erase stored credentials");
        }
        failures
    }
}
