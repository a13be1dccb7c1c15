//! In-memory credential store for tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::credential::{Credential, SessionId};
use crate::error::StoreError;

use super::CredentialStore;

/// Process-local credential store.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    records: RwLock<HashMap<SessionId, Credential>>,
    saves: AtomicUsize,
    deletes: AtomicUsize,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Number of successful `delete` calls
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.records
            .read()
            .map(|records| records.contains_key(session_id))
            .unwrap_or(false)
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("in-memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&self, session_id: &SessionId) -> Result<Option<Credential>, StoreError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.get(session_id).cloned())
    }

    async fn save(&self, session_id: &SessionId, credential: &Credential) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        records.insert(session_id.clone(), credential.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        records.remove(session_id);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
