//! Credential persistence.
//!
//! This module provides:
//! - `CredentialStore`: the persistence contract the session engine calls
//! - `InMemoryCredentialStore`: process-local store, used by tests and
//!   ephemeral sessions
//! - `FileCredentialStore`: JSON files in the data directory, written
//!   atomically
//!
//! Platform keychain stores implement the same trait outside this crate.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credential::{Credential, SessionId};
use crate::error::StoreError;

pub use file::FileCredentialStore;
pub use memory::InMemoryCredentialStore;

/// Durable storage of one credential per session id.
///
/// `save` must be atomic: a concurrent `load` observes either the previous
/// record or the new one, never a partial write.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, session_id: &SessionId) -> Result<Option<Credential>, StoreError>;

    async fn save(&self, session_id: &SessionId, credential: &Credential) -> Result<(), StoreError>;

    /// Deleting a missing record is not an error.
    async fn delete(&self, session_id: &SessionId) -> Result<(), StoreError>;
}

/// On-disk envelope for a persisted credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub credential: Credential,
    pub saved_at: DateTime<Utc>,
}

impl StoredCredential {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            saved_at: Utc::now(),
        }
    }
}
