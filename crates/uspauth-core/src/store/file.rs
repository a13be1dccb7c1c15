//! File-backed credential store writing one JSON record per session.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::credential::{Credential, SessionId};
use crate::error::StoreError;

use super::{CredentialStore, StoredCredential};

/// Credential file extension
const RECORD_EXTENSION: &str = "json";

/// Suffix for in-progress writes, renamed into place once complete
const TEMP_SUFFIX: &str = "tmp";

/// Stores one JSON file per session in a directory.
///
/// Saves write a temporary sibling file and rename it over the record, so a
/// reader never sees a half-written credential.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&dir)?;
        restrict_permissions(&dir, 0o700);
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, session_id: &SessionId) -> PathBuf {
        self.dir
            .join(format!("{}.{}", file_stem(session_id), RECORD_EXTENSION))
    }

    /// Unique per call so concurrent writers never share a temp file.
    fn temp_path(&self, session_id: &SessionId) -> PathBuf {
        let nonce: u64 = rand::thread_rng().gen();
        self.dir.join(format!(
            "{}.{}.{:016x}.{}",
            file_stem(session_id),
            RECORD_EXTENSION,
            nonce,
            TEMP_SUFFIX
        ))
    }
}

/// Map a session id to a file-name safe stem. Unsafe bytes are
/// percent-encoded so distinct ids never share a file.
fn file_stem(session_id: &SessionId) -> String {
    let mut stem = String::with_capacity(session_id.as_str().len());
    for byte in session_id.as_str().bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'@' => stem.push(byte as char),
            _ => stem.push_str(&format!("%{:02X}", byte)),
        }
    }
    stem
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        warn!(path = %path.display(), error = %e, "Failed to restrict permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) {}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, session_id: &SessionId) -> Result<Option<Credential>, StoreError> {
        let path = self.record_path(session_id);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stored: StoredCredential = serde_json::from_str(&contents).map_err(|e| {
            warn!(session_id = %session_id, error = %e, "Failed to parse credential file");
            StoreError::Corrupt(session_id.to_string())
        })?;

        debug!(session_id = %session_id, saved_at = %stored.saved_at, "Credential loaded");
        Ok(Some(stored.credential))
    }

    async fn save(&self, session_id: &SessionId, credential: &Credential) -> Result<(), StoreError> {
        let stored = StoredCredential::new(credential.clone());
        let contents = serde_json::to_string_pretty(&stored)?;

        let temp = self.temp_path(session_id);
        std::fs::write(&temp, contents)?;
        restrict_permissions(&temp, 0o600);
        if let Err(e) = std::fs::rename(&temp, self.record_path(session_id)) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }

        debug!(session_id = %session_id, "Credential saved");
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), StoreError> {
        match std::fs::remove_file(self.record_path(session_id)) {
            Ok(()) => {
                debug!(session_id = %session_id, "Credential deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
